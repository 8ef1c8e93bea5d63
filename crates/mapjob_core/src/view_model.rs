use crate::{Stage, UiState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressView {
    pub percent: u8,
    pub stage: Stage,
    pub message: String,
    pub event_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppViewModel {
    pub ui: UiState,
    pub progress: Option<ProgressView>,
    pub signed_in: bool,
    /// Rate-limited anonymous users get a sign-up path instead of a bare retry.
    pub offer_sign_in: bool,
    pub claim_prompt_visible: bool,
    pub claim_in_flight: bool,
    pub notification: Option<String>,
    pub alert: Option<String>,
    pub input_error: Option<String>,
    pub pending_job_count: usize,
    pub dirty: bool,
}
