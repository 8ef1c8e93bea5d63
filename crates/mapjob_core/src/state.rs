use std::time::Instant;

use crate::view_model::{AppViewModel, ProgressView};
use crate::{
    CoreSettings, GeometrySummary, JobConfig, JobInput, ProgressEstimator, ProgressEvent,
    ResultLinks, StaleJobGuard, Storage,
};

/// A chosen input waiting for (or restored for) submission.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigureDraft {
    pub input: JobInput,
    pub summary: Option<GeometrySummary>,
    pub config: JobConfig,
    /// Rebuilt from a persisted error rather than picked in this session.
    pub restored: bool,
}

impl ConfigureDraft {
    pub fn new(input: JobInput, summary: Option<GeometrySummary>, config: JobConfig) -> Self {
        Self {
            input,
            summary,
            config,
            restored: false,
        }
    }
}

/// What the user sees. Exactly one variant is active.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum UiState {
    #[default]
    Upload,
    Draw {
        seed: Option<crate::DrawnGeometry>,
        /// Configuration to restore once the drawing is confirmed.
        preserved: Option<JobConfig>,
    },
    Configure(ConfigureDraft),
    Processing(ConfigureDraft),
    Complete {
        input_label: String,
        job_id: Option<String>,
        links: ResultLinks,
    },
    Error {
        message: String,
        rate_limited: bool,
        retry: ConfigureDraft,
    },
}

impl UiState {
    pub fn name(&self) -> &'static str {
        match self {
            UiState::Upload => "upload",
            UiState::Draw { .. } => "draw",
            UiState::Configure(_) => "configure",
            UiState::Processing(_) => "processing",
            UiState::Complete { .. } => "complete",
            UiState::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UiState::Complete { .. } | UiState::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClaimPrompt {
    #[default]
    Idle,
    Scheduled { job_id: String },
    Visible { job_id: String },
}

/// Controller state. Owns the only copies of the UI state, the active job
/// slot, the estimator and the persistence scopes.
pub struct AppState {
    pub(crate) ui: UiState,
    pub(crate) guard: StaleJobGuard,
    pub(crate) estimator: Option<ProgressEstimator>,
    pub(crate) events: Vec<ProgressEvent>,
    pub(crate) storage: Storage,
    pub(crate) settings: CoreSettings,
    pub(crate) user_id: Option<String>,
    pub(crate) claim_prompt: ClaimPrompt,
    pub(crate) claim_in_flight: bool,
    pub(crate) notification: Option<String>,
    pub(crate) alert: Option<String>,
    pub(crate) input_error: Option<String>,
    dirty: bool,
}

impl AppState {
    pub fn new(storage: Storage, settings: CoreSettings) -> Self {
        Self {
            ui: UiState::Upload,
            guard: StaleJobGuard::new(),
            estimator: None,
            events: Vec::new(),
            storage,
            settings,
            user_id: None,
            claim_prompt: ClaimPrompt::Idle,
            claim_in_flight: false,
            notification: None,
            alert: None,
            input_error: None,
            dirty: false,
        }
    }

    /// Fresh controller with in-memory scopes and default settings.
    pub fn in_memory() -> Self {
        let settings = CoreSettings::default();
        Self::new(Storage::in_memory(&settings), settings)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl AppState {
    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    /// A handle on the active job slot, e.g. for dropping stale progress early.
    pub fn guard(&self) -> StaleJobGuard {
        self.guard.clone()
    }

    pub fn settings(&self) -> &CoreSettings {
        &self.settings
    }

    pub fn events(&self) -> &[ProgressEvent] {
        &self.events
    }

    pub fn pending_jobs(&self) -> Vec<String> {
        self.storage.pending.list()
    }

    pub fn view(&self) -> AppViewModel {
        let progress = match (&self.ui, &self.estimator) {
            (UiState::Processing(_) | UiState::Complete { .. }, Some(estimator)) => {
                Some(ProgressView {
                    percent: estimator.displayed_percent(),
                    stage: estimator.stage(),
                    message: estimator.message().to_string(),
                    event_count: self.events.len(),
                })
            }
            _ => None,
        };
        let rate_limited = matches!(self.ui, UiState::Error { rate_limited: true, .. });
        AppViewModel {
            ui: self.ui.clone(),
            progress,
            signed_in: self.user_id.is_some(),
            offer_sign_in: rate_limited && self.user_id.is_none(),
            claim_prompt_visible: matches!(self.claim_prompt, ClaimPrompt::Visible { .. }),
            claim_in_flight: self.claim_in_flight,
            notification: self.notification.clone(),
            alert: self.alert.clone(),
            input_error: self.input_error.clone(),
            pending_job_count: self.storage.pending.list().len(),
            dirty: self.dirty,
        }
    }

    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn start_estimator(&mut self, now: Instant, area_hint: Option<f64>) {
        self.estimator = Some(ProgressEstimator::new(
            &self.settings.estimator,
            now,
            area_hint,
        ));
    }
}
