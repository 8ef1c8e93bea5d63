use std::time::Duration;

use crate::{JobRequest, JobToken};

/// Work the controller asks its host to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Open a processing stream; every resulting message carries `token`.
    SubmitJob { token: JobToken, request: JobRequest },
    /// Deliver `Msg::ClaimPromptDue` after `delay`.
    ScheduleClaimPrompt { job_id: String, delay: Duration },
    ClaimJobs { user_id: String, job_ids: Vec<String> },
    Download { url: String },
}
