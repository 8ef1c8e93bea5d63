use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::{DrawnGeometry, GeometrySummary, JobConfig, JobToken, ProgressEvent, TerminalOutcome, UploadedFile};

#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// Controller created, e.g. after a page load or redirect.
    Mounted {
        now: DateTime<Utc>,
        /// Skip reconstruction and start from an empty upload screen.
        reset_requested: bool,
    },
    /// User picked a file; `summary` is whatever the caller could parse.
    FileChosen {
        file: UploadedFile,
        summary: Option<GeometrySummary>,
    },
    /// User asked to draw (or edit) geometry instead of uploading.
    DrawRequested,
    GeometryConfirmed(DrawnGeometry),
    DrawCancelled,
    /// User edited buffer/clip parameters or report labels.
    ConfigEdited(JobConfig),
    RunRequested {
        now: Instant,
    },
    /// Intermediate stream event, tagged with the token its stream was opened with.
    JobProgress {
        token: JobToken,
        event: ProgressEvent,
        now: Instant,
    },
    JobFinished {
        token: JobToken,
        outcome: TerminalOutcome,
        now: DateTime<Utc>,
    },
    RetryClicked,
    StartOverClicked,
    /// Estimator clock.
    Tick {
        now: Instant,
    },
    /// Session notification from the authentication provider.
    AuthChanged {
        user_id: Option<String>,
        now: DateTime<Utc>,
    },
    ClaimFinished {
        result: Result<u32, String>,
    },
    ClaimPromptDue {
        job_id: String,
    },
    ClaimPromptDismissed,
    DownloadRequested {
        url: String,
    },
    DownloadFinished {
        result: Result<PathBuf, String>,
    },
    NotificationDismissed,
    AlertDismissed,
    /// Fallback for placeholder wiring.
    NoOp,
}
