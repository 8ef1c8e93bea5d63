//! Map job core: the job lifecycle controller, its estimator and its
//! persistence adapters. Pure and synchronous; all IO happens in the host.
mod claim;
mod effect;
mod estimator;
mod guard;
mod input;
mod msg;
mod progress;
mod settings;
mod state;
mod storage;
mod update;
mod view_model;

pub use claim::{claim_batch, detect_transition, AuthTransition};
pub use effect::Effect;
pub use estimator::{AllowanceStep, EstimatorSettings, FillerRotation, ProgressEstimator, StageCap};
pub use guard::{JobToken, StaleJobGuard};
pub use input::{
    DrawnFeature, DrawnGeometry, GeometryKind, GeometrySource, GeometrySummary, InputError,
    JobConfig, JobInput, JobRequest, UploadedFile, DRAWN_FILENAME, MAX_UPLOAD_BYTES,
    SUPPORTED_EXTENSIONS,
};
pub use msg::Msg;
pub use progress::{DensitySample, JobSuccess, ProgressEvent, ResultLinks, Stage, TerminalOutcome};
pub use settings::{CoreSettings, MAX_SNAPSHOT_WINDOW_SECONDS};
pub use state::{AppState, ClaimPrompt, ConfigureDraft, UiState};
pub use storage::{
    ErrorSnapshot, KeyValueStore, MemoryStore, OutcomeSnapshots, PendingJobList, SnapshotInput,
    Storage, StorageError, TerminalSnapshot, UnavailableStore, LAST_OUTCOME_KEY,
    PENDING_JOBS_KEY,
};
pub use update::update;
pub use view_model::{AppViewModel, ProgressView};
