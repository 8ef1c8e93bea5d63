//! Map job engine: progress stream decoding, backends and effect execution.
mod backend;
mod disposition;
mod engine;
mod persist;
mod simulate;
mod sse;
mod types;

pub use backend::{BackendSettings, HttpBackend, JobBackend, ProgressSink};
pub use disposition::{download_filename, filename_from_disposition, sanitize_filename, short_hash};
pub use engine::{ChannelProgressSink, EngineHandle};
pub use persist::{ensure_dir, AtomicFileWriter, PersistError};
pub use simulate::SimulatedBackend;
pub use sse::{consume, ConsumerError, FrameDecoder, WireFrame, INCOMPLETE_STREAM_MESSAGE};
pub use types::{BackendError, DownloadedFile, EngineEvent, HealthStatus, RateLimitStatus};
