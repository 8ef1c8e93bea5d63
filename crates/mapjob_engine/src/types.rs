use std::path::PathBuf;

use mapjob_core::{JobToken, ProgressEvent, TerminalOutcome};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Progress {
        token: JobToken,
        event: ProgressEvent,
    },
    JobCompleted {
        token: JobToken,
        outcome: TerminalOutcome,
    },
    ClaimCompleted {
        result: Result<u32, BackendError>,
    },
    DownloadCompleted {
        result: Result<PathBuf, String>,
    },
    StatusReported {
        rate_limit: Result<RateLimitStatus, BackendError>,
        health: Result<HealthStatus, BackendError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    /// Non-success status; `detail` is the server's explanation when it gave one.
    #[error("{detail}")]
    Status { status: u16, detail: String },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("{0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub remaining_runs: u32,
    pub max_runs_per_day: u32,
    pub resets_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub service: String,
}

/// A fetched result file, not yet written anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}
