use std::fmt;

use serde::{Deserialize, Serialize};

/// Pipeline stage reported by the processing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Upload,
    Geometry,
    Querying,
    Processing,
    Map,
    Report,
    Complete,
    Error,
    /// Any stage name this client does not know about.
    #[serde(other)]
    Unknown,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Complete | Stage::Error)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Upload => "upload",
            Stage::Geometry => "geometry",
            Stage::Querying => "querying",
            Stage::Processing => "processing",
            Stage::Map => "map",
            Stage::Report => "report",
            Stage::Complete => "complete",
            Stage::Error => "error",
            Stage::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Feature count observed for one data category while querying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DensitySample {
    pub category: String,
    pub feature_count: u64,
}

/// One intermediate event from a job's progress stream.
///
/// Only `stage` is trustworthy; every numeric field is a hint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: String,
    pub progress_hint: Option<f64>,
    pub layer_index: Option<u32>,
    pub layer_total: Option<u32>,
    pub estimated_total_seconds: Option<f64>,
    pub input_area_sq_miles: Option<f64>,
    pub density_sample: Option<DensitySample>,
    pub error_detail: Option<String>,
}

impl ProgressEvent {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Links produced by a successful job. Any of them may be missing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResultLinks {
    pub archive_url: Option<String>,
    pub map_url: Option<String>,
    pub pdf_url: Option<String>,
    pub spreadsheet_url: Option<String>,
}

impl ResultLinks {
    pub fn is_empty(&self) -> bool {
        self.archive_url.is_none()
            && self.map_url.is_none()
            && self.pdf_url.is_none()
            && self.spreadsheet_url.is_none()
    }

    pub fn count(&self) -> usize {
        [
            &self.archive_url,
            &self.map_url,
            &self.pdf_url,
            &self.spreadsheet_url,
        ]
        .iter()
        .filter(|link| link.is_some())
        .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSuccess {
    pub job_id: Option<String>,
    pub links: ResultLinks,
}

/// How a job's progress stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalOutcome {
    Succeeded(JobSuccess),
    Failed { message: String },
    /// Rejected before streaming began; `message` is the server's text verbatim.
    RateLimited { message: String },
}

impl TerminalOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        TerminalOutcome::Failed {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TerminalOutcome::Succeeded(_))
    }
}
