//! Best-effort persistence over two key-value scopes.
//!
//! The session scope outlives restarts and holds the pending job list; the
//! navigation scope holds at most one terminal outcome for a bounded window.
//! Nothing here returns an error to the controller: an unavailable or full
//! medium behaves as if nothing had been persisted.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use mapjob_logging::{job_debug, job_warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::ConfigureDraft;
use crate::{
    CoreSettings, DrawnGeometry, GeometrySource, GeometrySummary, JobConfig, JobInput,
    ResultLinks, UploadedFile, MAX_UPLOAD_BYTES,
};

pub const PENDING_JOBS_KEY: &str = "mapjob.pending_jobs";
pub const LAST_OUTCOME_KEY: &str = "mapjob.last_outcome";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),
}

/// Narrow capability over one persistence scope.
///
/// `set` with `None` removes the key.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: Option<&str>) -> Result<(), StorageError>;
}

/// In-process store. Clones share the same entries, which lets tests
/// simulate a navigation by handing the same store to a fresh controller.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    pub fn insert_raw(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Option<&str>) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|err| StorageError::Unavailable(err.to_string()))?;
        match value {
            Some(value) => entries.insert(key.to_string(), value.to_string()),
            None => entries.remove(key),
        };
        Ok(())
    }
}

/// A medium that refuses every operation, e.g. storage disabled by policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableStore;

impl KeyValueStore for UnavailableStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable("storage disabled".to_string()))
    }

    fn set(&mut self, _key: &str, _value: Option<&str>) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("storage disabled".to_string()))
    }
}

/// Job ids created while anonymous, oldest first.
pub struct PendingJobList {
    store: Box<dyn KeyValueStore>,
    cap: usize,
}

impl PendingJobList {
    pub fn new(store: Box<dyn KeyValueStore>, cap: usize) -> Self {
        Self {
            store,
            cap: cap.max(1),
        }
    }

    /// Idempotent; evicts the oldest entries beyond the cap.
    pub fn add(&mut self, job_id: &str) {
        let mut ids = self.list();
        if ids.iter().any(|id| id == job_id) {
            return;
        }
        ids.push(job_id.to_string());
        if ids.len() > self.cap {
            let excess = ids.len() - self.cap;
            ids.drain(..excess);
        }
        self.write(&ids);
    }

    pub fn list(&self) -> Vec<String> {
        match self.store.get(PENDING_JOBS_KEY) {
            Ok(Some(text)) => serde_json::from_str(&text).unwrap_or_else(|err| {
                job_warn!("Ignoring malformed pending job list: {}", err);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(err) => {
                job_warn!("Pending job list unreadable: {}", err);
                Vec::new()
            }
        }
    }

    pub fn remove(&mut self, job_id: &str) {
        let mut ids = self.list();
        let before = ids.len();
        ids.retain(|id| id != job_id);
        if ids.len() != before {
            self.write(&ids);
        }
    }

    pub fn clear(&mut self) {
        if let Err(err) = self.store.set(PENDING_JOBS_KEY, None) {
            job_warn!("Failed to clear pending job list: {}", err);
        }
    }

    fn write(&mut self, ids: &[String]) {
        if ids.is_empty() {
            self.clear();
            return;
        }
        let result = serde_json::to_string(ids)
            .map_err(|err| StorageError::Unavailable(err.to_string()))
            .and_then(|text| self.store.set(PENDING_JOBS_KEY, Some(&text)));
        if let Err(err) = result {
            job_warn!("Failed to persist pending job list: {}", err);
        }
    }
}

/// Enough of a completed job to rebuild the completion screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSnapshot {
    pub input_label: String,
    pub job_id: Option<String>,
    pub links: ResultLinks,
    pub captured_at: DateTime<Utc>,
}

/// The input of a failed job, stashed so a retry needs no re-upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotInput {
    File { name: String, content_base64: String },
    Drawn { geojson: String },
    /// The file was too large to stash; only its name survives.
    Omitted { name: String },
}

impl SnapshotInput {
    pub fn capture(input: &JobInput) -> Self {
        match input {
            JobInput::File(file) if file.bytes.len() <= MAX_UPLOAD_BYTES => SnapshotInput::File {
                name: file.name.clone(),
                content_base64: STANDARD.encode(&file.bytes),
            },
            JobInput::File(file) => SnapshotInput::Omitted {
                name: file.name.clone(),
            },
            JobInput::Drawn(geometry) => SnapshotInput::Drawn {
                geojson: geometry.to_geojson(),
            },
        }
    }

    pub fn restore(&self) -> Option<JobInput> {
        match self {
            SnapshotInput::File {
                name,
                content_base64,
            } => match STANDARD.decode(content_base64) {
                Ok(bytes) => Some(JobInput::File(UploadedFile::new(name.clone(), bytes))),
                Err(err) => {
                    job_warn!("Stashed file {} is not valid base64: {}", name, err);
                    None
                }
            },
            SnapshotInput::Drawn { geojson } => match DrawnGeometry::from_geojson(geojson) {
                Ok(geometry) => Some(JobInput::Drawn(geometry)),
                Err(err) => {
                    job_warn!("Stashed drawn geometry unreadable: {}", err);
                    None
                }
            },
            SnapshotInput::Omitted { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSnapshot {
    pub input_label: String,
    pub message: String,
    pub rate_limited: bool,
    pub input: SnapshotInput,
    pub config: JobConfig,
    pub summary: Option<GeometrySummary>,
    pub source: GeometrySource,
    pub captured_at: DateTime<Utc>,
}

impl ErrorSnapshot {
    pub fn capture(
        draft: &ConfigureDraft,
        message: &str,
        rate_limited: bool,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            input_label: draft.input.label().to_string(),
            message: message.to_string(),
            rate_limited,
            input: SnapshotInput::capture(&draft.input),
            config: draft.config.clone(),
            summary: draft.summary.clone(),
            source: draft.input.source(),
            captured_at,
        }
    }

    /// Rebuilds the configure screen, or `None` when the input did not survive.
    pub fn to_draft(&self) -> Option<ConfigureDraft> {
        let input = self.input.restore()?;
        let summary = match &input {
            JobInput::Drawn(geometry) => Some(geometry.summary()),
            JobInput::File(_) => self.summary.clone(),
        };
        Some(ConfigureDraft {
            input,
            summary,
            config: self.config.clone(),
            restored: true,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum StoredOutcome {
    Complete(TerminalSnapshot),
    Error(ErrorSnapshot),
}

impl StoredOutcome {
    fn captured_at(&self) -> DateTime<Utc> {
        match self {
            StoredOutcome::Complete(snapshot) => snapshot.captured_at,
            StoredOutcome::Error(snapshot) => snapshot.captured_at,
        }
    }
}

/// The single time-boxed outcome slot of the navigation scope.
pub struct OutcomeSnapshots {
    store: Box<dyn KeyValueStore>,
    window: chrono::Duration,
}

impl OutcomeSnapshots {
    pub fn new(store: Box<dyn KeyValueStore>, window: chrono::Duration) -> Self {
        Self { store, window }
    }

    pub fn save_terminal(&mut self, snapshot: &TerminalSnapshot) {
        self.write(&StoredOutcome::Complete(snapshot.clone()));
    }

    pub fn load_terminal(&mut self, now: DateTime<Utc>) -> Option<TerminalSnapshot> {
        match self.read(now)? {
            StoredOutcome::Complete(snapshot) => Some(snapshot),
            StoredOutcome::Error(_) => None,
        }
    }

    pub fn save_error(&mut self, snapshot: &ErrorSnapshot) {
        self.write(&StoredOutcome::Error(snapshot.clone()));
    }

    pub fn load_error(&mut self, now: DateTime<Utc>) -> Option<ErrorSnapshot> {
        match self.read(now)? {
            StoredOutcome::Error(snapshot) => Some(snapshot),
            StoredOutcome::Complete(_) => None,
        }
    }

    pub fn clear(&mut self) {
        if let Err(err) = self.store.set(LAST_OUTCOME_KEY, None) {
            job_warn!("Failed to clear persisted outcome: {}", err);
        }
    }

    /// Reads the slot, deleting it when malformed or expired.
    fn read(&mut self, now: DateTime<Utc>) -> Option<StoredOutcome> {
        let text = match self.store.get(LAST_OUTCOME_KEY) {
            Ok(text) => text?,
            Err(err) => {
                job_warn!("Persisted outcome unreadable: {}", err);
                return None;
            }
        };
        let stored: StoredOutcome = match serde_json::from_str(&text) {
            Ok(stored) => stored,
            Err(err) => {
                job_warn!("Discarding malformed persisted outcome: {}", err);
                self.clear();
                return None;
            }
        };
        let Some(expires_at) = stored.captured_at().checked_add_signed(self.window) else {
            job_warn!("Discarding persisted outcome with out-of-range timestamp {}", stored.captured_at());
            self.clear();
            return None;
        };
        if now >= expires_at {
            job_debug!("Persisted outcome from {} expired", stored.captured_at());
            self.clear();
            return None;
        }
        Some(stored)
    }

    fn write(&mut self, stored: &StoredOutcome) {
        let result = serde_json::to_string(stored)
            .map_err(|err| StorageError::Unavailable(err.to_string()))
            .and_then(|text| self.store.set(LAST_OUTCOME_KEY, Some(&text)));
        if let Err(err) = result {
            job_warn!("Failed to persist outcome: {}", err);
        }
    }
}

/// Both persistence scopes used by the controller.
pub struct Storage {
    pub pending: PendingJobList,
    pub outcomes: OutcomeSnapshots,
}

impl Storage {
    pub fn new(
        session_scope: Box<dyn KeyValueStore>,
        navigation_scope: Box<dyn KeyValueStore>,
        settings: &CoreSettings,
    ) -> Self {
        Self {
            pending: PendingJobList::new(session_scope, settings.pending_job_cap),
            outcomes: OutcomeSnapshots::new(navigation_scope, settings.snapshot_window()),
        }
    }

    pub fn in_memory(settings: &CoreSettings) -> Self {
        Self::new(
            Box::new(MemoryStore::new()),
            Box::new(MemoryStore::new()),
            settings,
        )
    }
}
