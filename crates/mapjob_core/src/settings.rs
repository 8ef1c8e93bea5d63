use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::EstimatorSettings;

/// Longest outcome window honoured from a config file (one year).
pub const MAX_SNAPSHOT_WINDOW_SECONDS: i64 = 365 * 24 * 60 * 60;

/// Controller tunables. Every field has a default so partial config files load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreSettings {
    /// How long a persisted outcome survives a navigation.
    pub snapshot_window_seconds: i64,
    /// Maximum number of anonymous job ids kept for a later claim.
    pub pending_job_cap: usize,
    pub claim_prompt_delay_ms: u64,
    pub estimator: EstimatorSettings,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            snapshot_window_seconds: 60 * 60,
            pending_job_cap: 10,
            claim_prompt_delay_ms: 2_000,
            estimator: EstimatorSettings::default(),
        }
    }
}

impl CoreSettings {
    pub fn snapshot_window(&self) -> chrono::Duration {
        let seconds = self.snapshot_window_seconds.clamp(0, MAX_SNAPSHOT_WINDOW_SECONDS);
        chrono::Duration::try_seconds(seconds).unwrap_or_else(chrono::Duration::zero)
    }

    pub fn claim_prompt_delay(&self) -> Duration {
        Duration::from_millis(self.claim_prompt_delay_ms)
    }
}
