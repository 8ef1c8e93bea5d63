use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Locally minted identifier for one submission. Never zero.
pub type JobToken = u64;

const NO_ACTIVE_JOB: u64 = 0;

/// Single-slot holder of the active job token.
///
/// The slot is shared by reference so a result handler always compares
/// against the value current at commit time, never a copy taken when the
/// request was issued. Clones observe the same slot.
#[derive(Debug, Clone, Default)]
pub struct StaleJobGuard {
    active: Arc<AtomicU64>,
    minted: Arc<AtomicU64>,
}

impl StaleJobGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a fresh token and makes it the active one, superseding any
    /// previous job.
    pub fn begin(&self) -> JobToken {
        let token = self.minted.fetch_add(1, Ordering::Relaxed) + 1;
        self.active.store(token, Ordering::Release);
        token
    }

    /// Invalidates the active token; every in-flight result becomes stale.
    pub fn clear(&self) {
        self.active.store(NO_ACTIVE_JOB, Ordering::Release);
    }

    pub fn active(&self) -> Option<JobToken> {
        match self.active.load(Ordering::Acquire) {
            NO_ACTIVE_JOB => None,
            token => Some(token),
        }
    }

    /// Strict equality against the slot; no queuing or merging.
    pub fn is_current(&self, token: JobToken) -> bool {
        token != NO_ACTIVE_JOB && self.active.load(Ordering::Acquire) == token
    }
}

#[cfg(test)]
mod tests {
    use super::StaleJobGuard;

    #[test]
    fn newer_submission_supersedes_older() {
        let guard = StaleJobGuard::new();
        let first = guard.begin();
        let second = guard.begin();
        assert_ne!(first, second);
        assert!(!guard.is_current(first));
        assert!(guard.is_current(second));
    }

    #[test]
    fn clear_invalidates_and_clones_share_the_slot() {
        let guard = StaleJobGuard::new();
        let observer = guard.clone();
        let token = guard.begin();
        assert_eq!(observer.active(), Some(token));

        guard.clear();
        assert!(!observer.is_current(token));
        assert_eq!(observer.active(), None);

        // Tokens are never reused after a clear.
        assert_ne!(guard.begin(), token);
    }
}
