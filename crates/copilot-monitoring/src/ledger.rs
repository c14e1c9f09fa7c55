//! Per-download retry ledger: `DashMap<DownloadId, Arc<Mutex<RetryState>>>`.
//!
//! Global operations (none yet needed beyond per-id lookup) would snapshot
//! under the `DashMap`'s own sharded locking; per-download mutation always
//! goes through the inner `tokio::sync::Mutex` so a dropped event (lock
//! already held) never blocks the Recovery Loop.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use copilot_core::{RetryAttempt, RetryOutcome, RetryStrategy};

#[derive(Debug, Default)]
pub struct RetryState {
    download_id: String,
    attempts: Vec<RetryAttempt>,
    pub quality_downgrades: u32,
}

impl RetryState {
    fn new(download_id: impl Into<String>) -> Self {
        Self { download_id: download_id.into(), attempts: Vec::new(), quality_downgrades: 0 }
    }

    /// 1-based; strictly increasing.
    pub fn next_attempt_number(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }

    pub fn push_attempt(&mut self, strategy: RetryStrategy, scheduled_at_unix: i64) -> RetryAttempt {
        let attempt = RetryAttempt {
            download_id: self.download_id.clone(),
            strategy,
            attempt_number: self.next_attempt_number(),
            scheduled_at_unix,
            outcome: RetryOutcome::Pending,
            quality_downgrades: self.quality_downgrades,
        };
        self.attempts.push(attempt.clone());
        attempt
    }

    pub fn set_last_outcome(&mut self, outcome: RetryOutcome) {
        if let Some(last) = self.attempts.last_mut() {
            last.outcome = outcome;
        }
    }

    pub fn attempts(&self) -> &[RetryAttempt] {
        &self.attempts
    }
}

/// The per-process retry ledger, keyed by download id.
#[derive(Default)]
pub struct RetryLedger {
    entries: DashMap<String, Arc<Mutex<RetryState>>>,
}

impl RetryLedger {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Fetches (creating if absent) the lock-guarded state for a download id.
    pub fn entry(&self, download_id: &str) -> Arc<Mutex<RetryState>> {
        self.entries
            .entry(download_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RetryState::new(download_id))))
            .clone()
    }

    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_numbers_are_strictly_increasing() {
        let mut state = RetryState::new("nzo_1");
        let first = state.push_attempt(RetryStrategy::Immediate, 100);
        let second = state.push_attempt(RetryStrategy::Backoff, 200);
        assert_eq!(first.attempt_number, 1);
        assert_eq!(second.attempt_number, 2);
    }

    #[test]
    fn quality_downgrades_are_stamped_onto_the_attempt() {
        let mut state = RetryState::new("nzo_1");
        state.quality_downgrades = 1;
        let attempt = state.push_attempt(RetryStrategy::QualityFallback, 100);
        assert_eq!(attempt.quality_downgrades, 1);
    }
}
