//! Monotone counters exposed on the stats endpoint. Never reset
//! during normal operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use copilot_core::UpstreamKind;
use serde::Serialize;

#[derive(Debug, Default, Serialize)]
pub struct OrchestratorStatsSnapshot {
    pub total_calls: u64,
    pub total_health_checks: u64,
    pub calls_by_upstream: HashMap<String, u64>,
    pub breaker_transitions_by_upstream: HashMap<String, u64>,
}

pub struct OrchestratorStats {
    total_calls: AtomicU64,
    total_health_checks: AtomicU64,
    calls_by_upstream: Mutex<HashMap<UpstreamKind, u64>>,
}

impl Default for OrchestratorStats {
    fn default() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            total_health_checks: AtomicU64::new(0),
            calls_by_upstream: Mutex::new(HashMap::new()),
        }
    }
}

impl OrchestratorStats {
    pub fn record_call(&self, upstream: UpstreamKind) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        *self.calls_by_upstream.lock().expect("lock not poisoned").entry(upstream).or_insert(0) += 1;
    }

    pub fn record_health_check(&self) {
        self.total_health_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, breaker_transitions: HashMap<String, u64>) -> OrchestratorStatsSnapshot {
        let calls_by_upstream = self
            .calls_by_upstream
            .lock()
            .expect("lock not poisoned")
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), *v))
            .collect();
        OrchestratorStatsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_health_checks: self.total_health_checks.load(Ordering::Relaxed),
            calls_by_upstream,
            breaker_transitions_by_upstream: breaker_transitions,
        }
    }
}
