//! Per-upstream circuit breaker.
//!
//! The Open → HalfOpen transition is observed lazily at the next call, not
//! driven by a timer — this avoids waking a breaker that nobody is calling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use copilot_core::{CircuitBreakerSnapshot, CircuitState, ErrorKind, GatewayError, GatewayResult, UpstreamKind};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct BreakerThresholds {
    pub failure_threshold: usize,
    pub open_duration: Duration,
    pub half_open_required: usize,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: usize,
    consecutive_half_open_successes: usize,
    last_failure_unix: Option<i64>,
}

/// Owns the Closed/Open/HalfOpen state machine:
///
/// ```text
/// Closed  --(failures >= threshold)-->        Open
/// Open    --(now - last_failure >= openDur)--> HalfOpen (on next call)
/// HalfOpen --(success)-->                      HalfOpen, successes++
/// HalfOpen --(successes >= required)-->        Closed (reset counters)
/// HalfOpen --(failure)-->                      Open
/// Closed  --(success)-->                       Closed (failures = 0)
/// ```
pub struct CircuitBreaker {
    upstream: UpstreamKind,
    thresholds: BreakerThresholds,
    inner: Mutex<Inner>,
    transitions: AtomicU64,
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

impl CircuitBreaker {
    pub fn new(upstream: UpstreamKind, thresholds: BreakerThresholds) -> Self {
        Self {
            upstream,
            thresholds,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_half_open_successes: 0,
                last_failure_unix: None,
            }),
            transitions: AtomicU64::new(0),
        }
    }

    /// Runs `fn` if the breaker permits it, applying success/failure
    /// transitions to the outcome. Returns `Err(BreakerOpen)` without
    /// invoking `f` if currently Open and `openDuration` has not elapsed.
    pub async fn execute<F, Fut, T>(&self, f: F) -> GatewayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = GatewayResult<T>>,
    {
        if !self.admit().await {
            return Err(GatewayError::breaker_open(self.upstream.as_str()));
        }

        let result = f().await;
        match &result {
            Ok(_) => self.record_success().await,
            Err(err) => self.record_failure(err.kind != ErrorKind::Cancelled).await,
        }
        result
    }

    /// Decides whether a call may proceed, performing the lazy
    /// Open→HalfOpen transition if the open window has elapsed.
    async fn admit(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_unix
                    .map(|t| now_unix() - t)
                    .unwrap_or(i64::MAX);
                if elapsed >= self.thresholds.open_duration.as_secs() as i64 {
                    debug!(upstream = %self.upstream, "breaker transitioning Open -> HalfOpen");
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_half_open_successes = 0;
                    self.transitions.fetch_add(1, Ordering::Relaxed);
                    true
                } else {
                    false
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_half_open_successes += 1;
                if inner.consecutive_half_open_successes >= self.thresholds.half_open_required {
                    debug!(upstream = %self.upstream, "breaker transitioning HalfOpen -> Closed");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_half_open_successes = 0;
                    self.transitions.fetch_add(1, Ordering::Relaxed);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Counts towards the failure threshold only for errors that represent
    /// a genuine upstream problem; `Cancelled` (shutdown) never trips it.
    async fn record_failure(&self, counts: bool) {
        if !counts {
            return;
        }
        let mut inner = self.inner.lock().await;
        inner.last_failure_unix = Some(now_unix());
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.thresholds.failure_threshold {
                    warn!(upstream = %self.upstream, "breaker transitioning Closed -> Open");
                    inner.state = CircuitState::Open;
                    self.transitions.fetch_add(1, Ordering::Relaxed);
                }
            }
            CircuitState::HalfOpen => {
                warn!(upstream = %self.upstream, "breaker transitioning HalfOpen -> Open");
                inner.state = CircuitState::Open;
                inner.consecutive_half_open_successes = 0;
                self.transitions.fetch_add(1, Ordering::Relaxed);
            }
            CircuitState::Open => {}
        }
    }

    pub async fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock().await;
        CircuitBreakerSnapshot {
            upstream: self.upstream,
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_half_open_successes: inner.consecutive_half_open_successes,
            last_failure_unix: inner.last_failure_unix,
        }
    }

    pub fn transition_count(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }
}
