//! The Orchestrator: sole entry point for tool execution.
//!
//! Owns the registered adapters and their breakers; routes `ToolCall`s,
//! applies the timeout/retry/concurrency policy, and runs parallel fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use copilot_adapters::UpstreamAdapter;
use copilot_core::{
    ErrorKind, GatewayError, GatewayResult, OrchestratorConfig, ToolCall, ToolPayload, UpstreamConfig,
    UpstreamKind,
};
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::breaker::{BreakerThresholds, CircuitBreaker};
use crate::stats::{OrchestratorStats, OrchestratorStatsSnapshot};

/// Invoked after each individual completion in a parallel batch with
/// `(done, total)`. Panics inside it are caught and logged, never
/// propagated to the caller.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

pub struct ParallelOptions {
    pub return_partial: bool,
    pub cancel_on_critical: bool,
    pub overall_timeout: Option<Duration>,
    pub progress: Option<ProgressFn>,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self { return_partial: false, cancel_on_critical: false, overall_timeout: None, progress: None }
    }
}

struct Registration {
    adapter: Arc<dyn UpstreamAdapter>,
    breaker: CircuitBreaker,
    enabled: bool,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    registrations: HashMap<UpstreamKind, Registration>,
    concurrency: Arc<Semaphore>,
    parallel_concurrency: Arc<Semaphore>,
    stats: OrchestratorStats,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Production constructor: builds one adapter per `UpstreamConfig` via
    /// the `copilot-adapters` registry.
    pub fn new(configs: &[UpstreamConfig], config: OrchestratorConfig) -> Self {
        let registrations = configs
            .iter()
            .map(|c| {
                let adapter = copilot_adapters::build_adapter(c);
                (c.kind, Registration {
                    adapter,
                    breaker: CircuitBreaker::new(
                        c.kind,
                        BreakerThresholds {
                            failure_threshold: config.breaker_failure_threshold,
                            open_duration: config.breaker_open_duration(),
                            half_open_required: config.breaker_half_open_required,
                        },
                    ),
                    enabled: c.enabled,
                })
            })
            .collect();
        Self::from_registrations(registrations, config)
    }

    /// Test/embedding constructor: takes pre-built adapters directly (e.g.
    /// `FakeAdapter`) instead of deriving them from `UpstreamConfig`.
    pub fn from_adapters(adapters: Vec<(UpstreamKind, Arc<dyn UpstreamAdapter>, bool)>, config: OrchestratorConfig) -> Self {
        let registrations = adapters
            .into_iter()
            .map(|(kind, adapter, enabled)| {
                (kind, Registration {
                    adapter,
                    breaker: CircuitBreaker::new(
                        kind,
                        BreakerThresholds {
                            failure_threshold: config.breaker_failure_threshold,
                            open_duration: config.breaker_open_duration(),
                            half_open_required: config.breaker_half_open_required,
                        },
                    ),
                    enabled,
                })
            })
            .collect();
        Self::from_registrations(registrations, config)
    }

    fn from_registrations(registrations: HashMap<UpstreamKind, Registration>, config: OrchestratorConfig) -> Self {
        Self {
            concurrency: Arc::new(Semaphore::new(config.max_concurrent)),
            parallel_concurrency: Arc::new(Semaphore::new(config.max_parallel)),
            stats: OrchestratorStats::default(),
            cancel: CancellationToken::new(),
            registrations,
            config,
        }
    }

    /// Connects every enabled adapter in parallel; failures do not abort
    /// peers.
    pub async fn connect_all(&self) -> HashMap<UpstreamKind, bool> {
        let futures = self.registrations.iter().filter(|(_, r)| r.enabled).map(|(kind, reg)| {
            let kind = *kind;
            let adapter = reg.adapter.clone();
            async move { (kind, adapter.connect().await.is_ok()) }
        });
        futures::future::join_all(futures).await.into_iter().collect()
    }

    /// Routes and executes one tool call, applying timeout, breaker, and
    /// retry policy.
    pub async fn call_tool(&self, call: ToolCall) -> GatewayResult<ToolPayload> {
        let registration = match self.registrations.get(&call.upstream) {
            Some(r) if r.enabled => r,
            _ => return Err(GatewayError::not_configured(call.upstream.as_str())),
        };

        let effective_timeout = call
            .timeout_override_secs
            .map(Duration::from_secs)
            .map(|override_dur| override_dur.min(self.config.default_tool_timeout()))
            .unwrap_or_else(|| self.config.default_tool_timeout());
        let deadline = Instant::now() + effective_timeout;

        let mut attempt: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(GatewayError::cancelled("orchestrator is shutting down"));
            }

            let permit = tokio::select! {
                permit = self.acquire_permit(deadline) => permit?,
                _ = self.cancel.cancelled() => return Err(GatewayError::cancelled("orchestrator is shutting down")),
            };

            let adapter = registration.adapter.clone();
            let tool_name = call.tool_name.clone();
            let params = call.params.clone();
            let start = Instant::now();

            let outcome = tokio::select! {
                res = registration.breaker.execute(|| adapter.call_tool(&tool_name, params, deadline)) => res,
                _ = self.cancel.cancelled() => Err(GatewayError::cancelled("orchestrator is shutting down")),
            };
            drop(permit);
            self.stats.record_call(call.upstream);

            match outcome {
                Ok(value) => {
                    return Ok(ToolPayload {
                        upstream: call.upstream,
                        tool_name: call.tool_name,
                        value,
                        latency_ms: start.elapsed().as_millis() as u64,
                    });
                }
                Err(err) => {
                    attempt += 1;
                    let retryable = err.kind.is_retryable();
                    if retryable && attempt <= self.config.max_retries {
                        if self.config.auto_reconnect && err.kind == ErrorKind::Transport {
                            debug!(upstream = %call.upstream, "auto-reconnecting before retry");
                            let _ = adapter.connect().await;
                        }
                        let backoff = self.config.retry_base_delay() * 2u32.pow(attempt.saturating_sub(1));
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if remaining.is_zero() {
                            return Err(GatewayError::timeout(format!(
                                "deadline elapsed before retry {attempt} of {}",
                                self.config.max_retries
                            )));
                        }
                        tokio::time::sleep(backoff.min(remaining)).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn acquire_permit(&self, deadline: Instant) -> GatewayResult<tokio::sync::OwnedSemaphorePermit> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(GatewayError::timeout("deadline elapsed waiting for a concurrency permit"));
        }
        match tokio::time::timeout(remaining, self.concurrency.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(GatewayError::cancelled("concurrency semaphore closed")),
            Err(_) => Err(GatewayError::timeout("deadline elapsed waiting for a concurrency permit")),
        }
    }

    /// Executes every call concurrently under its own breaker/timeout,
    /// returning results in input order regardless of completion order.
    pub async fn call_tools_parallel(
        self: &Arc<Self>,
        calls: Vec<ToolCall>,
        options: ParallelOptions,
    ) -> GatewayResult<Vec<GatewayResult<ToolPayload>>> {
        let total = calls.len();
        let done = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let (cancel_tx, _) = watch::channel(false);
        let cancel_on_critical = options.cancel_on_critical;

        let handles: Vec<_> = calls
            .into_iter()
            .map(|call| {
                let this = Arc::clone(self);
                let sema = self.parallel_concurrency.clone();
                let mut cancel_rx = cancel_tx.subscribe();
                let cancel_tx = cancel_tx.clone();
                let is_critical = call.critical;
                let done = done.clone();
                let progress = options.progress.clone();

                tokio::spawn(async move {
                    let _permit = sema.acquire_owned().await.ok();
                    let result = tokio::select! {
                        res = this.call_tool(call) => res,
                        _ = cancel_rx.changed(), if cancel_on_critical && !is_critical => {
                            Err(GatewayError::cancelled("batch cancelled after a critical call completed"))
                        }
                    };
                    if cancel_on_critical && is_critical && result.is_err() {
                        let _ = cancel_tx.send(true);
                    }
                    let completed = done.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                    if let Some(progress) = progress {
                        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| progress(completed, total))).is_err() {
                            warn!("progress callback panicked during parallel fan-out");
                        }
                    }
                    result
                })
            })
            .collect();

        let deadline_duration = options.overall_timeout.unwrap_or_else(|| self.config.default_tool_timeout() * 2);

        if options.return_partial {
            let wrapped = handles.into_iter().map(|handle| async move {
                match tokio::time::timeout(deadline_duration, handle).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_join_err)) => Err(GatewayError::cancelled("parallel task failed to join")),
                    Err(_) => Err(GatewayError::timeout("parallel fan-out deadline elapsed for this call")),
                }
            });
            Ok(futures::future::join_all(wrapped).await)
        } else {
            match tokio::time::timeout(deadline_duration, futures::future::join_all(handles)).await {
                Ok(results) => Ok(results
                    .into_iter()
                    .map(|r| r.unwrap_or_else(|_| Err(GatewayError::cancelled("parallel task failed to join"))))
                    .collect()),
                Err(_) => Err(GatewayError::timeout("parallel fan-out deadline elapsed for the whole batch")),
            }
        }
    }

    /// Stops accepting new work and, if `graceful`, waits up to `deadline`
    /// for in-flight calls to settle before disconnecting adapters.
    pub async fn shutdown(&self, graceful: bool, deadline: Duration) {
        info!(graceful, ?deadline, "orchestrator shutting down");
        if graceful {
            let waited = Instant::now();
            while self.concurrency.available_permits() < self.config.max_concurrent
                && waited.elapsed() < deadline
            {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        }
        self.cancel.cancel();
        for registration in self.registrations.values() {
            registration.adapter.disconnect().await;
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn breaker_snapshot(&self, kind: UpstreamKind) -> Option<copilot_core::CircuitBreakerSnapshot> {
        let registration = self.registrations.get(&kind)?;
        Some(registration.breaker.snapshot().await)
    }

    pub async fn all_breaker_snapshots(&self) -> HashMap<String, copilot_core::CircuitBreakerSnapshot> {
        let mut snapshots = HashMap::new();
        for (kind, registration) in &self.registrations {
            snapshots.insert(kind.as_str().to_string(), registration.breaker.snapshot().await);
        }
        snapshots
    }

    pub fn stats(&self) -> &OrchestratorStats {
        &self.stats
    }

    pub async fn stats_snapshot(&self) -> OrchestratorStatsSnapshot {
        let mut transitions = HashMap::new();
        for (kind, registration) in &self.registrations {
            transitions.insert(kind.as_str().to_string(), registration.breaker.transition_count());
        }
        self.stats.snapshot(transitions)
    }

    pub async fn health_check(&self, kind: UpstreamKind) -> GatewayResult<bool> {
        self.stats.record_health_check();
        let registration = self
            .registrations
            .get(&kind)
            .ok_or_else(|| GatewayError::not_configured(kind.as_str()))?;
        registration.adapter.health().await
    }

    pub fn registered_upstreams(&self) -> Vec<UpstreamKind> {
        self.registrations.keys().copied().collect()
    }
}
