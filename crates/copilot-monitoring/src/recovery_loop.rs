//! Recovery Loop: consumes `download.failed`, drives the retry
//! ladder, and runs the quality-fallback/alternative-search chain.
//!
//! `recovery.exhausted` and `recovery.unresolved` are emitted on their own
//! literal topics; the started/succeeded/failed triad for a single
//! retry attempt rides the `download.retry.*` topics already in the core
//! vocabulary rather than a parallel `recovery.retry.*` set.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use copilot_core::domain::topics;
use copilot_core::{Event, EventBus, EventDraft, EventHandler, FailedDownload, FailureReason, RecoveryConfig,
    RetryOutcome, RetryStrategy, ToolCall, UpstreamKind};
use copilot_orchestrator::Orchestrator;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::RetryLedger;
use crate::quality;

pub struct RecoveryLoop {
    orchestrator: Arc<Orchestrator>,
    bus: Arc<EventBus>,
    config: RecoveryConfig,
    ledger: RetryLedger,
}

impl RecoveryLoop {
    pub fn new(orchestrator: Arc<Orchestrator>, bus: Arc<EventBus>, config: RecoveryConfig) -> Arc<Self> {
        Arc::new(Self { orchestrator, bus, config, ledger: RetryLedger::new() })
    }

    /// Registers this loop's handler on the bus. Call once at wiring time.
    pub async fn attach(self: &Arc<Self>) {
        self.bus.subscribe(topics::DOWNLOAD_FAILED, Arc::new(RecoveryHandler(self.clone()))).await;
    }

    pub fn tracked_downloads(&self) -> usize {
        self.ledger.tracked_count()
    }

    async fn handle_failure(self: Arc<Self>, failed: FailedDownload, correlation_id: Uuid) {
        let state_lock = self.ledger.entry(&failed.id);
        let mut state = match state_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!(download_id = %failed.id, "retry already in flight for this download, dropping duplicate failure event");
                return;
            }
        };

        let attempt_number = state.next_attempt_number();
        if attempt_number > self.config.max_retry_attempts {
            drop(state);
            self.bus
                .emit(
                    EventDraft::new(
                        topics::RECOVERY_EXHAUSTED,
                        "recovery",
                        serde_json::json!({ "downloadId": failed.id, "attemptNumber": attempt_number }),
                    )
                    .with_correlation(correlation_id),
                )
                .await;
            return;
        }

        let strategy =
            self.choose_strategy(attempt_number, failed.classified_reason, state.quality_downgrades, &failed.name);
        if strategy == RetryStrategy::QualityFallback {
            state.quality_downgrades += 1;
        }

        let now_unix = chrono::Utc::now().timestamp();
        state.push_attempt(strategy, now_unix);
        drop(state);

        self.bus
            .emit(
                EventDraft::new(
                    topics::DOWNLOAD_RETRY_STARTED,
                    "recovery",
                    serde_json::json!({ "downloadId": failed.id, "strategy": strategy, "attemptNumber": attempt_number }),
                )
                .with_correlation(correlation_id),
            )
            .await;

        self.execute_strategy(failed, correlation_id, strategy, attempt_number).await;
    }

    /// Attempt 1 is `Immediate`, attempt 2 is `Backoff`, attempt >= 3 falls
    /// to `QualityFallback` (while under the downgrade ceiling) or
    /// `AlternativeSearch`. Classification can override: `DiskSpace`
    /// suppresses `Immediate`; `Quality` prefers `QualityFallback` starting
    /// at attempt 1.
    fn choose_strategy(&self, attempt_number: u32, reason: FailureReason, quality_downgrades: u32, name: &str) -> RetryStrategy {
        let quality_fallback_available = self.config.quality_fallback_enabled
            && quality_downgrades < self.config.max_quality_downgrades
            && quality::current_quality(name).is_some();

        if reason == FailureReason::Quality && quality_fallback_available {
            return RetryStrategy::QualityFallback;
        }

        match attempt_number {
            1 if reason == FailureReason::DiskSpace => {
                if self.config.backoff_enabled {
                    RetryStrategy::Backoff
                } else {
                    RetryStrategy::AlternativeSearch
                }
            }
            1 if self.config.immediate_retry_enabled => RetryStrategy::Immediate,
            2 if self.config.backoff_enabled => RetryStrategy::Backoff,
            _ if quality_fallback_available => RetryStrategy::QualityFallback,
            _ => RetryStrategy::AlternativeSearch,
        }
    }

    fn backoff_delay(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(2) as i32;
        let secs = self.config.backoff_base_secs as f64 * self.config.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.config.backoff_max_secs as f64))
    }

    async fn execute_strategy(
        self: Arc<Self>,
        failed: FailedDownload,
        correlation_id: Uuid,
        strategy: RetryStrategy,
        attempt_number: u32,
    ) {
        match strategy {
            RetryStrategy::Immediate | RetryStrategy::Backoff => {
                if strategy == RetryStrategy::Backoff {
                    tokio::time::sleep(self.backoff_delay(attempt_number)).await;
                }

                let call = ToolCall::new(UpstreamKind::Download, "retryDownload")
                    .with_params(serde_json::json!({ "id": failed.id }));
                match self.orchestrator.call_tool(call).await {
                    Ok(_) => self.schedule_result_check(failed.id, correlation_id),
                    Err(err) => {
                        warn!(download_id = %failed.id, error = %err.message, "retryDownload call failed");
                        self.emit_retry_result(&failed.id, correlation_id, RetryOutcome::Failure).await;
                    }
                }
            }
            RetryStrategy::QualityFallback | RetryStrategy::AlternativeSearch => {
                self.execute_search_strategy(failed, correlation_id, strategy).await;
            }
        }
    }

    /// Schedules a deferred result check: after `resultDeadline`, looks at
    /// the Download upstream's history for this id to decide success vs.
    /// failure.
    fn schedule_result_check(self: &Arc<Self>, download_id: String, correlation_id: Uuid) {
        let this = Arc::clone(self);
        let deadline = self.config.result_deadline();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;

            let still_failed = this
                .orchestrator
                .call_tool(ToolCall::new(UpstreamKind::Download, "getHistory"))
                .await
                .ok()
                .map(|payload| slot_is_failed(&payload.value, &download_id))
                .unwrap_or(true);

            let outcome = if still_failed { RetryOutcome::Failure } else { RetryOutcome::Success };
            this.record_outcome(&download_id, outcome).await;
            this.emit_retry_result(&download_id, correlation_id, outcome).await;
        });
    }

    async fn record_outcome(&self, download_id: &str, outcome: RetryOutcome) {
        let state_lock = self.ledger.entry(download_id);
        let mut state = state_lock.lock().await;
        state.set_last_outcome(outcome);
    }

    async fn emit_retry_result(&self, download_id: &str, correlation_id: Uuid, outcome: RetryOutcome) {
        let topic = match outcome {
            RetryOutcome::Success => topics::DOWNLOAD_RETRY_SUCCEEDED,
            _ => topics::DOWNLOAD_RETRY_FAILED,
        };
        self.bus
            .emit(
                EventDraft::new(topic, "recovery", serde_json::json!({ "downloadId": download_id }))
                    .with_correlation(correlation_id),
            )
            .await;
    }

    async fn execute_search_strategy(self: Arc<Self>, failed: FailedDownload, correlation_id: Uuid, strategy: RetryStrategy) {
        let manager = if quality::is_tv(&failed.name) { UpstreamKind::TvManager } else { UpstreamKind::MovieManager };

        let lookup = self
            .orchestrator
            .call_tool(
                ToolCall::new(manager, "search")
                    .with_params(serde_json::json!({ "term": quality::title_without_quality(&failed.name) })),
            )
            .await;

        let item_id = match lookup {
            Ok(payload) => first_item_id(&payload.value).unwrap_or_else(|| failed.id.clone()),
            Err(_) => failed.id.clone(),
        };

        let mut params = serde_json::json!({ "id": item_id });
        if strategy == RetryStrategy::QualityFallback {
            if let Some(next_tier) = quality::current_quality(&failed.name).and_then(quality::next_lower_tier) {
                params["quality"] = Value::String(next_tier.to_string());
            }
        }

        let search_call = ToolCall::new(manager, "searchItem").with_params(params);
        if self.orchestrator.call_tool(search_call).await.is_err() {
            self.bus
                .emit(
                    EventDraft::new(
                        topics::RECOVERY_UNRESOLVED,
                        "recovery",
                        serde_json::json!({ "downloadId": failed.id }),
                    )
                    .with_correlation(correlation_id),
                )
                .await;
        }
    }
}

fn slot_is_failed(history_value: &Value, download_id: &str) -> bool {
    history_value
        .get("slots")
        .and_then(Value::as_array)
        .map(|slots| {
            slots.iter().any(|slot| {
                slot.get("id").and_then(Value::as_str) == Some(download_id)
                    && slot.get("status").and_then(Value::as_str).map(|s| s.eq_ignore_ascii_case("failed")).unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

fn first_item_id(value: &Value) -> Option<String> {
    value
        .get("items")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(|item| item.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

struct RecoveryHandler(Arc<RecoveryLoop>);

#[async_trait]
impl EventHandler for RecoveryHandler {
    async fn handle(&self, event: Event) -> Result<(), String> {
        let failed: FailedDownload =
            serde_json::from_value(event.payload.clone()).map_err(|err| format!("malformed download.failed payload: {err}"))?;
        let recovery = self.0.clone();
        let correlation_id = event.correlation_id;
        tokio::spawn(async move {
            recovery.handle_failure(failed, correlation_id).await;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RecoveryConfig {
        RecoveryConfig {
            max_retry_attempts: 3,
            immediate_retry_enabled: true,
            backoff_enabled: true,
            quality_fallback_enabled: true,
            backoff_base_secs: 1,
            backoff_multiplier: 2.0,
            backoff_max_secs: 60,
            result_deadline_secs: 1,
            max_quality_downgrades: 2,
        }
    }

    fn loop_for_test() -> RecoveryLoop {
        let orchestrator = Arc::new(Orchestrator::from_adapters(vec![], copilot_core::OrchestratorConfig::default()));
        let bus = Arc::new(EventBus::with_defaults());
        RecoveryLoop { orchestrator, bus, config: config(), ledger: RetryLedger::new() }
    }

    #[test]
    fn attempt_one_is_immediate_by_default() {
        let recovery = loop_for_test();
        let strategy = recovery.choose_strategy(1, FailureReason::Network, 0, "Some.Show.S01E01.1080p");
        assert_eq!(strategy, RetryStrategy::Immediate);
    }

    #[test]
    fn attempt_two_is_backoff() {
        let recovery = loop_for_test();
        let strategy = recovery.choose_strategy(2, FailureReason::Network, 0, "Some.Show.S01E01.1080p");
        assert_eq!(strategy, RetryStrategy::Backoff);
    }

    #[test]
    fn quality_classification_prefers_quality_fallback_from_attempt_one() {
        let recovery = loop_for_test();
        let strategy = recovery.choose_strategy(1, FailureReason::Quality, 0, "Breaking.Bad.S05E14.2160p");
        assert_eq!(strategy, RetryStrategy::QualityFallback);
    }

    #[test]
    fn disk_space_suppresses_immediate_on_attempt_one() {
        let recovery = loop_for_test();
        let strategy = recovery.choose_strategy(1, FailureReason::DiskSpace, 0, "Some.Movie.2021.1080p");
        assert_eq!(strategy, RetryStrategy::Backoff);
    }

    #[test]
    fn quality_fallback_falls_through_to_alternative_search_past_the_ceiling() {
        let recovery = loop_for_test();
        let strategy = recovery.choose_strategy(3, FailureReason::Network, 2, "Breaking.Bad.S05E14.2160p");
        assert_eq!(strategy, RetryStrategy::AlternativeSearch);
    }
}
