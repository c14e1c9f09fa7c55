//! Monitoring Loop: periodic polling of the Download queue and
//! history plus the two managers' wanted/missing lists, failure detection,
//! pattern aggregation, and per-upstream degradation tracking.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use copilot_core::domain::topics;
use copilot_core::{
    DownloadItem, DownloadStatus, EventBus, EventDraft, FailedDownload, FailurePattern, FailureReason,
    MonitoringConfig, ToolCall, UpstreamKind,
};
use copilot_orchestrator::{Orchestrator, ParallelOptions};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Default)]
struct PollHealth {
    consecutive_failures: u32,
    degraded: bool,
}

/// The polled upstream kinds: MediaLibrary is not part of this loop.
const POLLED: [UpstreamKind; 3] = [UpstreamKind::Download, UpstreamKind::TvManager, UpstreamKind::MovieManager];

pub struct MonitoringLoop {
    orchestrator: Arc<Orchestrator>,
    bus: Arc<EventBus>,
    config: MonitoringConfig,
    in_flight: HashMap<UpstreamKind, AtomicBool>,
    health: Mutex<HashMap<UpstreamKind, PollHealth>>,
    seen_failures: Mutex<HashMap<String, Instant>>,
    recent_failures: Mutex<VecDeque<(Instant, FailureReason, String)>>,
    pattern_notified: Mutex<HashMap<FailureReason, usize>>,
}

impl MonitoringLoop {
    pub fn new(orchestrator: Arc<Orchestrator>, bus: Arc<EventBus>, config: MonitoringConfig) -> Arc<Self> {
        let in_flight = POLLED.iter().map(|kind| (*kind, AtomicBool::new(false))).collect();
        Arc::new(Self {
            orchestrator,
            bus,
            config,
            in_flight,
            health: Mutex::new(HashMap::new()),
            seen_failures: Mutex::new(HashMap::new()),
            recent_failures: Mutex::new(VecDeque::new()),
            pattern_notified: Mutex::new(HashMap::new()),
        })
    }

    /// Runs until `cancel` fires; exits at the next poll-interval yield
    /// rather than mid-interval (replacing a naive `while true: sleep(...)` poll loop).
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("monitoring loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.clone().poll_once().await;
                }
            }
        }
    }

    pub async fn poll_once(self: Arc<Self>) {
        let download = self.clone();
        let tv = self.clone();
        let movie = self.clone();
        tokio::join!(
            download.poll_download(),
            tv.poll_wanted(UpstreamKind::TvManager),
            movie.poll_wanted(UpstreamKind::MovieManager),
        );
    }

    async fn poll_download(self: Arc<Self>) {
        let guard = &self.in_flight[&UpstreamKind::Download];
        if guard.swap(true, Ordering::AcqRel) {
            debug!("download poll already in flight, skipping this tick");
            return;
        }

        let calls =
            vec![ToolCall::new(UpstreamKind::Download, "getQueue"), ToolCall::new(UpstreamKind::Download, "getHistory")];
        let outcome = self.orchestrator.call_tools_parallel(calls, ParallelOptions::default()).await;
        guard.store(false, Ordering::Release);

        let results = match outcome {
            Ok(results) => results,
            Err(err) => {
                warn!(error = %err.message, "download poll batch did not complete before its deadline");
                self.record_poll_failure(UpstreamKind::Download).await;
                return;
            }
        };

        if results[0].is_ok() || results[1].is_ok() {
            self.record_poll_success(UpstreamKind::Download).await;
        } else {
            self.record_poll_failure(UpstreamKind::Download).await;
        }

        if let Ok(queue) = &results[0] {
            let items = normalize_queue(&queue.value);
            self.bus
                .emit(EventDraft::new(topics::QUEUE_UPDATED, "monitoring", serde_json::json!({ "items": items })))
                .await;
        } else if let Err(err) = &results[0] {
            warn!(error = %err.message, "getQueue poll failed");
        }

        if let Ok(history) = &results[1] {
            if self.config.failure_detection_enabled {
                self.handle_history(&history.value).await;
            }
        } else if let Err(err) = &results[1] {
            warn!(error = %err.message, "getHistory poll failed");
        }
    }

    async fn poll_wanted(self: Arc<Self>, kind: UpstreamKind) {
        let guard = &self.in_flight[&kind];
        if guard.swap(true, Ordering::AcqRel) {
            debug!(upstream = %kind, "wanted/missing poll already in flight, skipping this tick");
            return;
        }

        let result = self.orchestrator.call_tool(ToolCall::new(kind, "getWantedMissing")).await;
        guard.store(false, Ordering::Release);

        match result {
            Ok(payload) => {
                self.record_poll_success(kind).await;
                self.bus
                    .emit(EventDraft::new(
                        topics::WANTED_UPDATED,
                        "monitoring",
                        serde_json::json!({ "upstream": kind.as_str(), "items": payload.value }),
                    ))
                    .await;
            }
            Err(err) => {
                warn!(upstream = %kind, error = %err.message, "wanted/missing poll failed");
                self.record_poll_failure(kind).await;
            }
        }
    }

    async fn handle_history(self: &Arc<Self>, history_value: &Value) {
        let now_unix = chrono::Utc::now().timestamp();
        for failed in extract_failed(history_value, now_unix) {
            if self.is_throttled(&failed.id).await {
                continue;
            }
            self.mark_seen(&failed.id).await;

            let reason = failed.classified_reason;
            let id = failed.id.clone();
            self.bus
                .emit(EventDraft::new(
                    topics::DOWNLOAD_FAILED,
                    "monitoring",
                    serde_json::to_value(&failed).unwrap_or(Value::Null),
                ))
                .await;

            if self.config.pattern_recognition_enabled {
                self.track_pattern(reason, id, now_unix).await;
            }
        }
    }

    async fn is_throttled(&self, id: &str) -> bool {
        let seen = self.seen_failures.lock().await;
        seen.get(id).map(|last| last.elapsed() < self.config.alert_throttle_window()).unwrap_or(false)
    }

    async fn mark_seen(&self, id: &str) {
        self.seen_failures.lock().await.insert(id.to_string(), Instant::now());
    }

    /// Aggregates classifications over `patternWindow`; emits at most once
    /// per growth in the matching count (no repeat spam every poll tick).
    async fn track_pattern(self: &Arc<Self>, reason: FailureReason, id: String, now_unix: i64) {
        let count;
        let representative_ids;
        {
            let mut recent = self.recent_failures.lock().await;
            let window = self.config.pattern_window();
            recent.push_back((Instant::now(), reason, id));
            while let Some((ts, _, _)) = recent.front() {
                if ts.elapsed() > window {
                    recent.pop_front();
                } else {
                    break;
                }
            }

            let matching: Vec<&(Instant, FailureReason, String)> = recent.iter().filter(|(_, r, _)| *r == reason).collect();
            count = matching.len();
            representative_ids = matching.iter().rev().take(5).map(|(_, _, id)| id.clone()).collect::<Vec<_>>();
        }

        if count < self.config.pattern_threshold {
            return;
        }

        {
            let mut notified = self.pattern_notified.lock().await;
            let last_notified = notified.get(&reason).copied().unwrap_or(0);
            if count <= last_notified {
                return;
            }
            notified.insert(reason, count);
        }

        let pattern = FailurePattern { reason, count, representative_ids, first_seen_unix: now_unix };
        self.bus
            .emit(EventDraft::new(
                topics::FAILURE_PATTERN_DETECTED,
                "monitoring",
                serde_json::to_value(&pattern).unwrap_or(Value::Null),
            ))
            .await;
    }

    async fn record_poll_success(&self, kind: UpstreamKind) {
        let mut health = self.health.lock().await;
        let entry = health.entry(kind).or_default();
        let was_degraded = entry.degraded;
        entry.consecutive_failures = 0;
        entry.degraded = false;
        drop(health);

        if was_degraded {
            self.bus
                .emit(EventDraft::new(
                    topics::MONITORING_RECOVERED,
                    "monitoring",
                    serde_json::json!({ "upstream": kind.as_str() }),
                ))
                .await;
        }
    }

    async fn record_poll_failure(&self, kind: UpstreamKind) {
        let crossed;
        {
            let mut health = self.health.lock().await;
            let entry = health.entry(kind).or_default();
            entry.consecutive_failures += 1;
            crossed = entry.consecutive_failures >= self.config.consecutive_poll_failure_threshold && !entry.degraded;
            if crossed {
                entry.degraded = true;
            }
        }

        if crossed {
            self.bus
                .emit(EventDraft::new(
                    topics::MONITORING_DEGRADED,
                    "monitoring",
                    serde_json::json!({ "upstream": kind.as_str() }),
                ))
                .await;
        }
    }
}

fn parse_status(raw: &str) -> DownloadStatus {
    match raw.to_ascii_lowercase().as_str() {
        "queued" => DownloadStatus::Queued,
        "downloading" => DownloadStatus::Downloading,
        "verifying" => DownloadStatus::Verifying,
        "extracting" => DownloadStatus::Extracting,
        "completed" => DownloadStatus::Completed,
        "failed" => DownloadStatus::Failed,
        "paused" => DownloadStatus::Paused,
        _ => DownloadStatus::Queued,
    }
}

fn parse_mb_to_bytes(raw: Option<&str>) -> u64 {
    raw.and_then(|s| s.parse::<f64>().ok()).map(|mb| (mb * 1_000_000.0) as u64).unwrap_or(0)
}

fn normalize_queue(value: &Value) -> Vec<DownloadItem> {
    value
        .get("slots")
        .and_then(Value::as_array)
        .map(|slots| {
            slots
                .iter()
                .filter_map(|slot| {
                    let id = slot.get("id")?.as_str()?.to_string();
                    let name = slot.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                    let status =
                        slot.get("status").and_then(Value::as_str).map(parse_status).unwrap_or(DownloadStatus::Queued);
                    let progress_pct =
                        slot.get("percentage").and_then(Value::as_str).and_then(|s| s.parse::<f32>().ok()).unwrap_or(0.0);
                    let size_bytes = parse_mb_to_bytes(slot.get("mb").and_then(Value::as_str));
                    let remaining_bytes = parse_mb_to_bytes(slot.get("mbleft").and_then(Value::as_str));
                    let category = slot.get("category").and_then(Value::as_str).map(str::to_string);
                    Some(DownloadItem {
                        id,
                        name,
                        status,
                        progress_pct,
                        size_bytes,
                        remaining_bytes,
                        eta_seconds: None,
                        category,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn extract_failed(value: &Value, now_unix: i64) -> Vec<FailedDownload> {
    value
        .get("slots")
        .and_then(Value::as_array)
        .map(|slots| {
            slots
                .iter()
                .filter_map(|slot| {
                    let status = slot.get("status").and_then(Value::as_str)?;
                    if !status.eq_ignore_ascii_case("failed") {
                        return None;
                    }
                    let id = slot.get("id")?.as_str()?.to_string();
                    let name = slot.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                    let failure_message = slot.get("fail_message").and_then(Value::as_str).unwrap_or_default().to_string();
                    let category = slot.get("category").and_then(Value::as_str).map(str::to_string);
                    let classified_reason = FailureReason::classify(&failure_message);
                    Some(FailedDownload {
                        id,
                        name,
                        failure_message,
                        category,
                        completed_at_unix: now_unix,
                        detected_at_unix: now_unix,
                        classified_reason,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_queue_slot_fields() {
        let value = serde_json::json!({
            "slots": [{"id": "a", "name": "X", "status": "Downloading", "percentage": "50", "mb": "1000", "mbleft": "500"}],
        });
        let items = normalize_queue(&value);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, DownloadStatus::Downloading);
        assert_eq!(items[0].progress_pct, 50.0);
        assert_eq!(items[0].size_bytes, 1_000_000_000);
    }

    #[test]
    fn extracts_only_failed_slots_and_classifies_them() {
        let value = serde_json::json!({
            "slots": [
                {"id": "nzo_1", "name": "Breaking.Bad.S05E14.2160p", "status": "Failed", "fail_message": "CRC error"},
                {"id": "nzo_2", "name": "Y", "status": "Completed"},
            ],
        });
        let failed = extract_failed(&value, 1_700_000_000);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "nzo_1");
        assert_eq!(failed[0].classified_reason, FailureReason::Quality);
    }
}
