//! S5: a quality-classified download failure detected by the Monitoring
//! Loop drives the Recovery Loop's QualityFallback strategy, which
//! re-searches TvManager at the next quality tier down. Every event along
//! the chain shares one correlation id.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use copilot_adapters::{FakeAdapter, UpstreamAdapter};
use copilot_core::domain::topics;
use copilot_core::{EventBus, GatewayResult, MonitoringConfig, OrchestratorConfig, RecoveryConfig, UpstreamKind};
use copilot_monitoring::{MonitoringLoop, RecoveryLoop};
use copilot_orchestrator::Orchestrator;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

fn orchestrator_config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_concurrent: 10,
        default_tool_timeout_secs: 5,
        max_retries: 0,
        auto_reconnect: true,
        keepalive_interval_secs: 30,
        max_parallel: 10,
        parallel_timeout_secs: None,
        cancel_on_critical: false,
        breaker_failure_threshold: 5,
        breaker_open_duration_secs: 60,
        breaker_half_open_required: 3,
        retry_base_delay_ms: 1,
    }
}

/// Records every `(tool_name, params)` pair it's called with. `FakeAdapter`
/// only counts calls, which isn't enough here: S5 hinges on the exact
/// `quality` parameter the Recovery Loop sends to `searchItem`.
struct RecordingAdapter {
    kind: UpstreamKind,
    calls: AsyncMutex<Vec<(String, Value)>>,
}

impl RecordingAdapter {
    fn new(kind: UpstreamKind) -> Self {
        Self { kind, calls: AsyncMutex::new(Vec::new()) }
    }

    async fn calls_to(&self, tool_name: &str) -> Vec<Value> {
        self.calls.lock().await.iter().filter(|(name, _)| name == tool_name).map(|(_, params)| params.clone()).collect()
    }
}

#[async_trait]
impl UpstreamAdapter for RecordingAdapter {
    fn kind(&self) -> UpstreamKind {
        self.kind
    }

    async fn connect(&self) -> GatewayResult<()> {
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn health(&self) -> GatewayResult<bool> {
        Ok(true)
    }

    async fn list_tools(&self) -> GatewayResult<Vec<String>> {
        Ok(vec!["search".to_string(), "searchItem".to_string()])
    }

    async fn call_tool(&self, tool_name: &str, params: Value, _deadline: Instant) -> GatewayResult<Value> {
        self.calls.lock().await.push((tool_name.to_string(), params));
        match tool_name {
            "search" => Ok(serde_json::json!({ "items": [{ "id": "tvdb_breaking_bad_s05e14" }] })),
            _ => Ok(Value::Object(Default::default())),
        }
    }
}

/// Polls the recorder until `tool_name` has been called at least once or
/// `timeout` elapses. The Recovery Loop's handler runs in a detached
/// `tokio::spawn`, so nothing synchronously guarantees it has executed by
/// the time `poll_once` returns. The Monitoring Loop's own wanted/missing
/// poll also calls TvManager concurrently, so this waits on a specific tool
/// rather than a raw call count.
async fn wait_for_call(adapter: &RecordingAdapter, tool_name: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !adapter.calls_to(tool_name).await.is_empty() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn s5_quality_failure_drives_quality_fallback_against_tv_manager_with_shared_correlation_id() {
    let download = Arc::new(FakeAdapter::new(UpstreamKind::Download, &["getQueue", "getHistory"]));
    download.queue_result("getQueue", Ok(serde_json::json!({ "slots": [] })));
    download.queue_result(
        "getHistory",
        Ok(serde_json::json!({
            "slots": [{
                "id": "nzo_s5_1",
                "name": "Breaking.Bad.S05E14.2160p",
                "status": "Failed",
                "fail_message": "CRC failed, par2 repair needed",
            }],
        })),
    );

    let tv = Arc::new(RecordingAdapter::new(UpstreamKind::TvManager));
    let movie = Arc::new(FakeAdapter::new(UpstreamKind::MovieManager, &["getWantedMissing"]));

    let orchestrator = Arc::new(Orchestrator::from_adapters(
        vec![
            (UpstreamKind::Download, download, true),
            (UpstreamKind::TvManager, tv.clone(), true),
            (UpstreamKind::MovieManager, movie, true),
        ],
        orchestrator_config(),
    ));

    let bus = Arc::new(EventBus::with_defaults());
    let monitoring = MonitoringLoop::new(orchestrator.clone(), bus.clone(), MonitoringConfig::default());
    let recovery = RecoveryLoop::new(orchestrator.clone(), bus.clone(), RecoveryConfig::default());
    recovery.attach().await;

    monitoring.poll_once().await;

    let failed_events = bus.history_by_topic(topics::DOWNLOAD_FAILED, None).await;
    assert_eq!(failed_events.len(), 1, "the CRC-tagged failed slot must surface as one download.failed event");
    let failed_event = &failed_events[0];
    assert_eq!(failed_event.payload["id"], "nzo_s5_1");
    assert_eq!(failed_event.payload["classified_reason"], "quality");
    let correlation_id = failed_event.correlation_id;

    let search_item_completed = wait_for_call(&tv, "searchItem", Duration::from_secs(2)).await;
    assert!(search_item_completed, "recovery should have called searchItem on TvManager by now");

    let retry_started = bus.history_by_topic(topics::DOWNLOAD_RETRY_STARTED, None).await;
    assert_eq!(retry_started.len(), 1);
    assert_eq!(retry_started[0].payload["downloadId"], "nzo_s5_1");
    assert_eq!(retry_started[0].payload["strategy"], "quality_fallback");
    assert_eq!(retry_started[0].correlation_id, correlation_id, "retry event must carry the same correlation id as the failure");

    let search_calls = tv.calls_to("search").await;
    assert_eq!(search_calls.len(), 1);
    assert_eq!(search_calls[0]["term"], "Breaking Bad S05E14");

    let search_item_calls = tv.calls_to("searchItem").await;
    assert_eq!(search_item_calls.len(), 1, "QualityFallback must re-search at a lower tier, not just re-queue the same item");
    assert_eq!(search_item_calls[0]["id"], "tvdb_breaking_bad_s05e14");
    assert_eq!(search_item_calls[0]["quality"], "1080p", "2160p must step down exactly one tier to 1080p");

    // No dedicated ActivityLog here: copilot-monitoring cannot depend on
    // copilot-api without a cycle. history_by_correlation gives the same
    // causal-chain guarantee the Activity Log's correlation filter exposes.
    let chain = bus.history_by_correlation(correlation_id).await;
    assert_eq!(chain.len(), 2, "download.failed and download.retry.started must share one correlation id");
    assert_eq!(chain[0].topic, topics::DOWNLOAD_FAILED);
    assert_eq!(chain[1].topic, topics::DOWNLOAD_RETRY_STARTED);
    assert!(chain[0].emitted_at <= chain[1].emitted_at);
}
