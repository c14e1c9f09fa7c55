//! End-to-end orchestrator scenarios: happy path, timeout, breaker trip,
//! and parallel fan-out ordering.

use std::sync::Arc;
use std::time::Duration;

use copilot_adapters::FakeAdapter;
use copilot_core::{ErrorKind, OrchestratorConfig, ToolCall, UpstreamKind};
use copilot_orchestrator::{Orchestrator, ParallelOptions};

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

#[tokio::test]
async fn s1_single_tool_call_happy_path() {
    let adapter = Arc::new(FakeAdapter::new(UpstreamKind::Download, &["getQueue"]));
    adapter.queue_result(
        "getQueue",
        Ok(serde_json::json!({
            "slots": [{"id": "a", "name": "X", "status": "Downloading", "percentage": "50", "mb": "1000", "mbleft": "500"}],
            "speed": "5MB/s",
        })),
    );

    let orchestrator = Arc::new(Orchestrator::from_adapters(
        vec![(UpstreamKind::Download, adapter, true)],
        orchestrator_config(),
    ));

    let result = orchestrator.call_tool(ToolCall::new(UpstreamKind::Download, "getQueue")).await;
    assert!(result.is_ok());
    assert_eq!(orchestrator.stats_snapshot().await.total_calls, 1);
    let snapshot = orchestrator.breaker_snapshot(UpstreamKind::Download).await.unwrap();
    assert_eq!(snapshot.consecutive_failures, 0);
}

#[tokio::test]
async fn s2_timeout_is_not_retried_and_counts_one_failure() {
    let adapter = Arc::new(FakeAdapter::new(UpstreamKind::Download, &["getQueue"]));
    adapter.set_delay(Duration::from_secs(2));

    let orchestrator = Arc::new(Orchestrator::from_adapters(
        vec![(UpstreamKind::Download, adapter.clone(), true)],
        orchestrator_config(),
    ));

    let mut call = ToolCall::new(UpstreamKind::Download, "getQueue");
    call.timeout_override_secs = Some(1);

    let result = orchestrator.call_tool(call).await;
    assert_eq!(result.unwrap_err().kind, ErrorKind::Timeout);
    assert_eq!(adapter.call_count(), 1, "the adapter is invoked once before the deadline cuts it off");
}

#[tokio::test]
async fn s3_breaker_trips_after_five_transport_errors() {
    let adapter = Arc::new(FakeAdapter::new(UpstreamKind::Download, &["getQueue"]));
    adapter.queue_result("getQueue", Err(copilot_core::GatewayError::transport("connection reset")));

    let orchestrator = Arc::new(Orchestrator::from_adapters(
        vec![(UpstreamKind::Download, adapter.clone(), true)],
        orchestrator_config(),
    ));

    for _ in 0..5 {
        let result = orchestrator.call_tool(ToolCall::new(UpstreamKind::Download, "getQueue")).await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::Transport);
    }

    let sixth = orchestrator.call_tool(ToolCall::new(UpstreamKind::Download, "getQueue")).await;
    assert_eq!(sixth.unwrap_err().kind, ErrorKind::BreakerOpen);
    assert_eq!(adapter.call_count(), 5, "the breaker must refuse the 6th call before touching the adapter");
}

#[tokio::test]
async fn s4_parallel_batch_preserves_input_order() {
    let tv = Arc::new(FakeAdapter::new(UpstreamKind::TvManager, &["getItems"]));
    let movie = Arc::new(FakeAdapter::new(UpstreamKind::MovieManager, &["getItems"]));
    let download = Arc::new(FakeAdapter::new(UpstreamKind::Download, &["getQueue"]));

    tv.set_delay(Duration::from_millis(60));
    movie.set_delay(Duration::from_millis(5));
    tv.queue_result("getItems", Ok(serde_json::json!({"source": "tv"})));
    movie.queue_result("getItems", Ok(serde_json::json!({"source": "movie"})));
    download.queue_result("getQueue", Ok(serde_json::json!({"source": "download"})));

    let orchestrator = Arc::new(Orchestrator::from_adapters(
        vec![
            (UpstreamKind::TvManager, tv, true),
            (UpstreamKind::MovieManager, movie, true),
            (UpstreamKind::Download, download, true),
        ],
        orchestrator_config(),
    ));

    let calls = vec![
        ToolCall::new(UpstreamKind::TvManager, "getItems"),
        ToolCall::new(UpstreamKind::MovieManager, "getItems"),
        ToolCall::new(UpstreamKind::Download, "getQueue"),
    ];

    let results = orchestrator
        .call_tools_parallel(calls, ParallelOptions::default())
        .await
        .expect("batch should not hit the overall deadline");

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().value["source"], "tv");
    assert_eq!(results[1].as_ref().unwrap().value["source"], "movie");
    assert_eq!(results[2].as_ref().unwrap().value["source"], "download");
}
