//! The data model shared across every component boundary.
//!
//! These are the shapes that cross from Adapters into the Orchestrator, and
//! from the Monitoring Loop into the Event Bus. None of them carry any
//! upstream-specific wire format — translation from upstream JSON/XML into
//! these types is an Adapter's job (`copilot-adapters`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::UpstreamKind;

/// A single tool invocation routed through the Orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub upstream: UpstreamKind,
    pub tool_name: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub timeout_override_secs: Option<u64>,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    /// Annotates this call as critical for `cancelOnCritical` fan-out
    /// semantics (callers opt in explicitly, no
    /// string-sniffing of error messages).
    #[serde(default)]
    pub critical: bool,
}

impl ToolCall {
    pub fn new(upstream: UpstreamKind, tool_name: impl Into<String>) -> Self {
        Self {
            upstream,
            tool_name: tool_name.into(),
            params: serde_json::Value::Null,
            timeout_override_secs: None,
            correlation_id: None,
            critical: false,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// The payload half of a successful `ToolResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPayload {
    pub upstream: UpstreamKind,
    pub tool_name: String,
    pub value: serde_json::Value,
    pub latency_ms: u64,
}

/// Download queue slot status, normalized from whatever vocabulary the
/// upstream download daemon uses on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Verifying,
    Extracting,
    Completed,
    Failed,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadItem {
    pub id: String,
    pub name: String,
    pub status: DownloadStatus,
    pub progress_pct: f32,
    pub size_bytes: u64,
    pub remaining_bytes: u64,
    pub eta_seconds: Option<u64>,
    pub category: Option<String>,
}

/// Why a detected failure was classified the way it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Network,
    Quality,
    DiskSpace,
    Authentication,
    Unknown,
}

impl FailureReason {
    /// Matches a raw failure message against the prioritized pattern list.
    /// Order matters: the first matching pattern wins.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        let contains_any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if contains_any(&["crc", "par2", "verif"]) {
            FailureReason::Quality
        } else if contains_any(&["disk", "space", "full"]) {
            FailureReason::DiskSpace
        } else if contains_any(&["timeout", "connection", "reset", "network"]) {
            FailureReason::Network
        } else if contains_any(&["auth", "unauthorized", "forbidden"]) {
            FailureReason::Authentication
        } else {
            FailureReason::Unknown
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedDownload {
    pub id: String,
    pub name: String,
    pub failure_message: String,
    pub category: Option<String>,
    pub completed_at_unix: i64,
    pub detected_at_unix: i64,
    pub classified_reason: FailureReason,
}

/// An aggregation of failures sharing a reason within the pattern window,
/// used to decide whether a burst of similar failures warrants a single
/// aggregated alert rather than one per failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePattern {
    pub reason: FailureReason,
    pub count: usize,
    pub representative_ids: Vec<String>,
    pub first_seen_unix: i64,
}

/// One of the four strategies the Recovery Loop's ladder can choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    Immediate,
    Backoff,
    QualityFallback,
    AlternativeSearch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOutcome {
    Pending,
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub download_id: String,
    pub strategy: RetryStrategy,
    /// 1-based; strictly increasing per `download_id`.
    pub attempt_number: u32,
    pub scheduled_at_unix: i64,
    pub outcome: RetryOutcome,
    pub quality_downgrades: u32,
}

impl RetryAttempt {
    pub fn first(download_id: impl Into<String>, strategy: RetryStrategy, now_unix: i64) -> Self {
        Self {
            download_id: download_id.into(),
            strategy,
            attempt_number: 1,
            scheduled_at_unix: now_unix,
            outcome: RetryOutcome::Pending,
            quality_downgrades: 0,
        }
    }
}

/// Immutable snapshot of a `CircuitBreaker`'s state (for health endpoints).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub upstream: UpstreamKind,
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub consecutive_half_open_successes: usize,
    pub last_failure_unix: Option<i64>,
}

/// Overall reachability rollup for the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamHealth {
    pub upstream: UpstreamKind,
    pub reachable: bool,
    pub latency_ms: Option<u64>,
    pub breaker: CircuitBreakerSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayHealth {
    pub status: HealthStatus,
    pub upstreams: HashMap<String, UpstreamHealth>,
}

/// Core event topic identifiers. Kept as `&'static str` rather than an
/// enum because the Event Bus and WebSocket Bridge treat topics as opaque
/// dotted strings with wildcard matching (`config.*`); the fixed set below
/// is just the vocabulary this core itself emits.
pub mod topics {
    pub const DOWNLOAD_FAILED: &str = "download.failed";
    pub const DOWNLOAD_RETRY_STARTED: &str = "download.retry.started";
    pub const DOWNLOAD_RETRY_SUCCEEDED: &str = "download.retry.succeeded";
    pub const DOWNLOAD_RETRY_FAILED: &str = "download.retry.failed";
    pub const RECOVERY_EXHAUSTED: &str = "recovery.exhausted";
    pub const RECOVERY_UNRESOLVED: &str = "recovery.unresolved";
    pub const QUEUE_UPDATED: &str = "queue.updated";
    pub const WANTED_UPDATED: &str = "wanted.updated";
    pub const FAILURE_PATTERN_DETECTED: &str = "failure.pattern.detected";
    pub const MONITORING_DEGRADED: &str = "monitoring.degraded";
    pub const MONITORING_RECOVERED: &str = "monitoring.recovered";
    pub const RECOVERY_DEGRADED: &str = "recovery.degraded";
    pub const CONFIG_AUDIT_STARTED: &str = "config.audit.started";
    pub const CONFIG_AUDIT_COMPLETED: &str = "config.audit.completed";
    pub const CONFIG_AUDIT_FAILED: &str = "config.audit.failed";
    pub const CONTENT_REQUEST_CREATED: &str = "content.request.created";
    pub const CONTENT_REQUEST_CLASSIFIED: &str = "content.request.classified";
    pub const CONTENT_REQUEST_ADDED: &str = "content.request.added";
    pub const CONTENT_REQUEST_COMPLETED: &str = "content.request.completed";
    pub const CONTENT_REQUEST_FAILED: &str = "content.request.failed";
    pub const ACTIVITY_CREATED: &str = "activity.created";
    pub const CONNECTION_ESTABLISHED: &str = "connection.established";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_classification_matches_priority_order() {
        assert_eq!(FailureReason::classify("CRC failed, par2 repair needed"), FailureReason::Quality);
        assert_eq!(FailureReason::classify("disk space full"), FailureReason::DiskSpace);
        assert_eq!(FailureReason::classify("connection reset by peer"), FailureReason::Network);
        assert_eq!(FailureReason::classify("401 unauthorized"), FailureReason::Authentication);
        assert_eq!(FailureReason::classify("something else entirely"), FailureReason::Unknown);
    }

    #[test]
    fn retry_attempt_first_is_attempt_one_pending() {
        let attempt = RetryAttempt::first("nzo_1", RetryStrategy::Immediate, 1_000);
        assert_eq!(attempt.attempt_number, 1);
        assert_eq!(attempt.outcome, RetryOutcome::Pending);
    }
}
