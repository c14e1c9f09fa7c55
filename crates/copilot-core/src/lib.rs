pub mod config;
pub mod domain;
pub mod error;
pub mod events;

pub use config::{
    ActivityLogConfig, EventBusSettings, GatewayConfig, MonitoringConfig, OrchestratorConfig,
    RecoveryConfig, ServerConfig, TelemetryConfig, UpstreamConfig, UpstreamKind,
};
pub use domain::{
    topics, CircuitBreakerSnapshot, CircuitState, DownloadItem, DownloadStatus, FailedDownload,
    FailureReason, FailurePattern, GatewayHealth, HealthStatus, RetryAttempt, RetryOutcome,
    RetryStrategy, ToolCall, ToolPayload, UpstreamHealth,
};
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use events::{Event, EventBus, EventBusConfig, EventBusStats, EventDraft, EventHandler};
