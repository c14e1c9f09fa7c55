//! Typed configuration for every gateway component.
//!
//! Each component owns one `#[derive(Deserialize)]` struct with explicit
//! defaults; `GatewayConfig::from_env` composes them via the `config` crate
//! the same way the rest of this workspace loads configuration. Unknown
//! fields are rejected rather than silently accepted.

use async_trait::async_trait;
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// The four remote services this gateway mediates with. Closed on purpose —
/// adding a fifth upstream kind is a breaking change, not a config value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamKind {
    Download,
    TvManager,
    MovieManager,
    MediaLibrary,
}

impl UpstreamKind {
    pub const ALL: [UpstreamKind; 4] = [
        UpstreamKind::Download,
        UpstreamKind::TvManager,
        UpstreamKind::MovieManager,
        UpstreamKind::MediaLibrary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamKind::Download => "download",
            UpstreamKind::TvManager => "tv_manager",
            UpstreamKind::MovieManager => "movie_manager",
            UpstreamKind::MediaLibrary => "media_library",
        }
    }
}

impl std::fmt::Display for UpstreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for UpstreamKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(UpstreamKind::Download),
            "tv_manager" => Ok(UpstreamKind::TvManager),
            "movie_manager" => Ok(UpstreamKind::MovieManager),
            "media_library" => Ok(UpstreamKind::MediaLibrary),
            other => Err(format!("unknown upstream kind: {other}")),
        }
    }
}

/// Immutable-after-construction configuration for one upstream.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    pub kind: UpstreamKind,
    pub base_url: String,
    pub credential: String,
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_upstream_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl UpstreamConfig {
    pub fn new(kind: UpstreamKind, base_url: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            kind,
            base_url: base_url.into(),
            credential: credential.into(),
            timeout_secs: default_upstream_timeout_secs(),
            max_retries: default_upstream_max_retries(),
            enabled: true,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

fn default_upstream_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

/// Orchestrator-level tunables.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_tool_timeout_secs")]
    pub default_tool_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default)]
    pub parallel_timeout_secs: Option<u64>,
    #[serde(default)]
    pub cancel_on_critical: bool,
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: usize,
    #[serde(default = "default_breaker_open_duration_secs")]
    pub breaker_open_duration_secs: u64,
    #[serde(default = "default_breaker_half_open_required")]
    pub breaker_half_open_required: usize,
    /// Base delay for the Orchestrator's own retry ladder
    /// (`baseDelay * 2^(attempt-1)`); the exponential backoff it drives
    /// has no fixed point to grow from without this.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            default_tool_timeout_secs: default_tool_timeout_secs(),
            max_retries: default_max_retries(),
            auto_reconnect: true,
            keepalive_interval_secs: default_keepalive_interval_secs(),
            max_parallel: default_max_parallel(),
            parallel_timeout_secs: None,
            cancel_on_critical: false,
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_open_duration_secs: default_breaker_open_duration_secs(),
            breaker_half_open_required: default_breaker_half_open_required(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl OrchestratorConfig {
    pub fn default_tool_timeout(&self) -> Duration {
        Duration::from_secs(self.default_tool_timeout_secs)
    }

    pub fn breaker_open_duration(&self) -> Duration {
        Duration::from_secs(self.breaker_open_duration_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

fn default_max_concurrent() -> usize {
    10
}
fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_keepalive_interval_secs() -> u64 {
    30
}
fn default_max_parallel() -> usize {
    10
}
fn default_breaker_failure_threshold() -> usize {
    5
}
fn default_breaker_open_duration_secs() -> u64 {
    60
}
fn default_breaker_half_open_required() -> usize {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    200
}

/// Monitoring Loop tunables.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MonitoringConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_true")]
    pub failure_detection_enabled: bool,
    #[serde(default = "default_true")]
    pub pattern_recognition_enabled: bool,
    #[serde(default = "default_alert_throttle_window_secs")]
    pub alert_throttle_window_secs: u64,
    #[serde(default = "default_pattern_window_secs")]
    pub pattern_window_secs: u64,
    #[serde(default = "default_pattern_threshold")]
    pub pattern_threshold: usize,
    #[serde(default = "default_consecutive_poll_failure_threshold")]
    pub consecutive_poll_failure_threshold: u32,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            failure_detection_enabled: true,
            pattern_recognition_enabled: true,
            alert_throttle_window_secs: default_alert_throttle_window_secs(),
            pattern_window_secs: default_pattern_window_secs(),
            pattern_threshold: default_pattern_threshold(),
            consecutive_poll_failure_threshold: default_consecutive_poll_failure_threshold(),
        }
    }
}

impl MonitoringConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
    pub fn alert_throttle_window(&self) -> Duration {
        Duration::from_secs(self.alert_throttle_window_secs)
    }
    pub fn pattern_window(&self) -> Duration {
        Duration::from_secs(self.pattern_window_secs)
    }
}

fn default_poll_interval_secs() -> u64 {
    60
}
fn default_alert_throttle_window_secs() -> u64 {
    900
}
fn default_pattern_window_secs() -> u64 {
    900
}
fn default_pattern_threshold() -> usize {
    3
}
fn default_consecutive_poll_failure_threshold() -> u32 {
    3
}

/// Recovery Loop tunables.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RecoveryConfig {
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_true")]
    pub immediate_retry_enabled: bool,
    #[serde(default = "default_true")]
    pub backoff_enabled: bool,
    #[serde(default = "default_true")]
    pub quality_fallback_enabled: bool,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    #[serde(default = "default_result_deadline_secs")]
    pub result_deadline_secs: u64,
    #[serde(default = "default_max_quality_downgrades")]
    pub max_quality_downgrades: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retry_attempts(),
            immediate_retry_enabled: true,
            backoff_enabled: true,
            quality_fallback_enabled: true,
            backoff_base_secs: default_backoff_base_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_max_secs: default_backoff_max_secs(),
            result_deadline_secs: default_result_deadline_secs(),
            max_quality_downgrades: default_max_quality_downgrades(),
        }
    }
}

impl RecoveryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }
    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
    pub fn result_deadline(&self) -> Duration {
        Duration::from_secs(self.result_deadline_secs)
    }
}

fn default_max_retry_attempts() -> u32 {
    3
}
fn default_backoff_base_secs() -> u64 {
    30
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_backoff_max_secs() -> u64 {
    900
}
fn default_result_deadline_secs() -> u64 {
    300
}
fn default_max_quality_downgrades() -> u32 {
    2
}

/// Event Bus tunables.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EventBusSettings {
    #[serde(default = "default_max_history_size")]
    pub max_history_size: usize,
}

impl Default for EventBusSettings {
    fn default() -> Self {
        Self { max_history_size: default_max_history_size() }
    }
}

fn default_max_history_size() -> usize {
    1000
}

/// Activity Log tunables.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ActivityLogConfig {
    #[serde(default = "default_max_activity_items")]
    pub max_activity_items: usize,
    #[serde(default = "default_activity_topic_allow_list")]
    pub topic_allow_list: Vec<String>,
}

impl Default for ActivityLogConfig {
    fn default() -> Self {
        Self {
            max_activity_items: default_max_activity_items(),
            topic_allow_list: default_activity_topic_allow_list(),
        }
    }
}

fn default_max_activity_items() -> usize {
    1000
}

fn default_activity_topic_allow_list() -> Vec<String> {
    vec![
        "download.failed".to_string(),
        "download.retry.started".to_string(),
        "download.retry.succeeded".to_string(),
        "download.retry.failed".to_string(),
        "recovery.exhausted".to_string(),
        "recovery.unresolved".to_string(),
        "failure.pattern.detected".to_string(),
        "monitoring.degraded".to_string(),
        "monitoring.recovered".to_string(),
        "config.audit.started".to_string(),
        "config.audit.completed".to_string(),
        "config.audit.failed".to_string(),
        "content.request.created".to_string(),
        "content.request.classified".to_string(),
        "content.request.added".to_string(),
        "content.request.completed".to_string(),
        "content.request.failed".to_string(),
    ]
}

/// Telemetry configuration, shared across every process-entry point.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_service_name() -> String {
    "autoarr-gateway".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// HTTP/WebSocket listen configuration for the gateway process.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Top-level composed configuration for the gateway process.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub event_bus: EventBusSettings,
    #[serde(default)]
    pub activity_log: ActivityLogConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Per-upstream settings, keyed by the lowercase `UpstreamKind` name.
    /// In production this is sourced from the settings repository contract
    /// (out of scope for the core); for local/dev runs it is read from
    /// environment variables alongside everything else.
    #[serde(default)]
    pub upstreams: HashMap<String, UpstreamConfig>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_prefix("GATEWAY")
    }

    pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(Environment::with_prefix(prefix).separator("__").try_parsing(true));
        let config = builder.build()?;
        config.try_deserialize()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            monitoring: MonitoringConfig::default(),
            recovery: RecoveryConfig::default(),
            event_bus: EventBusSettings::default(),
            activity_log: ActivityLogConfig::default(),
            telemetry: TelemetryConfig::default(),
            upstreams: HashMap::new(),
        }
    }
}

/// Settings for one upstream as seen through the settings repository
/// contract — the core never persists this itself, it only consumes
/// it. `copilot-api` ships an in-memory implementation for local/dev use;
/// a production deployment backs this with whatever store owns best-practice
/// rules and user-edited settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub enabled: bool,
    pub url: String,
    pub credential: String,
}

#[async_trait]
pub trait ServiceSettingsRepository: Send + Sync {
    async fn get_service_settings(&self, kind: UpstreamKind) -> Option<ServiceSettings>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn upstream_kind_round_trips_through_as_str() {
        for kind in UpstreamKind::ALL {
            assert_eq!(UpstreamKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(UpstreamKind::from_str("not-a-kind").is_err());
    }

    #[test]
    fn orchestrator_config_defaults_match_spec() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent, 10);
        assert_eq!(config.default_tool_timeout_secs, 30);
        assert_eq!(config.max_retries, 3);
        assert!(config.auto_reconnect);
        assert_eq!(config.max_parallel, 10);
        assert!(!config.cancel_on_critical);
        assert_eq!(config.breaker_failure_threshold, 5);
        assert_eq!(config.breaker_open_duration_secs, 60);
        assert_eq!(config.breaker_half_open_required, 3);
    }

    #[test]
    fn recovery_config_has_quality_downgrade_ceiling() {
        let config = RecoveryConfig::default();
        assert_eq!(config.max_quality_downgrades, 2);
    }

    #[test]
    fn upstream_config_builder() {
        let config = UpstreamConfig::new(UpstreamKind::Download, "http://localhost:8080", "secret");
        assert!(config.enabled);
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }
}
