//! Application state and initialization: assembles the gateway's process
//! graph (adapters → Orchestrator → Event Bus → Monitoring/Recovery loops →
//! WebSocket Bridge/Activity Log) from `GatewayConfig`.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use copilot_api::{ActivityLog, WebSocketBridge};
use copilot_core::{EventBus, EventBusConfig, GatewayConfig};
use copilot_monitoring::{MonitoringLoop, RecoveryLoop};
use copilot_orchestrator::Orchestrator;

use crate::cli::Args;
use crate::server::Server;

/// Shared application state: everything the HTTP/WS surface and the
/// background loops need a handle to.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub bus: Arc<EventBus>,
    pub activity: Arc<ActivityLog>,
    pub bridge: Arc<WebSocketBridge>,
    pub monitoring: Arc<MonitoringLoop>,
    pub recovery: Arc<RecoveryLoop>,
}

impl AppState {
    /// Builds the whole process graph and connects every enabled upstream.
    pub async fn new(config: GatewayConfig) -> Result<Self> {
        info!("initializing gateway components");
        let config = Arc::new(config);

        let upstreams: Vec<_> = config.upstreams.values().cloned().collect();
        let orchestrator = Arc::new(Orchestrator::new(&upstreams, config.orchestrator.clone()));
        let connected = orchestrator.connect_all().await;
        for (kind, ok) in &connected {
            if *ok {
                info!(upstream = %kind, "connected to upstream");
            } else {
                tracing::warn!(upstream = %kind, "upstream failed initial connect; will retry on first call");
            }
        }

        let bus = Arc::new(EventBus::new(EventBusConfig { max_history_size: config.event_bus.max_history_size }));

        let activity = ActivityLog::new(config.activity_log.clone());
        activity.attach(&bus).await;

        let bridge = WebSocketBridge::new();
        bridge.attach(&bus).await;

        let monitoring = MonitoringLoop::new(orchestrator.clone(), bus.clone(), config.monitoring.clone());

        let recovery = RecoveryLoop::new(orchestrator.clone(), bus.clone(), config.recovery.clone());
        recovery.attach().await;

        Ok(Self { config, orchestrator, bus, activity, bridge, monitoring, recovery })
    }
}

/// Main application
pub struct App {
    args: Args,
    state: AppState,
}

impl App {
    /// Build the application with all dependencies
    pub async fn build(args: Args) -> Result<Self> {
        args.validate().context("invalid command line arguments")?;

        let mut config = GatewayConfig::from_env().context("failed to load gateway configuration")?;
        config.server.port = args.port;

        let state = AppState::new(config).await?;

        Ok(Self { args, state })
    }

    /// Run the application until shutdown
    pub async fn run(self) -> Result<()> {
        info!("starting gateway server");
        info!(port = self.args.port, "http port");

        let cancel = self.state.orchestrator.cancellation_token();
        let monitoring_task = tokio::spawn(self.state.monitoring.clone().run(cancel.clone()));

        let server = Server::new(self.args, self.state.clone())?;
        let result = server.run().await;

        cancel.cancel();
        let _ = monitoring_task.await;
        self.state.orchestrator.shutdown(true, std::time::Duration::from_secs(10)).await;

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn app_state_builds_with_no_upstreams_configured() {
        let config = GatewayConfig::from_env_with_prefix("COPILOT_SERVER_TEST_UNSET").unwrap();
        let state = AppState::new(config).await.unwrap();
        assert!(state.orchestrator.registered_upstreams().is_empty());
    }
}
