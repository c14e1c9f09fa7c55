//! Shared application state injected into every REST/WS handler.

use std::sync::Arc;

use copilot_core::EventBus;
use copilot_monitoring::{MonitoringLoop, RecoveryLoop};
use copilot_orchestrator::Orchestrator;

use crate::activity::ActivityLog;
use crate::ws::WebSocketBridge;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub bus: Arc<EventBus>,
    pub activity: Arc<ActivityLog>,
    pub bridge: Arc<WebSocketBridge>,
    pub monitoring: Option<Arc<MonitoringLoop>>,
    pub recovery: Option<Arc<RecoveryLoop>>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        bus: Arc<EventBus>,
        activity: Arc<ActivityLog>,
        bridge: Arc<WebSocketBridge>,
    ) -> Self {
        Self { orchestrator, bus, activity, bridge, monitoring: None, recovery: None }
    }

    pub fn with_monitoring(mut self, monitoring: Arc<MonitoringLoop>) -> Self {
        self.monitoring = Some(monitoring);
        self
    }

    pub fn with_recovery(mut self, recovery: Arc<RecoveryLoop>) -> Self {
        self.recovery = Some(recovery);
        self
    }
}
