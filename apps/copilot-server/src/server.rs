//! HTTP Server implementation

use anyhow::{Context, Result};
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::net::SocketAddr;
use tracing::info;

use copilot_api::{create_router, AppState as ApiAppState};

use crate::app::AppState;
use crate::cli::Args;

pub struct Server {
    args: Args,
    state: AppState,
}

impl Server {
    pub fn new(args: Args, state: AppState) -> Result<Self> {
        Ok(Self { args, state })
    }

    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.args.port));

        let app = self.build_http_router();

        info!("HTTP server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await.context("failed to bind HTTP server")?;

        axum::serve(listener, app.into_make_service()).await.context("HTTP server error")?;

        Ok(())
    }

    fn build_http_router(&self) -> Router {
        let api_state = ApiAppState::new(
            self.state.orchestrator.clone(),
            self.state.bus.clone(),
            self.state.activity.clone(),
            self.state.bridge.clone(),
        )
        .with_monitoring(self.state.monitoring.clone())
        .with_recovery(self.state.recovery.clone());

        let api_router = create_router(api_state);

        Router::new().route("/", get(root)).merge(api_router)
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "autoarr-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_root_handler() {
        let response = root().await;
        assert_eq!(response.0["service"], "autoarr-gateway");
    }
}
