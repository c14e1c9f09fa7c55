//! Request handlers for the thin REST surface.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use copilot_core::{CircuitState, GatewayHealth, HealthStatus, UpstreamHealth, UpstreamKind};
use serde::Deserialize;
use uuid::Uuid;

use crate::activity::ActivityQuery;
use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<GatewayHealth> {
    let mut upstreams = HashMap::new();
    let mut any_reachable = false;
    let mut any_unreachable = false;
    let mut any_degraded = false;

    for kind in state.orchestrator.registered_upstreams() {
        let Some(breaker) = state.orchestrator.breaker_snapshot(kind).await else {
            continue;
        };

        let started = Instant::now();
        let reachable = state.orchestrator.health_check(kind).await.unwrap_or(false);
        let latency_ms = reachable.then(|| started.elapsed().as_millis() as u64);

        if reachable {
            any_reachable = true;
            if !matches!(breaker.state, CircuitState::Closed) {
                any_degraded = true;
            }
        } else {
            any_unreachable = true;
        }

        upstreams.insert(kind.as_str().to_string(), UpstreamHealth { upstream: kind, reachable, latency_ms, breaker });
    }

    // Partial failure is first-class: only report Unhealthy when nothing is
    // reachable. At least one healthy upstream downgrades the rest to Degraded.
    let status = if !any_reachable {
        HealthStatus::Unhealthy
    } else if any_unreachable || any_degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    Json(GatewayHealth { status, upstreams })
}

pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

pub async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.stats_snapshot().await)
}

pub async fn breaker_snapshot(State(state): State<Arc<AppState>>, Path(upstream): Path<String>) -> impl IntoResponse {
    match UpstreamKind::from_str(&upstream) {
        Ok(kind) => match state.orchestrator.breaker_snapshot(kind).await {
            Some(snapshot) => Json(snapshot).into_response(),
            None => (StatusCode::NOT_FOUND, "upstream not configured").into_response(),
        },
        Err(_) => (StatusCode::BAD_REQUEST, "unknown upstream kind").into_response(),
    }
}

pub async fn breaker_snapshots(State(state): State<Arc<AppState>>) -> Json<HashMap<String, copilot_core::CircuitBreakerSnapshot>> {
    Json(state.orchestrator.all_breaker_snapshots().await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityQueryParams {
    topic: Option<String>,
    correlation_id: Option<Uuid>,
    #[serde(default)]
    offset: usize,
    limit: Option<usize>,
}

pub async fn activity_log(State(state): State<Arc<AppState>>, Query(params): Query<ActivityQueryParams>) -> impl IntoResponse {
    let filter = ActivityQuery {
        topic: params.topic,
        correlation_id: params.correlation_id,
        offset: params.offset,
        limit: params.limit,
    };
    Json(state.activity.query(&filter).await)
}

pub async fn event_bus_stats(State(state): State<Arc<AppState>>) -> Json<copilot_core::EventBusStats> {
    Json(state.bus.stats())
}
