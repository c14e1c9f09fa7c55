//! Axum router: thin stub wiring health/stats/breaker/activity endpoints and
//! the `/ws` upgrade onto the orchestrator, event bus, and activity log.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method, Request},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::Instrument;

use copilot_observability::correlation::CorrelationContext;

use crate::rest::handlers;
use crate::rest::ws_route::ws_upgrade;
use crate::state::AppState;

/// Builds the full router for one process. `state` is wrapped once in an
/// `Arc` and shared by every handler.
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::readiness))
        .route("/stats", get(handlers::stats))
        .route("/stats/events", get(handlers::event_bus_stats))
        .route("/breakers", get(handlers::breaker_snapshots))
        .route("/breakers/:upstream", get(handlers::breaker_snapshot))
        .route("/activity", get(handlers::activity_log))
        .route("/ws", get(ws_upgrade))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Derives a [`CorrelationContext`] from the inbound headers and carries it
/// for the lifetime of the request as a `tracing` span (rather than the
/// thread-local `ContextGuard` the same crate also offers: a tokio
/// multi-threaded runtime may resume a task on a different OS thread after
/// an `.await`, which a `thread_local` does not survive, while a span
/// attached via `Instrument` follows the future across yields). Every log
/// line emitted while handling this request — including ones several
/// `.await`s deep in a handler — carries `request_id`/`trace_id` fields.
async fn request_id_middleware(mut request: Request<axum::body::Body>, next: Next) -> Response {
    let incoming: Vec<(String, String)> = request
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();
    let ctx = CorrelationContext::from_headers(&incoming);

    request.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_str(&ctx.request_id).unwrap_or_else(|_| HeaderValue::from_static("invalid")),
    );

    let span = tracing::info_span!("http_request", request_id = %ctx.request_id, trace_id = %ctx.trace_id);
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    if let Ok(value) = HeaderValue::from_str(&ctx.traceparent()) {
        response.headers_mut().insert("traceparent", value);
    }
    response
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(
            std::env::var("GATEWAY_CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .parse::<HeaderValue>()
                .unwrap_or(HeaderValue::from_static("*")),
        )
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE, header::HeaderName::from_static("x-request-id")])
        .max_age(Duration::from_secs(3600))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityLog;
    use crate::ws::WebSocketBridge;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use copilot_core::{ActivityLogConfig, EventBus, OrchestratorConfig};
    use copilot_orchestrator::Orchestrator;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn test_state() -> AppState {
        let orchestrator = Arc::new(Orchestrator::from_adapters(vec![], OrchestratorConfig::default()));
        let bus = Arc::new(EventBus::with_defaults());
        let activity = ActivityLog::new(ActivityLogConfig::default());
        let bridge = WebSocketBridge::new();
        AppState::new(orchestrator, bus, activity, bridge)
    }

    #[tokio::test]
    async fn health_route_returns_ok() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_route_returns_ok() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_breaker_upstream_is_bad_request() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/breakers/not-a-kind").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn request_id_is_generated_when_absent_and_echoed_in_traceparent() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let request_id = response.headers().get("x-request-id").unwrap().to_str().unwrap().to_string();
        assert!(Uuid::parse_str(&request_id).is_ok());
        let traceparent = response.headers().get("traceparent").unwrap().to_str().unwrap();
        assert!(traceparent.starts_with("00-"));
    }

    #[tokio::test]
    async fn request_id_is_preserved_when_supplied() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("x-request-id", "caller-supplied-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers().get("x-request-id").unwrap(), "caller-supplied-id");
    }
}
