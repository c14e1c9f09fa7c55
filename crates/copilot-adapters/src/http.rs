//! Shared HTTP transport used by every concrete adapter.
//!
//! Centralizes credential injection, status-code-to-`ErrorKind` mapping,
//! deadline enforcement, and the adapter-local idempotent-GET retry.
//! Everything beyond that — routing, the Orchestrator-level retry ladder,
//! the circuit breaker — is a layer up in `copilot-orchestrator`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use copilot_core::{ErrorKind, GatewayError, GatewayResult, UpstreamConfig, UpstreamKind};
use serde_json::Value;
use tracing::{debug, warn};

pub struct HttpTransport {
    pub kind: UpstreamKind,
    client: reqwest::Client,
    base_url: String,
    credential: String,
    default_timeout: Duration,
    connected: AtomicBool,
}

impl HttpTransport {
    pub fn new(config: &UpstreamConfig) -> Self {
        Self {
            kind: config.kind,
            client: reqwest::Client::builder()
                .timeout(config.timeout())
                .build()
                .expect("reqwest client builds with static config"),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credential: config.credential.clone(),
            default_timeout: config.timeout(),
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::Release);
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn remaining(&self, deadline: Instant) -> Duration {
        deadline.saturating_duration_since(Instant::now()).min(self.default_timeout)
    }

    /// GET with at most one retry on a transport-class failure, as the
    /// adapter's own idempotent-GET policy — never for mutating
    /// calls, and never more than once regardless of the Orchestrator's own
    /// retry ladder above this layer.
    pub async fn get_json(&self, path: &str, deadline: Instant) -> GatewayResult<Value> {
        match self.send(reqwest::Method::GET, path, None, deadline).await {
            Err(err) if err.kind == ErrorKind::Transport => {
                debug!(upstream = %self.kind, path, "idempotent GET retry after transport error");
                self.send(reqwest::Method::GET, path, None, deadline).await
            }
            other => other,
        }
    }

    pub async fn mutate_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
        deadline: Instant,
    ) -> GatewayResult<Value> {
        self.send(method, path, body, deadline).await
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
        deadline: Instant,
    ) -> GatewayResult<Value> {
        let remaining = self.remaining(deadline);
        if remaining.is_zero() {
            return Err(GatewayError::timeout(format!("deadline already elapsed before {path}")));
        }

        let mut request = self
            .client
            .request(method, self.url(path))
            .bearer_auth(&self.credential)
            .timeout(remaining);
        if let Some(body) = &body {
            request = request.json(body);
        }

        let outcome = tokio::time::timeout(remaining, request.send()).await;
        let response = match outcome {
            Err(_) => return Err(GatewayError::timeout(format!("deadline elapsed calling {path}"))),
            Ok(Err(err)) => return Err(map_transport_error(err, &self.kind)),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(map_status_error(status, &self.kind));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| map_transport_error(err, &self.kind))?;
        if bytes.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| GatewayError::new(ErrorKind::PermanentServer, format!("malformed response: {err}")))
    }
}

fn map_transport_error(err: reqwest::Error, upstream: &UpstreamKind) -> GatewayError {
    let kind = if err.is_timeout() {
        ErrorKind::Timeout
    } else {
        ErrorKind::Transport
    };
    warn!(upstream = %upstream, error = %err, "adapter transport error");
    GatewayError::new(kind, err.to_string()).with_upstream(upstream.as_str())
}

fn map_status_error(status: reqwest::StatusCode, upstream: &UpstreamKind) -> GatewayError {
    let kind = match status.as_u16() {
        401 | 403 => ErrorKind::Authentication,
        404 => ErrorKind::NotFound,
        429 | 503 => ErrorKind::TransientServer,
        500..=599 => ErrorKind::PermanentServer,
        _ => ErrorKind::PermanentServer,
    };
    GatewayError::new(kind, format!("upstream responded {status}")).with_upstream(upstream.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(base_url: String) -> HttpTransport {
        let config = UpstreamConfig::new(UpstreamKind::Download, base_url, "test-token");
        HttpTransport::new(&config)
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn successful_get_deserializes_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/queue"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"slots": []})))
            .mount(&server)
            .await;

        let transport = transport(server.uri());
        let body = transport.get_json("queue", deadline()).await.unwrap();
        assert_eq!(body, serde_json::json!({"slots": []}));
    }

    #[tokio::test]
    async fn empty_body_normalizes_to_empty_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/items/1/search"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let transport = transport(server.uri());
        let body = transport
            .mutate_json(reqwest::Method::POST, "items/1/search", None, deadline())
            .await
            .unwrap();
        assert_eq!(body, Value::Object(Default::default()));
    }

    #[tokio::test]
    async fn unauthorized_status_maps_to_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/queue")).respond_with(ResponseTemplate::new(401)).mount(&server).await;

        let transport = transport(server.uri());
        let err = transport.get_json("queue", deadline()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn not_found_status_maps_to_not_found_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/queue")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

        let transport = transport(server.uri());
        let err = transport.get_json("queue", deadline()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn service_unavailable_maps_to_transient_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/queue")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

        let transport = transport(server.uri());
        let err = transport.get_json("queue", deadline()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransientServer);
    }

    #[tokio::test]
    async fn internal_server_error_maps_to_permanent_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/queue")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

        let transport = transport(server.uri());
        let err = transport.get_json("queue", deadline()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermanentServer);
    }

    #[tokio::test]
    async fn mutate_never_retries_even_on_repeated_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/items"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport(server.uri());
        let err = transport
            .mutate_json(reqwest::Method::POST, "items", Some(serde_json::json!({"id": "x"})), deadline())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermanentServer);
    }
}
