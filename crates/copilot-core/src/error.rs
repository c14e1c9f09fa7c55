//! Shared error taxonomy carried on every fallible boundary in the gateway.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification carried on every `Err` result returned across a component
/// boundary (adapter, breaker, orchestrator, monitoring, recovery).
///
/// Retryability and HTTP mapping for each kind are fixed by contract, not
/// left to call sites to decide ad hoc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, DNS, connection reset.
    Transport,
    /// Deadline elapsed before completion.
    Timeout,
    /// 429/503 from upstream.
    TransientServer,
    /// Any other 5xx from upstream.
    PermanentServer,
    /// 401/403 from upstream.
    Authentication,
    /// 404 from upstream.
    NotFound,
    /// Circuit breaker refused the call.
    BreakerOpen,
    /// Unknown or disabled upstream kind.
    NotConfigured,
    /// Caller-supplied parameters rejected.
    Validation,
    /// Shutdown or caller cancellation.
    Cancelled,
}

impl ErrorKind {
    /// Whether the Orchestrator's retry policy may retry an error of this kind.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transport | ErrorKind::TransientServer)
    }

    /// HTTP status the collaborator REST layer maps this kind to.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Transport => 503,
            ErrorKind::Timeout => 504,
            ErrorKind::TransientServer => 503,
            ErrorKind::PermanentServer => 500,
            ErrorKind::Authentication => 503,
            ErrorKind::NotFound => 400,
            ErrorKind::BreakerOpen => 503,
            ErrorKind::NotConfigured => 400,
            ErrorKind::Validation => 400,
            ErrorKind::Cancelled => 0,
        }
    }
}

/// The gateway's single error type at every component boundary.
///
/// Carries enough context (originating upstream, tool name) to attribute a
/// failure without callers needing to downcast.
#[derive(Debug, Error, Clone)]
#[error("{kind:?}: {message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
    pub upstream: Option<String>,
    pub tool: Option<String>,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            upstream: None,
            tool: None,
        }
    }

    pub fn with_upstream(mut self, upstream: impl Into<String>) -> Self {
        self.upstream = Some(upstream.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn breaker_open(upstream: impl Into<String>) -> Self {
        Self::new(ErrorKind::BreakerOpen, "circuit breaker is open").with_upstream(upstream)
    }

    pub fn not_configured(upstream: impl Into<String>) -> Self {
        let upstream = upstream.into();
        Self::new(
            ErrorKind::NotConfigured,
            format!("upstream '{}' is not configured or disabled", upstream),
        )
        .with_upstream(upstream)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_match_spec() {
        assert!(ErrorKind::Transport.is_retryable());
        assert!(ErrorKind::TransientServer.is_retryable());
        assert!(!ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::Authentication.is_retryable());
        assert!(!ErrorKind::PermanentServer.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::BreakerOpen.is_retryable());
        assert!(!ErrorKind::NotConfigured.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn http_mapping_matches_spec_table() {
        assert_eq!(ErrorKind::Transport.http_status(), 503);
        assert_eq!(ErrorKind::Timeout.http_status(), 504);
        assert_eq!(ErrorKind::NotFound.http_status(), 400);
        assert_eq!(ErrorKind::PermanentServer.http_status(), 500);
    }

    #[test]
    fn builder_attaches_context() {
        let err = GatewayError::transport("connection reset")
            .with_upstream("sabnzbd")
            .with_tool("getQueue");
        assert_eq!(err.upstream.as_deref(), Some("sabnzbd"));
        assert_eq!(err.tool.as_deref(), Some("getQueue"));
        assert!(err.is_retryable());
    }
}
