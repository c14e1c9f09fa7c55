//! The Upstream Adapter capability surface.
//!
//! Production adapters never gain stub methods at runtime — every
//! implementation of this trait is a complete, formal capability surface
//! from construction. `FakeAdapter` in `fake.rs` is the one in-memory
//! stand-in used by tests; it is a real implementation, not a patched-on
//! mock.

use async_trait::async_trait;
use copilot_core::{GatewayResult, UpstreamKind};
use std::time::Instant;

/// A semantic version reported by an upstream, used for version-gating
/// tool availability (Download's direct-unpack/propagation-delay/
/// deobfuscation extensions are gated this way).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct UpstreamVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl UpstreamVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Parses `"3.4.0"`-style strings; unparsable input is treated as 0.0.0
    /// so version-gated extensions stay hidden rather than assumed present.
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.trim().split('.').map(|p| p.parse::<u32>().unwrap_or(0));
        Self {
            major: parts.next().unwrap_or(0),
            minor: parts.next().unwrap_or(0),
            patch: parts.next().unwrap_or(0),
        }
    }
}

/// One entry in an adapter's tool vocabulary: a name plus the minimum
/// upstream version required for it to appear in `list_tools`. Tools with
/// no minimum are always listed.
#[derive(Debug, Clone, Copy)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub min_version: Option<UpstreamVersion>,
}

impl ToolDescriptor {
    pub const fn always(name: &'static str) -> Self {
        Self { name, min_version: None }
    }

    pub const fn gated(name: &'static str, min_version: UpstreamVersion) -> Self {
        Self { name, min_version: Some(min_version) }
    }

    pub fn available_at(&self, reported: UpstreamVersion) -> bool {
        match self.min_version {
            Some(min) => reported >= min,
            None => true,
        }
    }
}

/// Uniform capability surface over one remote service. The Orchestrator
/// never dials an upstream directly — it only ever goes through this trait,
/// and only ever by routing a `ToolCall` to the adapter's own breaker-free
/// `call_tool`. All breaker/retry/timeout policy lives one layer up, in
/// `copilot-orchestrator`.
#[async_trait]
pub trait UpstreamAdapter: Send + Sync {
    fn kind(&self) -> UpstreamKind;

    /// Validates credentials with one health probe. Idempotent: calling
    /// twice on an already-connected adapter is a no-op.
    async fn connect(&self) -> GatewayResult<()>;

    /// Releases resources. Safe to call on a not-connected adapter.
    async fn disconnect(&self);

    /// Reachable + authenticated, within the adapter's configured timeout.
    async fn health(&self) -> GatewayResult<bool>;

    /// The tool names this upstream currently exposes, filtered by the
    /// upstream's reported version.
    async fn list_tools(&self) -> GatewayResult<Vec<String>>;

    /// Executes one tool invocation, honoring `deadline` — on elapse this
    /// must return `Err(Timeout)` without leaking any in-flight resource.
    async fn call_tool(
        &self,
        tool_name: &str,
        params: serde_json::Value,
        deadline: Instant,
    ) -> GatewayResult<serde_json::Value>;
}
