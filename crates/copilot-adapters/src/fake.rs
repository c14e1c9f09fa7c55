//! In-memory `UpstreamAdapter` for tests.
//!
//! A real, complete implementation of the formal `UpstreamAdapter`
//! interface, not a stub bolted onto a production adapter at runtime.

use async_trait::async_trait;
use copilot_core::{ErrorKind, GatewayError, GatewayResult, UpstreamKind};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::adapter::UpstreamAdapter;

type Canned = VecDeque<GatewayResult<Value>>;

pub struct FakeAdapter {
    kind: UpstreamKind,
    tools: Vec<String>,
    responses: Mutex<HashMap<String, Canned>>,
    delay: Mutex<Option<Duration>>,
    connected: AtomicBool,
    healthy: AtomicBool,
    calls: AtomicUsize,
}

impl FakeAdapter {
    pub fn new(kind: UpstreamKind, tools: &[&str]) -> Self {
        Self {
            kind,
            tools: tools.iter().map(|s| s.to_string()).collect(),
            responses: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
            connected: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queues a result to be returned for `tool`; successive calls to that
    /// tool pop the queue in order, then keep returning the last entry.
    pub fn queue_result(&self, tool: &str, result: GatewayResult<Value>) {
        self.responses
            .lock()
            .expect("lock not poisoned")
            .entry(tool.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("lock not poisoned") = Some(delay);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl UpstreamAdapter for FakeAdapter {
    fn kind(&self) -> UpstreamKind {
        self.kind
    }

    async fn connect(&self) -> GatewayResult<()> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    async fn health(&self) -> GatewayResult<bool> {
        Ok(self.healthy.load(Ordering::Acquire))
    }

    async fn list_tools(&self) -> GatewayResult<Vec<String>> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, tool_name: &str, _params: Value, deadline: Instant) -> GatewayResult<Value> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let delay = *self.delay.lock().expect("lock not poisoned");
        if let Some(delay) = delay {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, tokio::time::sleep(delay)).await.is_err() {
                return Err(GatewayError::timeout(format!("fake adapter exceeded deadline on {tool_name}")));
            }
        }

        let mut responses = self.responses.lock().expect("lock not poisoned");
        match responses.get_mut(tool_name) {
            Some(queue) if queue.len() > 1 => queue.pop_front().expect("checked non-empty"),
            Some(queue) => queue.front().cloned().expect("checked non-empty"),
            None => Ok(Value::Object(Default::default())),
        }
    }
}
