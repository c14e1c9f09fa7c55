//! Event Bus: process-local publish/subscribe with correlation tracking,
//! bounded history, and per-handler error isolation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// A domain event flowing through the bus.
///
/// Every event carries a `correlation_id`: if the emitter supplies one it is
/// reused, otherwise a fresh one is minted. This is what lets
/// `historyByCorrelation` reconstruct a causal chain (e.g. a failed download
/// through its retry attempts) without a dedicated join table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub correlation_id: Uuid,
    pub causation_id: Option<Uuid>,
    pub emitted_at: DateTime<Utc>,
    pub source: String,
    pub user_id: Option<String>,
}

impl Event {
    pub fn matches(&self, pattern: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix(".*") {
            return self.topic.starts_with(prefix);
        }
        self.topic == pattern
    }
}

/// Fields an emitter supplies; bus-assigned fields (`id`, `emitted_at`) are
/// filled in by `EventBus::emit`.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub topic: String,
    pub payload: serde_json::Value,
    pub correlation_id: Option<Uuid>,
    pub causation_id: Option<Uuid>,
    pub source: String,
    pub user_id: Option<String>,
}

impl EventDraft {
    pub fn new(topic: impl Into<String>, source: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            correlation_id: None,
            causation_id: None,
            source: source.into(),
            user_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_causation(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// Async handler invoked for each event on a subscribed topic (or `*`).
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> Result<(), String>;
}

#[async_trait]
impl<F> EventHandler for F
where
    F: Fn(Event) -> HandlerFuture + Send + Sync,
{
    async fn handle(&self, event: Event) -> Result<(), String> {
        (self)(event).await
    }
}

struct Subscription {
    topic: String,
    handler: Arc<dyn EventHandler>,
}

#[derive(Debug, Clone, Default)]
pub struct EventBusStats {
    pub emitted: u64,
    pub handler_errors: u64,
}

#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub max_history_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { max_history_size: 1000 }
    }
}

struct HistoryRing {
    buffer: VecDeque<Event>,
    capacity: usize,
}

impl HistoryRing {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    fn push(&mut self, event: Event) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event);
    }
}

/// The process-local publish/subscribe core.
///
/// Constructed once per process and injected explicitly into every
/// consumer (Monitoring Loop, Recovery Loop, WebSocket Bridge, Activity
/// Log) — there is no global accessor.
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    history: RwLock<HistoryRing>,
    emitted: AtomicU64,
    handler_errors: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            history: RwLock::new(HistoryRing::new(config.max_history_size)),
            emitted: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EventBusConfig::default())
    }

    /// Registers a handler for one topic, or `"*"` for every topic.
    pub async fn subscribe(&self, topic: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let topic = topic.into();
        debug!(topic = %topic, "subscribing to event bus topic");
        self.subscriptions.write().await.push(Subscription { topic, handler });
    }

    /// Assigns ids/timestamp, appends to bounded history, and dispatches to
    /// every matching handler concurrently. Handler errors are isolated:
    /// logged and counted, never propagated to the emitter.
    pub async fn emit(&self, draft: EventDraft) -> Event {
        let event = Event {
            id: Uuid::new_v4(),
            topic: draft.topic,
            payload: draft.payload,
            correlation_id: draft.correlation_id.unwrap_or_else(Uuid::new_v4),
            causation_id: draft.causation_id,
            emitted_at: Utc::now(),
            source: draft.source,
            user_id: draft.user_id,
        };

        self.history.write().await.push(event.clone());
        self.emitted.fetch_add(1, Ordering::Relaxed);

        let matching: Vec<Arc<dyn EventHandler>> = {
            let subs = self.subscriptions.read().await;
            subs.iter()
                .filter(|s| event.matches(&s.topic))
                .map(|s| s.handler.clone())
                .collect()
        };

        let dispatches = matching.into_iter().map(|handler| {
            let event = event.clone();
            async move { handler.handle(event).await }
        });

        let results = futures::future::join_all(dispatches).await;
        for result in results {
            if let Err(err) = result {
                warn!(topic = %event.topic, error = %err, "event handler failed");
                self.handler_errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        event
    }

    pub async fn history_by_topic(&self, topic: &str, limit: Option<usize>) -> Vec<Event> {
        let history = self.history.read().await;
        let mut matching: Vec<Event> = history
            .buffer
            .iter()
            .rev()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect();
        if let Some(limit) = limit {
            matching.truncate(limit);
        }
        matching
    }

    /// Events sharing a correlation id, oldest first (non-decreasing
    /// `emitted_at`) so a causal chain reads top-to-bottom.
    pub async fn history_by_correlation(&self, correlation_id: Uuid) -> Vec<Event> {
        let history = self.history.read().await;
        history
            .buffer
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    pub async fn history_recent(&self, limit: Option<usize>) -> Vec<Event> {
        let history = self.history.read().await;
        let mut events: Vec<Event> = history.buffer.iter().rev().cloned().collect();
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        events
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            emitted: self.emitted.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: Event) -> Result<(), String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle(&self, _event: Event) -> Result<(), String> {
            Err("boom".to_string())
        }
    }

    #[tokio::test]
    async fn emit_then_history_by_topic_returns_event() {
        let bus = EventBus::with_defaults();
        bus.emit(EventDraft::new("download.failed", "test", serde_json::json!({"n": 1})))
            .await;

        let history = bus.history_by_topic("download.failed", Some(1)).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].topic, "download.failed");
        assert_eq!(history[0].payload["n"], 1);
    }

    #[tokio::test]
    async fn history_eviction_keeps_most_recent_n() {
        let bus = EventBus::new(EventBusConfig { max_history_size: 3 });
        for n in 1..=4 {
            bus.emit(EventDraft::new("t", "test", serde_json::json!({"n": n}))).await;
        }

        let history = bus.history_by_topic("t", None).await;
        let ns: Vec<i64> = history.iter().map(|e| e.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![4, 3, 2]);
    }

    #[tokio::test]
    async fn correlation_chain_is_traversable_in_order() {
        let bus = EventBus::with_defaults();
        let correlation_id = Uuid::new_v4();
        bus.emit(
            EventDraft::new("download.failed", "monitoring", serde_json::json!({}))
                .with_correlation(correlation_id),
        )
        .await;
        bus.emit(
            EventDraft::new("recovery.retry.started", "recovery", serde_json::json!({}))
                .with_correlation(correlation_id),
        )
        .await;

        let chain = bus.history_by_correlation(correlation_id).await;
        assert_eq!(chain.len(), 2);
        assert!(chain[0].emitted_at <= chain[1].emitted_at);
    }

    #[tokio::test]
    async fn wildcard_subscriber_sees_every_topic() {
        let bus = EventBus::with_defaults();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe("*", Arc::new(CountingHandler(count.clone()))).await;

        bus.emit(EventDraft::new("a.b", "test", serde_json::json!({}))).await;
        bus.emit(EventDraft::new("c.d", "test", serde_json::json!({}))).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_other_handlers_or_emitter() {
        let bus = EventBus::with_defaults();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe("t", Arc::new(FailingHandler)).await;
        bus.subscribe("t", Arc::new(CountingHandler(count.clone()))).await;

        bus.emit(EventDraft::new("t", "test", serde_json::json!({}))).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().handler_errors, 1);
        assert_eq!(bus.stats().emitted, 1);
    }
}
