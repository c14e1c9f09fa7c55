//! WebSocket Bridge: fans Event Bus events out to connected clients,
//! and accepts raw out-of-band broadcasts.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use copilot_core::{Event, EventBus, EventHandler};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Topic patterns subscribed by default: every top-level domain covered by
/// the core (downloads, content requests, config audits, activity).
const DEFAULT_TOPICS: &[&str] = &[
    "download.*",
    "recovery.*",
    "queue.*",
    "wanted.*",
    "failure.*",
    "monitoring.*",
    "content.request.*",
    "config.audit.*",
    "activity.*",
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventFrame<'a> {
    #[serde(rename = "type")]
    frame_type: &'static str,
    event_type: &'a str,
    correlation_id: uuid::Uuid,
    timestamp: chrono::DateTime<chrono::Utc>,
    payload: &'a serde_json::Value,
    meta: serde_json::Value,
}

/// Binds the Event Bus to a set of live client connections.
pub struct WebSocketBridge {
    topics: Vec<String>,
    clients: DashMap<u64, mpsc::UnboundedSender<Message>>,
    next_id: AtomicU64,
}

impl WebSocketBridge {
    pub fn new() -> Arc<Self> {
        Self::with_topics(DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect())
    }

    pub fn with_topics(topics: Vec<String>) -> Arc<Self> {
        Arc::new(Self { topics, clients: DashMap::new(), next_id: AtomicU64::new(1) })
    }

    /// Registers this bridge's handler for every subscribed topic pattern.
    /// Call once at wiring time.
    pub async fn attach(self: &Arc<Self>, bus: &EventBus) {
        for topic in &self.topics {
            bus.subscribe(topic.clone(), Arc::new(BridgeHandler(self.clone()))).await;
        }
    }

    pub fn connected_clients(&self) -> usize {
        self.clients.len()
    }

    /// Drives one accepted connection: sends the `connection.established`
    /// welcome frame, registers the client, then pumps outbound frames until
    /// the socket closes or a send fails. The bridge is output-only; inbound
    /// client frames are drained and discarded.
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.clients.insert(id, tx.clone());
        debug!(client_id = id, "websocket client connected");

        let welcome = json!({
            "type": "event",
            "eventType": "connection.established",
            "correlationId": uuid::Uuid::new_v4(),
            "timestamp": chrono::Utc::now(),
            "payload": {},
            "meta": { "clientId": id },
        });
        let _ = tx.send(Message::Text(welcome.to_string()));

        let (mut sender, mut receiver) = socket.split();

        let outbound = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if sender.send(message).await.is_err() {
                    break;
                }
            }
        });

        while receiver.next().await.is_some() {}

        outbound.abort();
        self.clients.remove(&id);
        debug!(client_id = id, "websocket client removed");
    }

    /// Broadcasts a message not originating from the bus (e.g. a periodic
    /// status pulse) to every connected client.
    pub fn broadcast_raw(&self, text: impl Into<String>) {
        let message = Message::Text(text.into());
        self.clients.retain(|_, tx| tx.send(message.clone()).is_ok());
    }

    fn dispatch(&self, event: &Event) {
        let frame = EventFrame {
            frame_type: "event",
            event_type: &event.topic,
            correlation_id: event.correlation_id,
            timestamp: event.emitted_at,
            payload: &event.payload,
            meta: json!({ "source": event.source, "id": event.id }),
        };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(err) => {
                warn!(topic = %event.topic, error = %err, "failed to serialize event frame");
                return;
            }
        };

        let message = Message::Text(text);
        self.clients.retain(|_, tx| tx.send(message.clone()).is_ok());
    }
}

struct BridgeHandler(Arc<WebSocketBridge>);

#[async_trait]
impl EventHandler for BridgeHandler {
    async fn handle(&self, event: Event) -> Result<(), String> {
        self.0.dispatch(&event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_core::EventDraft;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn default_topics_cover_core_domains() {
        let bridge = WebSocketBridge::new();
        assert!(bridge.topics.iter().any(|t| t == "download.*"));
        assert!(bridge.topics.iter().any(|t| t == "activity.*"));
    }

    #[tokio::test]
    async fn dispatch_drops_client_on_send_failure() {
        let bridge = WebSocketBridge::with_topics(vec!["t".to_string()]);
        let (tx, rx) = unbounded_channel::<Message>();
        bridge.clients.insert(1, tx);
        drop(rx); // closes the receiver, so the next send fails

        let bus = EventBus::with_defaults();
        bridge.attach(&bus).await;
        bus.emit(EventDraft::new("t", "test", serde_json::json!({}))).await;

        assert_eq!(bridge.connected_clients(), 0);
    }
}
