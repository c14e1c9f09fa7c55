//! Activity Log: a wildcard Event Bus subscriber that retains a bounded,
//! queryable window of events for the API surface.

use async_trait::async_trait;
use copilot_core::{ActivityLogConfig, Event, EventBus, EventHandler};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default, Clone)]
pub struct ActivityQuery {
    pub topic: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub offset: usize,
    pub limit: Option<usize>,
}

pub struct ActivityLog {
    config: ActivityLogConfig,
    items: RwLock<VecDeque<Event>>,
}

impl ActivityLog {
    pub fn new(config: ActivityLogConfig) -> Arc<Self> {
        Arc::new(Self { config, items: RwLock::new(VecDeque::new()) })
    }

    /// Registers this log's handler on the bus. Call once at wiring time.
    pub async fn attach(self: &Arc<Self>, bus: &EventBus) {
        bus.subscribe("*", Arc::new(ActivityHandler(self.clone()))).await;
    }

    async fn record(&self, event: Event) {
        if !self.config.topic_allow_list.iter().any(|topic| event.matches(topic)) {
            return;
        }
        let mut items = self.items.write().await;
        if items.len() >= self.config.max_activity_items {
            items.pop_front();
        }
        items.push_back(event);
    }

    /// Most-recent-first, optionally filtered and paged.
    pub async fn query(&self, filter: &ActivityQuery) -> Vec<Event> {
        let items = self.items.read().await;
        let mut matching: Vec<Event> = items
            .iter()
            .rev()
            .filter(|e| filter.topic.as_deref().map_or(true, |t| e.topic == t))
            .filter(|e| filter.correlation_id.map_or(true, |c| e.correlation_id == c))
            .cloned()
            .collect();

        if filter.offset > 0 {
            matching = matching.into_iter().skip(filter.offset).collect();
        }
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        matching
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }
}

struct ActivityHandler(Arc<ActivityLog>);

#[async_trait]
impl EventHandler for ActivityHandler {
    async fn handle(&self, event: Event) -> Result<(), String> {
        self.0.record(event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_core::EventDraft;

    #[tokio::test]
    async fn records_only_allow_listed_topics() {
        let log = ActivityLog::new(ActivityLogConfig {
            max_activity_items: 10,
            topic_allow_list: vec!["download.failed".to_string()],
        });
        let bus = EventBus::with_defaults();
        log.attach(&bus).await;

        bus.emit(EventDraft::new("download.failed", "test", serde_json::json!({}))).await;
        bus.emit(EventDraft::new("queue.updated", "test", serde_json::json!({}))).await;

        assert_eq!(log.len().await, 1);
    }

    #[tokio::test]
    async fn evicts_oldest_beyond_capacity() {
        let log = ActivityLog::new(ActivityLogConfig {
            max_activity_items: 2,
            topic_allow_list: vec!["t".to_string()],
        });
        let bus = EventBus::with_defaults();
        log.attach(&bus).await;

        for n in 1..=3 {
            bus.emit(EventDraft::new("t", "test", serde_json::json!({"n": n}))).await;
        }

        let all = log.query(&ActivityQuery::default()).await;
        let ns: Vec<i64> = all.iter().map(|e| e.payload["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![3, 2]);
    }

    #[tokio::test]
    async fn query_filters_by_correlation_id() {
        let log = ActivityLog::new(ActivityLogConfig {
            max_activity_items: 10,
            topic_allow_list: vec!["t".to_string()],
        });
        let bus = EventBus::with_defaults();
        log.attach(&bus).await;

        let correlation_id = Uuid::new_v4();
        bus.emit(EventDraft::new("t", "test", serde_json::json!({})).with_correlation(correlation_id))
            .await;
        bus.emit(EventDraft::new("t", "test", serde_json::json!({}))).await;

        let filtered = log
            .query(&ActivityQuery { correlation_id: Some(correlation_id), ..Default::default() })
            .await;
        assert_eq!(filtered.len(), 1);
    }
}
