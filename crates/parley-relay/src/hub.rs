//! Topic subscriptions and fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::trace;
use uuid::Uuid;

/// Per-connection outbound queue.
pub type Outbox = mpsc::UnboundedSender<String>;

/// Topic -> (connection id -> outbox). Cheap to clone.
#[derive(Clone, Default)]
pub struct Hub {
    topics: Arc<RwLock<HashMap<String, HashMap<Uuid, Outbox>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to each of `topics`.
    pub async fn subscribe(&self, conn_id: Uuid, topics: &[String], outbox: Outbox) {
        let mut map = self.topics.write().await;
        for topic in topics {
            map.entry(topic.clone())
                .or_default()
                .insert(conn_id, outbox.clone());
        }
    }

    /// Remove a connection from every topic.
    pub async fn unsubscribe(&self, conn_id: Uuid) {
        let mut map = self.topics.write().await;
        for subscribers in map.values_mut() {
            subscribers.remove(&conn_id);
        }
        map.retain(|_, subscribers| !subscribers.is_empty());
    }

    /// Deliver `payload` to every subscriber of `topic` except `from`.
    /// Returns how many connections it was queued for.
    pub async fn publish(&self, from: Uuid, topic: &str, payload: &str) -> usize {
        let map = self.topics.read().await;
        let Some(subscribers) = map.get(topic) else {
            return 0;
        };

        let mut delivered = 0;
        for (conn_id, outbox) in subscribers {
            if *conn_id == from {
                continue;
            }
            if outbox.send(payload.to_string()).is_ok() {
                delivered += 1;
            }
        }
        trace!(topic, delivered, "published");
        delivered
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map_or(0, HashMap::len)
    }

    /// Distinct connections across all topics.
    pub async fn connection_count(&self) -> usize {
        let map = self.topics.read().await;
        let mut ids: Vec<&Uuid> = map.values().flat_map(HashMap::keys).collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }
}
