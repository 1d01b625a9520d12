//! In-process bus for single-node deployments and tests.
//!
//! An [`InMemoryBus`] is one client of a hub. [`InMemoryBus::connect`] opens
//! another client of the same hub, the way separate processes each hold their
//! own Redis connection: they see each other's publishes, but unsubscribing
//! only cancels the caller's own subscription.

use super::{BusError, BusResult, MessageBus, PayloadStream};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

#[derive(Debug)]
struct Subscriber {
    client: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// Topic → subscribers. Unbounded, like Redis Pub/Sub delivery: a slow
/// subscriber buffers rather than blocking publishers.
#[derive(Debug, Default)]
struct Hub {
    topics: Mutex<HashMap<String, Vec<Subscriber>>>,
}

#[derive(Debug)]
pub struct InMemoryBus {
    client: Uuid,
    hub: Arc<Hub>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    /// Create a fresh hub and the first client on it.
    pub fn new() -> Self {
        Self {
            client: Uuid::new_v4(),
            hub: Arc::default(),
        }
    }

    /// Another client on the same hub, with its own subscriptions.
    pub fn connect(&self) -> Self {
        Self {
            client: Uuid::new_v4(),
            hub: self.hub.clone(),
        }
    }

    /// Number of live subscriptions on `topic` across every client of the hub.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.hub.topics.lock().await;
        topics
            .get(topic)
            .map(|subs| subs.iter().filter(|sub| !sub.tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn ping(&self) -> BusResult<()> {
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: String) -> BusResult<()> {
        let mut topics = self.hub.topics.lock().await;
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|sub| sub.tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> BusResult<PayloadStream> {
        let mut topics = self.hub.topics.lock().await;
        let subscribers = topics.entry(topic.to_string()).or_default();

        // a subscription whose stream was dropped no longer counts
        subscribers.retain(|sub| !sub.tx.is_closed());
        if subscribers.iter().any(|sub| sub.client == self.client) {
            return Err(BusError::AlreadySubscribed(topic.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        subscribers.push(Subscriber {
            client: self.client,
            tx,
        });
        tracing::debug!(topic = %topic, client = %self.client, "in-memory subscription created");
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn unsubscribe(&self, topic: &str) -> BusResult<()> {
        let mut topics = self.hub.topics.lock().await;
        let Some(subscribers) = topics.get_mut(topic) else {
            return Err(BusError::NotSubscribed(topic.to_string()));
        };

        let before = subscribers.len();
        // Dropping the sender ends the stream.
        subscribers.retain(|sub| sub.client != self.client);
        let removed = before != subscribers.len();

        if subscribers.is_empty() {
            topics.remove(topic);
        }
        if removed {
            Ok(())
        } else {
            Err(BusError::NotSubscribed(topic.to_string()))
        }
    }
}
