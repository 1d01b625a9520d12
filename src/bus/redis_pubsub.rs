//! Redis Pub/Sub bus.
//!
//! Publishing goes through the shared connection manager. Every subscription
//! gets its own dedicated Pub/Sub connection owned by a background task, which
//! forwards payloads into an unbounded channel and issues `UNSUBSCRIBE` when
//! asked to.

use super::{BusError, BusResult, MessageBus, PayloadStream};
use crate::redis_client::RedisClient;
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

type UnsubscribeAck = oneshot::Sender<BusResult<()>>;

pub struct RedisBus {
    redis: RedisClient,
    // topic -> control channel of the task owning the Pub/Sub connection
    subscriptions: Mutex<HashMap<String, oneshot::Sender<UnsubscribeAck>>>,
}

enum Next {
    Message(Option<redis::Msg>),
    Unsubscribe(Option<UnsubscribeAck>),
}

impl RedisBus {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(redis_url: &str) -> BusResult<Self> {
        let redis = RedisClient::from_url(redis_url).await?;
        let bus = Self {
            redis,
            subscriptions: Mutex::new(HashMap::new()),
        };
        bus.ping().await?;
        info!("Connected to Redis");
        Ok(bus)
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn ping(&self) -> BusResult<()> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: String) -> BusResult<()> {
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let receivers: usize = conn.publish(topic, payload).await?;
        debug!(topic = %topic, receivers, "published message");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> BusResult<PayloadStream> {
        // Held until the new control channel is stored so two callers cannot
        // both pass the check.
        let mut subscriptions = self.subscriptions.lock().await;
        if let Some(control) = subscriptions.get(topic) {
            if !control.is_closed() {
                return Err(BusError::AlreadySubscribed(topic.to_string()));
            }
            debug!(topic = %topic, "replacing finished subscription");
        }

        // PubSub requires a dedicated connection, not multiplexed
        let mut pubsub = self.redis.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;
        info!(topic = %topic, "Listening to Redis messages");

        let (tx, rx) = mpsc::unbounded_channel();
        let (control_tx, mut control_rx) = oneshot::channel::<UnsubscribeAck>();
        let topic_name = topic.to_string();

        tokio::spawn(async move {
            loop {
                let next = {
                    let mut messages = pubsub.on_message();
                    tokio::select! {
                        msg = messages.next() => Next::Message(msg),
                        ack = &mut control_rx => Next::Unsubscribe(ack.ok()),
                    }
                };

                match next {
                    Next::Message(Some(msg)) => match msg.get_payload::<String>() {
                        Ok(payload) => {
                            if tx.send(payload).is_err() {
                                debug!(topic = %topic_name, "subscription receiver dropped");
                                break;
                            }
                        }
                        Err(e) => {
                            error!(error = ?e, topic = %topic_name, "Failed to get message payload");
                        }
                    },
                    Next::Message(None) => {
                        warn!(topic = %topic_name, "Redis subscription ended");
                        break;
                    }
                    Next::Unsubscribe(ack) => {
                        let result = pubsub
                            .unsubscribe(&topic_name)
                            .await
                            .map_err(BusError::from);
                        if let Some(ack) = ack {
                            let _ = ack.send(result);
                        }
                        break;
                    }
                }
            }
        });

        subscriptions.insert(topic.to_string(), control_tx);

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn unsubscribe(&self, topic: &str) -> BusResult<()> {
        let control = {
            let mut subscriptions = self.subscriptions.lock().await;
            subscriptions.remove(topic)
        };
        let control = control.ok_or_else(|| BusError::NotSubscribed(topic.to_string()))?;

        let (ack_tx, ack_rx) = oneshot::channel();
        control
            .send(ack_tx)
            .map_err(|_| BusError::Closed(topic.to_string()))?;
        ack_rx
            .await
            .map_err(|_| BusError::Closed(topic.to_string()))?
    }
}
