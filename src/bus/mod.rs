//! Publish/subscribe bus shared by every relay instance.
//!
//! The relay only needs four operations from the bus, so they are expressed as
//! a trait: Redis in production, an in-process implementation for tests and
//! single-node development.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

pub mod memory;
pub mod redis_pubsub;

pub use self::memory::InMemoryBus;
pub use self::redis_pubsub::RedisBus;

pub type BusResult<T> = std::result::Result<T, BusError>;

/// Lazy sequence of raw payloads for one topic. Ends when the topic is
/// unsubscribed or the bus connection is lost.
pub type PayloadStream = BoxStream<'static, String>;

#[derive(Error, Debug)]
pub enum BusError {
    /// Redis connection or operation error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("not subscribed to topic: {0}")]
    NotSubscribed(String),

    #[error("already subscribed to topic: {0}")]
    AlreadySubscribed(String),

    #[error("subscription for topic {0} is already closed")]
    Closed(String),
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Round-trip check used once at startup.
    async fn ping(&self) -> BusResult<()>;

    async fn publish(&self, topic: &str, payload: String) -> BusResult<()>;

    /// One live subscription per topic per bus client; a second call for the
    /// same topic fails with [`BusError::AlreadySubscribed`].
    async fn subscribe(&self, topic: &str) -> BusResult<PayloadStream>;

    /// Cancels this client's subscription to `topic`; the matching
    /// [`PayloadStream`] ends afterwards. Other clients' subscriptions to the
    /// same topic are untouched.
    async fn unsubscribe(&self, topic: &str) -> BusResult<()>;
}
