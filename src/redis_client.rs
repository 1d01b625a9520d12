use redis::aio::{ConnectionManager, PubSub};
use redis::{Client, RedisResult};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared Redis connection manager guarded by a Tokio mutex.
type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Command connection plus the client needed to open dedicated Pub/Sub
/// connections (a subscribed connection cannot issue regular commands).
#[derive(Clone)]
pub struct RedisClient {
    client: Client,
    manager: SharedConnectionManager,
}

impl RedisClient {
    pub async fn from_url(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            manager: Arc::new(Mutex::new(manager)),
        })
    }

    pub async fn get_multiplexed_async_connection(&self) -> RedisResult<ConnectionManager> {
        let guard = self.manager.lock().await;
        Ok(guard.clone())
    }

    pub async fn get_async_pubsub(&self) -> RedisResult<PubSub> {
        self.client.get_async_pubsub().await
    }
}
