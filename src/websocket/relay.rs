//! Bus → local connections.
//!
//! A single task per process drains the chat channel subscription and writes
//! each message to every local connection except the sender's own.

use crate::bus::{BusResult, MessageBus, PayloadStream};
use crate::metrics;
use crate::websocket::message_types::{RelayMessage, WireError};
use crate::websocket::ConnectionRegistry;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub received: u64,
    pub malformed: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Outcome of fanning out one decoded message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub failed: usize,
}

pub struct RelayHandle {
    topic: String,
    task: JoinHandle<RelayStats>,
}

impl RelayHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the relay to drain, aborting it once `deadline` passes.
    pub async fn wait(mut self, deadline: Duration) -> Option<RelayStats> {
        match tokio::time::timeout(deadline, &mut self.task).await {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                warn!(error = %e, topic = %self.topic, "relay task failed");
                None
            }
            Err(_) => {
                warn!(topic = %self.topic, "relay did not stop before deadline, aborting");
                self.task.abort();
                None
            }
        }
    }
}

/// Subscribe to `topic` and spawn the relay task.
///
/// A subscription failure is returned to the caller; at startup it is fatal.
pub async fn start(
    bus: Arc<dyn MessageBus>,
    registry: ConnectionRegistry,
    topic: &str,
) -> BusResult<RelayHandle> {
    let payloads = bus.subscribe(topic).await?;
    let task = tokio::spawn(run(payloads, registry));
    info!(topic = %topic, "broadcast relay started");
    Ok(RelayHandle {
        topic: topic.to_string(),
        task,
    })
}

/// Drain `payloads` until the subscription ends.
pub async fn run(mut payloads: PayloadStream, registry: ConnectionRegistry) -> RelayStats {
    let mut stats = RelayStats::default();

    while let Some(payload) = payloads.next().await {
        stats.received += 1;
        match relay_payload(&registry, &payload) {
            Ok(fan_out) => {
                stats.delivered += fan_out.delivered as u64;
                stats.failed += fan_out.failed as u64;
            }
            Err(e) => {
                stats.malformed += 1;
                metrics::record_malformed();
                warn!(error = %e, "Invalid message format");
            }
        }
    }

    info!(
        received = stats.received,
        malformed = stats.malformed,
        "broadcast relay stopped: subscription ended"
    );
    stats
}

/// Decode one bus payload and write its body to everyone but the sender.
pub fn relay_payload(registry: &ConnectionRegistry, payload: &str) -> Result<FanOut, WireError> {
    let message = RelayMessage::decode(payload)?;
    let mut fan_out = FanOut::default();

    registry.for_each_except(&message.sender_id, |user_id, handle| {
        match handle.send_text(&message.body) {
            Ok(()) => {
                fan_out.delivered += 1;
                metrics::record_delivery(true);
            }
            Err(e) => {
                // sessions unregister before their sink closes, so this is a
                // receiver dropped without going through the session
                fan_out.failed += 1;
                metrics::record_delivery(false);
                warn!(user_id = %user_id, error = %e, "Failed to send message to user");
            }
        }
    });

    debug!(
        sender = %message.sender_id,
        delivered = fan_out.delivered,
        failed = fan_out.failed,
        "relayed message"
    );
    Ok(fan_out)
}
