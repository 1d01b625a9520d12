use crate::metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

pub mod message_types;
pub mod relay;
pub mod session;

/// Unique identifier for one accepted WebSocket connection
///
/// A user may reconnect while the old session is still winding down; the id
/// lets that old session remove only its own entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Instructions for the session that owns a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Write one text frame to the client.
    Deliver(String),
    /// Send a close frame and stop.
    Close,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// Outbound side of one live connection.
///
/// Dropping the handle closes the sink; the owning session sees the end of its
/// command stream and terminates.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: UnboundedSender<SessionCommand>,
}

impl ConnectionHandle {
    pub fn channel() -> (Self, UnboundedReceiver<SessionCommand>) {
        let (sender, rx) = unbounded_channel();
        let handle = Self {
            id: ConnectionId::new(),
            sender,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Non-blocking, best-effort write.
    pub fn send_text(&self, body: &str) -> Result<(), DeliveryError> {
        self.sender
            .send(SessionCommand::Deliver(body.to_string()))
            .map_err(|_| DeliveryError::Closed(self.id))
    }

    pub fn close(&self) -> Result<(), DeliveryError> {
        self.sender
            .send(SessionCommand::Close)
            .map_err(|_| DeliveryError::Closed(self.id))
    }
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<String, ConnectionHandle>,
    // set by close_all; later registrations are turned away
    closed: bool,
}

/// Connection registry: user id -> live connection
///
/// One mutex covers every read and write, including the full scan done for
/// each broadcast, so a fan-out never races a join or leave. The lock is never
/// held across an await, which lets a stopping session remove itself
/// synchronously before its command receiver is dropped.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `handle` for `user_id`, replacing any previous connection.
    ///
    /// The replaced handle is dropped, which ends the old session.
    pub fn register(&self, user_id: impl Into<String>, handle: ConnectionHandle) {
        let user_id = user_id.into();
        let mut guard = self.inner.lock();

        if guard.closed {
            tracing::info!(
                user_id = %user_id,
                connection_id = %handle.id(),
                "registry is closed, rejecting connection"
            );
            let _ = handle.close();
            return;
        }

        let connection_id = handle.id();
        if let Some(previous) = guard.connections.insert(user_id.clone(), handle) {
            tracing::info!(
                user_id = %user_id,
                replaced = %previous.id(),
                connection_id = %connection_id,
                "replaced existing connection for user"
            );
        }

        metrics::set_active_connections(guard.connections.len());
        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            total = guard.connections.len(),
            "registered connection"
        );
    }

    /// Remove the entry for `user_id` if present. Idempotent.
    pub fn unregister(&self, user_id: &str) -> bool {
        let mut guard = self.inner.lock();
        let removed = guard.connections.remove(user_id).is_some();
        metrics::set_active_connections(guard.connections.len());
        removed
    }

    /// Remove the entry for `user_id` only if it still belongs to
    /// `connection_id`. Idempotent.
    pub fn unregister_connection(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        let mut guard = self.inner.lock();
        let owned = guard
            .connections
            .get(user_id)
            .map(|handle| handle.id() == connection_id)
            .unwrap_or(false);

        if owned {
            guard.connections.remove(user_id);
            metrics::set_active_connections(guard.connections.len());
            tracing::debug!(
                user_id = %user_id,
                connection_id = %connection_id,
                remaining = guard.connections.len(),
                "unregistered connection"
            );
        }
        owned
    }

    /// Call `f` for every connection except `sender_id`'s, holding the lock
    /// for the whole scan. `f` must not call back into the registry.
    ///
    /// Returns the number of connections visited.
    pub fn for_each_except<F>(&self, sender_id: &str, mut f: F) -> usize
    where
        F: FnMut(&str, &ConnectionHandle),
    {
        let guard = self.inner.lock();
        let mut visited = 0;
        for (user_id, handle) in guard.connections.iter() {
            if user_id != sender_id {
                f(user_id, handle);
                visited += 1;
            }
        }
        visited
    }

    /// Close every connection and empty the registry. Used during shutdown;
    /// registrations arriving afterwards are closed immediately.
    pub fn close_all(&self) -> usize {
        let mut guard = self.inner.lock();
        guard.closed = true;

        let closed = guard.connections.len();
        for (user_id, handle) in guard.connections.drain() {
            if handle.close().is_err() {
                tracing::debug!(user_id = %user_id, "connection already gone");
            }
            tracing::info!(user_id = %user_id, "Closed connection for user");
        }

        metrics::set_active_connections(0);
        closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().connections.is_empty()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.inner.lock().connections.contains_key(user_id)
    }
}
