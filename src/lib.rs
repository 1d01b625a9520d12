//! Real-time chat relay.
//!
//! Clients attach over WebSocket at `/chat/{user_id}`. Every inbound message is
//! published to a shared Pub/Sub channel as `sender:body`, and each process
//! relays what it receives to all of its local connections except the sender.

pub mod bus;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod redis_client;
pub mod routes;
pub mod state;
pub mod websocket;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use lifecycle::{LifecycleState, RunningServer};
