use crate::{bus::MessageBus, config::Config, websocket::ConnectionRegistry};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub bus: Arc<dyn MessageBus>,
    pub config: Arc<Config>,
}
