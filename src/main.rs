use chat_relay::bus::{MessageBus, RedisBus};
use chat_relay::config::Config;
use chat_relay::error::AppError;
use chat_relay::lifecycle;
use chat_relay::logging::init_tracing;
use std::sync::Arc;
use tracing::{error, info};

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    init_tracing();

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        addr = %config.bind_addr(),
        topic = %config.chat_channel,
        "Starting chat relay"
    );

    let bus = RedisBus::connect(&config.redis_url).await.map_err(|e| {
        error!(redis_url = %config.redis_url, error = %e, "Failed to connect to Redis");
        AppError::BusUnavailable(e.to_string())
    })?;
    let bus: Arc<dyn MessageBus> = Arc::new(bus);

    let server = lifecycle::start(config, bus).await?;
    server.run_until_signal().await?;

    info!("Chat relay stopped");
    Ok(())
}
