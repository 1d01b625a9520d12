use std::sync::Arc;
use std::time::{Duration, Instant};

use awc::ws;
use chat_relay::bus::MessageBus;
use chat_relay::config::Config;
use chat_relay::error::AppResult;
use chat_relay::lifecycle::{self, RunningServer};
use chat_relay::websocket::ConnectionRegistry;
use futures_util::{Stream, StreamExt};

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        shutdown_timeout_secs: 5,
        http_workers: 1,
        ..Config::default()
    }
}

pub async fn start_relay(bus: Arc<dyn MessageBus>) -> AppResult<RunningServer> {
    lifecycle::start(test_config(), bus).await
}

pub fn base_url(server: &RunningServer) -> String {
    format!("http://{}", server.addrs()[0])
}

pub fn chat_url(server: &RunningServer, user_id: &str) -> String {
    format!("{}/chat/{}", base_url(server), user_id)
}

pub async fn wait_for_connections(registry: &ConnectionRegistry, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while registry.len() != expected {
        assert!(
            Instant::now() < deadline,
            "registry never reached {expected} connections"
        );
        actix_rt::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Next text frame, skipping heartbeats. `None` once the server closes.
pub async fn next_text<S, E>(conn: &mut S) -> Option<String>
where
    S: Stream<Item = Result<ws::Frame, E>> + Unpin,
    E: std::fmt::Debug,
{
    while let Some(frame) = conn.next().await {
        match frame.expect("frame data") {
            ws::Frame::Text(bytes) => {
                return Some(String::from_utf8(bytes.to_vec()).expect("utf-8 text"))
            }
            ws::Frame::Close(_) => return None,
            _ => continue,
        }
    }
    None
}

/// Wait until the server sends a close frame or drops the connection.
pub async fn wait_closed<S, E>(conn: &mut S) -> Option<ws::CloseReason>
where
    S: Stream<Item = Result<ws::Frame, E>> + Unpin,
    E: std::fmt::Debug,
{
    let closed = actix_rt::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = conn.next().await {
            match frame {
                Ok(ws::Frame::Close(reason)) => return reason,
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
        None
    })
    .await;
    closed.expect("connection was not closed in time")
}
