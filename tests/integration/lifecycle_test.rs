use std::sync::Arc;

use async_trait::async_trait;
use awc::{ws, Client};
use chat_relay::bus::{BusError, BusResult, InMemoryBus, MessageBus, PayloadStream};
use chat_relay::error::AppError;
use chat_relay::lifecycle::LifecycleState;
use futures_util::StreamExt;

use super::support::{chat_url, start_relay, wait_closed, wait_for_connections};

struct UnreachableBus;

#[async_trait]
impl MessageBus for UnreachableBus {
    async fn ping(&self) -> BusResult<()> {
        Err(BusError::Closed("connection refused".to_string()))
    }

    async fn publish(&self, _topic: &str, _payload: String) -> BusResult<()> {
        Ok(())
    }

    async fn subscribe(&self, _topic: &str) -> BusResult<PayloadStream> {
        Ok(futures_util::stream::empty::<String>().boxed())
    }

    async fn unsubscribe(&self, topic: &str) -> BusResult<()> {
        Err(BusError::NotSubscribed(topic.to_string()))
    }
}

#[actix_rt::test]
async fn startup_fails_when_bus_is_unreachable() {
    match start_relay(Arc::new(UnreachableBus)).await {
        Err(AppError::BusUnavailable(msg)) => assert!(msg.contains("connection refused")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("server started without a bus"),
    }
}

#[actix_rt::test]
async fn shutdown_closes_every_connection() {
    let bus = Arc::new(InMemoryBus::new());
    let server = start_relay(bus.clone()).await.expect("start relay");
    let registry = server.registry().clone();
    let state = server.state();
    assert_eq!(*state.borrow(), LifecycleState::Running);
    assert_eq!(bus.subscriber_count("chats").await, 1);

    let client = Client::new();
    let mut connections = Vec::new();
    for user in ["alice", "bob", "carol"] {
        let (_resp, conn) = client
            .ws(chat_url(&server, user))
            .connect()
            .await
            .expect("connect client");
        connections.push(conn);
    }
    wait_for_connections(&registry, 3).await;

    let final_state = server.shutdown().await;

    assert_eq!(final_state, LifecycleState::Stopped);
    assert_eq!(*state.borrow(), LifecycleState::Stopped);
    assert!(registry.is_empty());
    assert_eq!(bus.subscriber_count("chats").await, 0);

    for conn in connections.iter_mut() {
        let reason = wait_closed(conn).await;
        if let Some(reason) = reason {
            assert_eq!(reason.code, ws::CloseCode::Away);
        }
    }
}

#[actix_rt::test]
async fn shutdown_with_no_clients_stops_cleanly() {
    let bus = Arc::new(InMemoryBus::new());
    let server = start_relay(bus.clone()).await.expect("start relay");
    let addr = server.addrs()[0];

    assert_eq!(server.shutdown().await, LifecycleState::Stopped);

    let refused = Client::new()
        .get(format!("http://{addr}/health"))
        .send()
        .await;
    assert!(refused.is_err(), "listener still accepting after shutdown");
}
