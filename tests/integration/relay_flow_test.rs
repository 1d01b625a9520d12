use std::sync::Arc;
use std::time::{Duration, Instant};

use awc::{http::StatusCode, ws, Client};
use chat_relay::bus::{InMemoryBus, MessageBus};
use futures_util::SinkExt;

use super::support::{
    base_url, chat_url, next_text, start_relay, wait_closed, wait_for_connections,
};

#[actix_rt::test]
async fn message_reaches_everyone_but_sender() {
    let bus = Arc::new(InMemoryBus::new());
    let server = start_relay(bus.clone()).await.expect("start relay");
    let client = Client::new();

    let (_resp, mut alice) = client
        .ws(chat_url(&server, "alice"))
        .connect()
        .await
        .expect("connect alice");
    let (_resp, mut bob) = client
        .ws(chat_url(&server, "bob"))
        .connect()
        .await
        .expect("connect bob");
    wait_for_connections(server.registry(), 2).await;

    alice
        .send(ws::Message::Text("hello".into()))
        .await
        .expect("send from alice");

    assert_eq!(next_text(&mut bob).await.as_deref(), Some("hello"));

    let echoed = actix_rt::time::timeout(Duration::from_millis(300), next_text(&mut alice)).await;
    assert!(echoed.is_err(), "sender must not receive its own message");

    server.shutdown().await;
}

#[actix_rt::test]
async fn body_with_colons_arrives_intact() {
    let bus = Arc::new(InMemoryBus::new());
    let server = start_relay(bus.clone()).await.expect("start relay");
    let client = Client::new();

    let (_resp, mut alice) = client.ws(chat_url(&server, "alice")).connect().await.unwrap();
    let (_resp, mut bob) = client.ws(chat_url(&server, "bob")).connect().await.unwrap();
    wait_for_connections(server.registry(), 2).await;

    alice
        .send(ws::Message::Binary("hi:there".into()))
        .await
        .unwrap();

    assert_eq!(next_text(&mut bob).await.as_deref(), Some("hi:there"));

    server.shutdown().await;
}

#[actix_rt::test]
async fn departed_user_receives_nothing() {
    let bus = Arc::new(InMemoryBus::new());
    let server = start_relay(bus.clone()).await.expect("start relay");
    let client = Client::new();

    let (_resp, mut alice) = client.ws(chat_url(&server, "alice")).connect().await.unwrap();
    let (_resp, mut bob) = client.ws(chat_url(&server, "bob")).connect().await.unwrap();
    let (_resp, mut carol) = client.ws(chat_url(&server, "carol")).connect().await.unwrap();
    wait_for_connections(server.registry(), 3).await;

    alice.send(ws::Message::Close(None)).await.unwrap();
    wait_for_connections(server.registry(), 2).await;
    assert!(!server.registry().contains("alice"));

    bob.send(ws::Message::Text("anyone there?".into()))
        .await
        .unwrap();
    assert_eq!(
        next_text(&mut carol).await.as_deref(),
        Some("anyone there?")
    );

    server.shutdown().await;
}

#[actix_rt::test]
async fn reconnect_evicts_previous_connection() {
    let bus = Arc::new(InMemoryBus::new());
    let server = start_relay(bus.clone()).await.expect("start relay");
    let client = Client::new();

    let (_resp, mut first) = client.ws(chat_url(&server, "alice")).connect().await.unwrap();
    wait_for_connections(server.registry(), 1).await;

    let (_resp, mut second) = client.ws(chat_url(&server, "alice")).connect().await.unwrap();
    wait_closed(&mut first).await;

    let (_resp, mut bob) = client.ws(chat_url(&server, "bob")).connect().await.unwrap();
    wait_for_connections(server.registry(), 2).await;
    assert!(server.registry().contains("alice"));

    bob.send(ws::Message::Text("still there?".into()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut second).await.as_deref(), Some("still there?"));

    server.shutdown().await;
}

#[actix_rt::test]
async fn messages_cross_instances_sharing_a_bus() {
    let hub = InMemoryBus::new();
    let east_bus = Arc::new(hub.connect());
    let east = start_relay(east_bus.clone()).await.expect("start east");
    let west = start_relay(Arc::new(hub.connect())).await.expect("start west");
    let client = Client::new();

    let (_resp, mut alice) = client.ws(chat_url(&east, "alice")).connect().await.unwrap();
    let (_resp, mut bob) = client.ws(chat_url(&west, "bob")).connect().await.unwrap();
    wait_for_connections(east.registry(), 1).await;
    wait_for_connections(west.registry(), 1).await;

    alice
        .send(ws::Message::Text("over here".into()))
        .await
        .unwrap();
    assert_eq!(next_text(&mut bob).await.as_deref(), Some("over here"));

    east.shutdown().await;
    assert_eq!(hub.subscriber_count("chats").await, 1);

    // west keeps relaying after its peer is gone
    east_bus
        .publish("chats", "alice:anyone left?".to_string())
        .await
        .unwrap();
    let received = actix_rt::time::timeout(Duration::from_secs(2), next_text(&mut bob)).await;
    assert_eq!(received.expect("west still relays").as_deref(), Some("anyone left?"));

    west.shutdown().await;
    assert_eq!(hub.subscriber_count("chats").await, 0);
}

#[actix_rt::test]
async fn leaving_user_is_unregistered_before_its_sink_closes() {
    let bus = Arc::new(InMemoryBus::new());
    let server = start_relay(bus.clone()).await.expect("start relay");
    let registry = server.registry().clone();
    let client = Client::new();

    for _ in 0..10 {
        let (_resp, mut alice) = client.ws(chat_url(&server, "alice")).connect().await.unwrap();
        wait_for_connections(&registry, 1).await;

        alice.send(ws::Message::Close(None)).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut stale = 0;
        while registry.contains("alice") {
            assert!(Instant::now() < deadline, "alice was never unregistered");
            registry.for_each_except("", |_, handle| {
                if handle.send_text("are you there?").is_err() {
                    stale += 1;
                }
            });
            actix_rt::task::yield_now().await;
        }
        assert_eq!(stale, 0, "registry held a handle whose sink was closed");
    }

    server.shutdown().await;
}

#[actix_rt::test]
async fn user_id_with_delimiter_is_rejected() {
    let bus = Arc::new(InMemoryBus::new());
    let server = start_relay(bus.clone()).await.expect("start relay");

    let resp = Client::new()
        .get(chat_url(&server, "ali:ce"))
        .send()
        .await
        .expect("send request");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(server.registry().is_empty());

    server.shutdown().await;
}

#[actix_rt::test]
async fn health_endpoint_responds() {
    let bus = Arc::new(InMemoryBus::new());
    let server = start_relay(bus.clone()).await.expect("start relay");

    let mut resp = Client::new()
        .get(format!("{}/health", base_url(&server)))
        .send()
        .await
        .expect("send request");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.body().await.unwrap(), "OK");

    server.shutdown().await;
}
