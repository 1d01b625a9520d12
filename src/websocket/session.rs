use crate::bus::MessageBus;
use crate::metrics;
use crate::websocket::message_types::RelayMessage;
use crate::websocket::{ConnectionHandle, ConnectionId, ConnectionRegistry, SessionCommand};
use actix::{Actor, ActorContext, AsyncContext, StreamHandler, WrapFuture};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// How long before lack of client response causes a timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// One attached client.
///
/// Registers itself on start, publishes every inbound frame to the chat
/// channel, writes relayed messages back out, and removes its own registry
/// entry on every exit path.
pub struct ChatSession {
    user_id: String,
    connection_id: ConnectionId,
    handle: Option<ConnectionHandle>,
    outbound: Option<UnboundedReceiver<SessionCommand>>,
    registry: ConnectionRegistry,
    bus: Arc<dyn MessageBus>,
    topic: String,
    hb: Instant,
    closing: bool,
}

impl ChatSession {
    pub fn new(
        user_id: String,
        registry: ConnectionRegistry,
        bus: Arc<dyn MessageBus>,
        topic: String,
    ) -> Self {
        let (handle, outbound) = ConnectionHandle::channel();
        Self {
            user_id,
            connection_id: handle.id(),
            handle: Some(handle),
            outbound: Some(outbound),
            registry,
            bus,
            topic,
            hb: Instant::now(),
            closing: false,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(user_id = %act.user_id, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    /// Publish in-line: the context does not process further frames until the
    /// bus has accepted this one, which keeps a sender's messages in order.
    fn publish(&mut self, body: String, ctx: &mut ws::WebsocketContext<Self>) {
        let bus = self.bus.clone();
        let topic = self.topic.clone();
        let message = RelayMessage::new(self.user_id.clone(), body);

        ctx.wait(
            async move {
                match bus.publish(&topic, message.encode()).await {
                    Ok(()) => metrics::record_publish(true),
                    Err(e) => {
                        metrics::record_publish(false);
                        tracing::error!(
                            user_id = %message.sender_id,
                            error = %e,
                            "Failed to publish message"
                        );
                    }
                }
            }
            .into_actor(self),
        );
    }

    fn close(&mut self, reason: Option<ws::CloseReason>, ctx: &mut ws::WebsocketContext<Self>) {
        if !self.closing {
            self.closing = true;
            ctx.close(reason);
        }
        ctx.stop();
    }
}

impl Actor for ChatSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            "User joined chat"
        );

        self.hb(ctx);

        if let Some(outbound) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(outbound));
        }

        // Registered before any inbound frame is handled
        if let Some(handle) = self.handle.take() {
            self.registry.register(self.user_id.clone(), handle);
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            "User disconnected"
        );

        // The command receiver is still alive here; once the entry is gone no
        // broadcast can reach a closed sink.
        self.registry.unregister_connection(&self.user_id, self.connection_id);
    }
}

// Inbound frames from the client
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ChatSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.publish(text.to_string(), ctx);
            }
            Ok(ws::Message::Binary(bytes)) => {
                self.hb = Instant::now();
                match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => self.publish(text, ctx),
                    Err(_) => {
                        tracing::warn!(user_id = %self.user_id, "Dropping non UTF-8 binary message");
                    }
                }
            }
            Ok(ws::Message::Continuation(_)) => {
                tracing::warn!(user_id = %self.user_id, "Fragmented messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                match reason.as_ref().map(|r| r.code) {
                    None
                    | Some(ws::CloseCode::Normal)
                    | Some(ws::CloseCode::Away)
                    | Some(ws::CloseCode::Abnormal) => {
                        tracing::info!(user_id = %self.user_id, "Connection closed by user");
                    }
                    Some(code) => {
                        tracing::warn!(
                            user_id = %self.user_id,
                            code = ?code,
                            "Connection closed with error code"
                        );
                    }
                }
                self.close(reason, ctx);
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::warn!(user_id = %self.user_id, error = %e, "Error reading message from user");
                ctx.stop();
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        tracing::info!(user_id = %self.user_id, "Connection closed by user");
        ctx.stop();
    }
}

// Commands from the registry and the relay
impl StreamHandler<SessionCommand> for ChatSession {
    fn handle(&mut self, cmd: SessionCommand, ctx: &mut Self::Context) {
        match cmd {
            SessionCommand::Deliver(body) => ctx.text(body),
            SessionCommand::Close => {
                self.close(Some(ws::CloseCode::Away.into()), ctx);
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        // Handle dropped: replaced by a newer connection or the registry drained
        tracing::info!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            "connection superseded, closing"
        );
        self.close(Some(ws::CloseCode::Policy.into()), ctx);
    }
}
