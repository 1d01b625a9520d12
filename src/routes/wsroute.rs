use crate::error::AppError;
use crate::state::AppState;
use crate::websocket::message_types::validate_sender_id;
use crate::websocket::session::ChatSession;
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;

/// WebSocket endpoint for one chat user
///
/// Usage: `GET /chat/{user_id}`. Any origin is accepted. The user id becomes
/// the sender prefix on the bus, so it must not contain ':'.
#[get("/chat/{user_id}")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let user_id = path.into_inner();

    if let Err(e) = validate_sender_id(&user_id) {
        tracing::warn!(user_id = %user_id, "WebSocket connection rejected: {}", e);
        return Err(AppError::BadRequest(e.to_string()).into());
    }

    let session = ChatSession::new(
        user_id.clone(),
        state.registry.clone(),
        state.bus.clone(),
        state.config.chat_channel.clone(),
    );

    ws::start(session, &req, stream).map_err(|e| {
        tracing::warn!(user_id = %user_id, error = %e, "WebSocket upgrade failed");
        e
    })
}
