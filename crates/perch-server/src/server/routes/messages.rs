//! Message history and send routes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use perch_realtime::Message;
use serde::Deserialize;
use tracing::debug;

use super::AuthUser;
use crate::db::NewMessage;
use crate::error::ApiError;
use crate::server::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/send/:id", post(send_message))
        .route("/:id", get(get_messages))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// GET /api/v1/message/:id
///
/// Full conversation between the caller and `:id`, oldest first. This is also
/// how clients pick up messages that arrived while they were offline.
async fn get_messages(
    State(state): State<Arc<AppState>>,
    AuthUser(me): AuthUser,
    Path(peer_id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = state.messages.find_between(&me.id, &peer_id).await?;
    Ok(Json(messages))
}

/// POST /api/v1/message/send/:id
///
/// Persists the message (authoritative), then attempts live delivery to the
/// receiver's connection. Delivery is best-effort: whatever happens on the
/// realtime side, the sender gets the persisted message back with 200.
async fn send_message(
    State(state): State<Arc<AppState>>,
    AuthUser(me): AuthUser,
    Path(receiver_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<Message>, ApiError> {
    let text = body
        .text
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    if text.is_none() && body.attachments.is_empty() {
        return Err(ApiError::BadRequest(
            "Please provide a message or an attachment".to_string(),
        ));
    }
    if receiver_id == me.id {
        return Err(ApiError::BadRequest(
            "You cannot send a message to yourself".to_string(),
        ));
    }
    state
        .users
        .find_by_id(&receiver_id)
        .await?
        .ok_or(ApiError::NotFound("User"))?;

    let message = state
        .messages
        .create(NewMessage {
            sender_id: me.id,
            receiver_id,
            text,
            attachments: body.attachments,
        })
        .await?;

    let outcome = state.router.deliver(&message);
    debug!(id = %message.id, ?outcome, "Send processed");

    Ok(Json(message))
}
