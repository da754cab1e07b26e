//! Message handlers
//!
//! REST reads and writes hit the store directly; live delivery goes
//! through the room broker instead.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::config::AppState;
use crate::ctx::Ctx;
use crate::error::Result;
use crate::models::Message;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: String,
    pub text: String,
}

/// POST /messages
pub async fn send_message(
    State(state): State<AppState>,
    ctx: Ctx,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Message>> {
    info!("POST /messages - conversation {}", req.conversation_id);

    let message = state
        .store
        .append(ctx.user_id(), &req.conversation_id, &req.text)
        .await?;

    Ok(Json(message))
}

/// GET /messages/:conversation_id
pub async fn conversation_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<Message>>> {
    info!("GET /messages/{}", conversation_id);
    Ok(Json(state.store.history(&conversation_id).await?))
}
