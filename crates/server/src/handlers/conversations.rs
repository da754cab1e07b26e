//! Conversation handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::AppState;
use crate::ctx::Ctx;
use crate::directory::JoinOutcome;
use crate::error::{Error, Result};
use crate::models::{Conversation, GroupConversation};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneToOneRequest {
    /// Email or display name of the other party
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRequest {
    pub title: String,
    pub user_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub conversation_id: String,
}

#[derive(Debug, Serialize)]
pub struct NoticeResponse {
    pub message: String,
}

/// POST /conversations/1to1
pub async fn create_one_to_one(
    State(state): State<AppState>,
    ctx: Ctx,
    Json(req): Json<OneToOneRequest>,
) -> Result<impl IntoResponse> {
    info!("POST /conversations/1to1");

    let input = req
        .user_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::InvalidInput("Please enter email or name".to_string()))?;

    let target = state.directory.resolve_user(&input).await?;
    if target.id == ctx.user_id() {
        return Err(Error::InvalidInput(
            "Cannot start chat with yourself".to_string(),
        ));
    }

    let conversation = state
        .directory
        .create_one_to_one(ctx.user_id(), &target.id)
        .await?;

    Ok((StatusCode::CREATED, Json(conversation)))
}

/// POST /conversations/group
pub async fn create_group(
    State(state): State<AppState>,
    _ctx: Ctx,
    Json(req): Json<GroupRequest>,
) -> Result<impl IntoResponse> {
    info!("POST /conversations/group - '{}'", req.title);

    let conversation = state
        .directory
        .create_group(&req.title, &req.user_ids)
        .await?;

    Ok((StatusCode::CREATED, Json(conversation)))
}

/// GET /conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    ctx: Ctx,
) -> Result<Json<Vec<Conversation>>> {
    info!("GET /conversations");
    Ok(Json(state.directory.list_for_user(ctx.user_id()).await?))
}

/// GET /conversations/groups
pub async fn list_groups(
    State(state): State<AppState>,
) -> Result<Json<Vec<GroupConversation>>> {
    info!("GET /conversations/groups");
    Ok(Json(state.directory.list_groups().await?))
}

/// POST /conversations/group/join
pub async fn join_group(
    State(state): State<AppState>,
    ctx: Ctx,
    Json(req): Json<JoinRequest>,
) -> Result<Json<NoticeResponse>> {
    info!("POST /conversations/group/join - {}", req.conversation_id);

    let message = match state
        .directory
        .join_group(ctx.user_id(), &req.conversation_id)
        .await?
    {
        JoinOutcome::Joined => "Joined group",
        JoinOutcome::AlreadyMember => "Already a member",
    };

    Ok(Json(NoticeResponse {
        message: message.to_string(),
    }))
}

/// GET /conversations/:id
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Conversation>> {
    info!("GET /conversations/{}", conversation_id);
    Ok(Json(state.directory.get_by_id(&conversation_id).await?))
}
