//! AI assist handlers
//!
//! Best-effort endpoints: downstream failures surface as safe defaults,
//! never as errors.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ai::Summary;
use crate::config::AppState;
use crate::ctx::Ctx;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickRepliesRequest {
    pub conversation_id: String,
}

#[derive(Debug, Serialize)]
pub struct QuickRepliesResponse {
    pub replies: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct GrammarRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct GrammarResponse {
    pub corrected: String,
}

/// POST /ai/quick-replies
pub async fn quick_replies(
    State(state): State<AppState>,
    _ctx: Ctx,
    Json(req): Json<QuickRepliesRequest>,
) -> Json<QuickRepliesResponse> {
    info!("POST /ai/quick-replies - {}", req.conversation_id);

    let replies = state.assist.quick_replies(&req.conversation_id).await;
    Json(QuickRepliesResponse { replies })
}

/// POST /ai/grammar-correct
pub async fn grammar_correct(
    State(state): State<AppState>,
    _ctx: Ctx,
    Json(req): Json<GrammarRequest>,
) -> Json<GrammarResponse> {
    info!("POST /ai/grammar-correct");

    let corrected = state.assist.correct_grammar(&req.text).await;
    Json(GrammarResponse { corrected })
}

/// GET /ai/summary/:conversation_id
pub async fn conversation_summary(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Json<Summary> {
    info!("GET /ai/summary/{}", conversation_id);
    Json(state.assist.summarize(&conversation_id).await)
}
