use axum::{extract::State, Json};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::Auth;
use super::error::ApiError;
use crate::db::{Conversation, ConversationSummary};
use crate::AppState;

/// List all conversations visible to the caller.
///
/// GET /api/chats
pub async fn list_chats(
    State(state): State<Arc<AppState>>,
    Auth(_identity): Auth,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let summaries = state.chat.list_conversations().await?;
    Ok(Json(summaries))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub conversation_id: String,
    pub text: String,
}

/// Append a message to a conversation and return it updated.
///
/// POST /api/chats/send
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Auth(identity): Auth,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<Conversation>, ApiError> {
    let conversation = state
        .chat
        .append_message(&identity.id, &request.conversation_id, &request.text)
        .await?;
    Ok(Json(conversation))
}
