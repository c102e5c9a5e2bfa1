//! Message service: authenticated list-and-append over the conversation
//! store. There is no per-identity membership model — every authenticated
//! caller sees every conversation.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::db::{Conversation, ConversationStore, ConversationSummary, Sender, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("conversation not found")]
    NotFound,
    #[error("message text is required")]
    EmptyMessage,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct MessageService {
    conversations: Arc<dyn ConversationStore>,
}

impl MessageService {
    pub fn new(conversations: Arc<dyn ConversationStore>) -> Self {
        Self { conversations }
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        Ok(self.conversations.list_summaries().await?)
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Conversation, ChatError> {
        self.conversations
            .get(id)
            .await?
            .ok_or(ChatError::NotFound)
    }

    /// Append a caller message and return the updated conversation. The
    /// append and the cached-summary refresh are one atomic store update.
    pub async fn append_message(
        &self,
        sender_id: &str,
        conversation_id: &str,
        text: &str,
    ) -> Result<Conversation, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let conversation = self
            .conversations
            .append(conversation_id, Sender::Caller, text, Utc::now())
            .await?
            .ok_or(ChatError::NotFound)?;

        info!(
            identity = %sender_id,
            conversation = %conversation_id,
            "Message appended"
        );
        Ok(conversation)
    }
}
