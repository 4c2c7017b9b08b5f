//! Conversation cache collaborator.
//!
//! History is persisted per conversation id after every completed turn and
//! read back when a conversation is continued.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::message::{ConversationId, Message};

/// A persisted conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: ConversationId,
    pub title: String,
    pub api: String,
    pub model: String,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

#[async_trait]
pub trait ConversationCache: Send + Sync {
    /// Load the history stored under `id`.
    async fn read(&self, id: &str) -> Result<Vec<Message>, CacheError>;

    /// Store `history` under `id`, replacing any previous version.
    async fn write(
        &self,
        id: &str,
        title: &str,
        api: &str,
        model: &str,
        history: &[Message],
    ) -> Result<(), CacheError>;
}
