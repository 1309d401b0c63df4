//! Conversation orchestration

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::avatar::AvatarKind;
use crate::conversation::{ChatMessage, Conversation, ConversationStore, Role};
use crate::Result;

/// Maps (user, avatar) to a persistent conversation and moves messages
/// in and out of the store.
///
/// Only the current conversation is remembered, and only for the lifetime
/// of the process.
pub struct ConversationManager {
    store: Arc<dyn ConversationStore>,
    current: RwLock<Option<Conversation>>,
}

impl ConversationManager {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self {
            store,
            current: RwLock::new(None),
        }
    }

    /// Look up the conversation for (user, avatar), creating it if absent
    pub async fn get_or_create(
        &self,
        user_id: &str,
        avatar_id: &str,
        avatar_type: AvatarKind,
    ) -> Result<Conversation> {
        {
            let current = self.current.read().await;
            if let Some(conversation) = current.as_ref() {
                if conversation.belongs_to(user_id, avatar_id) {
                    debug!("Conversation {} reused", conversation.id);
                    return Ok(conversation.clone());
                }
            }
        }

        let conversation = match self.store.find_conversation(user_id, avatar_id).await? {
            Some(found) => {
                debug!("Conversation {} loaded from store", found.id);
                found
            }
            None => {
                info!("Creating conversation for user {} and alter {}", user_id, avatar_id);
                self.store
                    .create_conversation(user_id, avatar_id, avatar_type)
                    .await?
            }
        };

        *self.current.write().await = Some(conversation.clone());
        Ok(conversation)
    }

    /// All messages of a conversation in ascending time order
    pub async fn load_history(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        let messages = self.store.list_messages(conversation_id).await?;
        debug!("Loaded {} messages for {}", messages.len(), conversation_id);
        Ok(messages)
    }

    /// The last `limit` messages, still oldest first
    pub async fn recent(&self, conversation_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let mut messages = self.store.list_messages(conversation_id).await?;
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }

    /// Persist a new message and return it
    pub async fn append(
        &self,
        conversation_id: &str,
        role: Role,
        content: impl Into<String>,
    ) -> Result<ChatMessage> {
        let message = ChatMessage::new(role, content);
        self.save(conversation_id, &message).await?;
        Ok(message)
    }

    /// Persist a message the caller already shows
    pub async fn save(&self, conversation_id: &str, message: &ChatMessage) -> Result<()> {
        self.store.insert_message(conversation_id, message).await?;
        debug!("Saved {} message to {}", message.role.as_str(), conversation_id);
        Ok(())
    }
}
