//! Conversation types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::avatar::AvatarKind;

/// Speaker of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// One turn's content. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A persistent thread between one user and one alter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub avatar_id: String,
    pub avatar_type: AvatarKind,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new conversation record with a fresh id
    pub fn new(
        user_id: impl Into<String>,
        avatar_id: impl Into<String>,
        avatar_type: AvatarKind,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            avatar_id: avatar_id.into(),
            avatar_type,
            created_at: Utc::now(),
        }
    }

    /// Whether this conversation belongs to the (user, avatar) pair
    pub fn belongs_to(&self, user_id: &str, avatar_id: &str) -> bool {
        self.user_id == user_id && self.avatar_id == avatar_id
    }
}
