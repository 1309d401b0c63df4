//! PostgREST-style data API client for conversation persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::avatar::AvatarKind;
use crate::conversation::{ChatMessage, Conversation, ConversationStore, Role};
use crate::{Error, Result};

/// Conversation store backed by a relational data API
#[derive(Clone)]
pub struct RestConversationStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationRow {
    id: String,
    user_id: String,
    alter_id: String,
    alter_type: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            avatar_id: row.alter_id,
            avatar_type: row
                .alter_type
                .as_deref()
                .and_then(AvatarKind::parse)
                .unwrap_or_default(),
            created_at: row.created_at.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Serialize)]
struct NewConversation<'a> {
    user_id: &'a str,
    alter_id: &'a str,
    alter_type: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
struct MessageRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<String>,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl RestConversationStore {
    /// Create a new client for the data API at `base_url`
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, table);
        let mut builder = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            builder = builder
                .header("apikey", key)
                .header("Authorization", format!("Bearer {}", key));
        }
        builder
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!("Data API error: {} - {}", status, body);
        Err(Error::DataApi(format!("{}: {}", status, body)))
    }
}

#[async_trait]
impl ConversationStore for RestConversationStore {
    async fn find_conversation(
        &self,
        user_id: &str,
        avatar_id: &str,
    ) -> Result<Option<Conversation>> {
        let response = self
            .request(reqwest::Method::GET, "conversations")
            .query(&[
                ("user_id", format!("eq.{}", user_id)),
                ("alter_id", format!("eq.{}", avatar_id)),
                ("order", "created_at.asc".to_string()),
                ("limit", "1".to_string()),
            ])
            .send()
            .await?;

        let rows: Vec<ConversationRow> = Self::check(response).await?.json().await?;
        Ok(rows.into_iter().next().map(Conversation::from))
    }

    async fn create_conversation(
        &self,
        user_id: &str,
        avatar_id: &str,
        avatar_type: AvatarKind,
    ) -> Result<Conversation> {
        let body = NewConversation {
            user_id,
            alter_id: avatar_id,
            alter_type: avatar_type.as_str(),
        };

        let response = self
            .request(reqwest::Method::POST, "conversations")
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await?;

        let rows: Vec<ConversationRow> = Self::check(response).await?.json().await?;
        let conversation = rows
            .into_iter()
            .next()
            .map(Conversation::from)
            .ok_or_else(|| Error::DataApi("insert returned no rows".to_string()))?;

        debug!("Created conversation {} via data API", conversation.id);
        Ok(conversation)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        let response = self
            .request(reqwest::Method::GET, "messages")
            .query(&[
                ("conversation_id", format!("eq.{}", conversation_id)),
                ("order", "created_at.asc".to_string()),
            ])
            .send()
            .await?;

        let rows: Vec<MessageRow> = Self::check(response).await?.json().await?;
        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            match Role::parse(&row.role) {
                Some(role) => messages.push(ChatMessage {
                    role,
                    content: row.content,
                    created_at: row.created_at,
                }),
                None => debug!("Skipping message with role {}", row.role),
            }
        }
        // Stable sort keeps server order for equal timestamps
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn insert_message(&self, conversation_id: &str, message: &ChatMessage) -> Result<()> {
        let row = MessageRow {
            conversation_id: Some(conversation_id.to_string()),
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
            created_at: message.created_at,
        };

        let response = self
            .request(reqwest::Method::POST, "messages")
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }
}
