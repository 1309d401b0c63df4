//! Conversation persistence
//!
//! [`ConversationStore`] is the seam to the external persistence service.
//! [`SqliteConversationStore`] keeps everything in a local SQLite file and is
//! used when no data API is configured.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::avatar::AvatarKind;
use crate::conversation::{ChatMessage, Conversation, Role};
use crate::{Error, Result};

/// CRUD over conversations and messages, keyed by external user identity
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Find the conversation for a (user, avatar) pair
    async fn find_conversation(
        &self,
        user_id: &str,
        avatar_id: &str,
    ) -> Result<Option<Conversation>>;

    /// Insert a new conversation
    async fn create_conversation(
        &self,
        user_id: &str,
        avatar_id: &str,
        avatar_type: AvatarKind,
    ) -> Result<Conversation>;

    /// All messages of a conversation, oldest first
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>>;

    /// Persist one message
    async fn insert_message(&self, conversation_id: &str, message: &ChatMessage) -> Result<()>;
}

/// SQLite-based conversation store
pub struct SqliteConversationStore {
    conn: Mutex<Connection>,
}

fn timestamp(at: &DateTime<Utc>) -> String {
    // Fixed width so lexical order matches time order
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidQuery)
}

impl SqliteConversationStore {
    /// Create a new store with the given database path
    pub fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self {
            conn: Mutex::new(Connection::open(db_path)?),
        };
        store.init_tables()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_tables()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Other("conversation store lock poisoned".to_string()))
    }

    /// Initialize database tables
    fn init_tables(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                avatar_id TEXT NOT NULL,
                avatar_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (user_id, avatar_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation
             ON messages(conversation_id, created_at)",
            [],
        )?;

        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn find_conversation(
        &self,
        user_id: &str,
        avatar_id: &str,
    ) -> Result<Option<Conversation>> {
        let conn = self.lock()?;
        let conversation = conn
            .query_row(
                "SELECT id, user_id, avatar_id, avatar_type, created_at FROM conversations
                 WHERE user_id = ?1 AND avatar_id = ?2",
                params![user_id, avatar_id],
                |row| {
                    let avatar_type: String = row.get(3)?;
                    let created_at: String = row.get(4)?;
                    Ok(Conversation {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        avatar_id: row.get(2)?,
                        avatar_type: AvatarKind::parse(&avatar_type).unwrap_or_default(),
                        created_at: parse_timestamp(&created_at)?,
                    })
                },
            )
            .optional()?;
        Ok(conversation)
    }

    async fn create_conversation(
        &self,
        user_id: &str,
        avatar_id: &str,
        avatar_type: AvatarKind,
    ) -> Result<Conversation> {
        let conversation = Conversation::new(user_id, avatar_id, avatar_type);
        self.lock()?.execute(
            "INSERT INTO conversations (id, user_id, avatar_id, avatar_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation.id,
                conversation.user_id,
                conversation.avatar_id,
                conversation.avatar_type.as_str(),
                timestamp(&conversation.created_at),
            ],
        )?;
        debug!("Created conversation {} for {}/{}", conversation.id, user_id, avatar_id);
        Ok(conversation)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT role, content, created_at FROM messages
             WHERE conversation_id = ?1 ORDER BY created_at ASC, seq ASC",
        )?;

        let messages = stmt
            .query_map(params![conversation_id], |row| {
                let role: String = row.get(0)?;
                let created_at: String = row.get(2)?;
                Ok(ChatMessage {
                    role: Role::parse(&role).ok_or(rusqlite::Error::InvalidQuery)?,
                    content: row.get(1)?,
                    created_at: parse_timestamp(&created_at)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(messages)
    }

    async fn insert_message(&self, conversation_id: &str, message: &ChatMessage) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO messages (conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                conversation_id,
                message.role.as_str(),
                message.content,
                timestamp(&message.created_at),
            ],
        )?;
        Ok(())
    }
}
