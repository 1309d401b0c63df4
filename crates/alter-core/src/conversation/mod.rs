//! Conversation management module
//!
//! Conversations and their messages live in an external store; this module
//! provides the store seam, two implementations, and the orchestrator that
//! resolves the current conversation for a (user, avatar) pair.

mod manager;
mod remote;
mod store;
mod types;

pub use manager::ConversationManager;
pub use remote::RestConversationStore;
pub use store::{ConversationStore, SqliteConversationStore};
pub use types::{ChatMessage, Conversation, Role};
