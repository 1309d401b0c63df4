//! alter-core: Alter Gateway Core Library
//!
//! 設定、返信生成 (LLM)、会話の永続化、アバター設定、
//! ファイルアップロード、通知のコア機能を提供します。

pub mod avatar;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod notify;
pub mod upload;

pub use avatar::{AvatarKind, AvatarReference, AvatarSettings, SettingsStore};
pub use config::{
    AvatarConfig, Config, DataConfig, LlmConfig, LlmProvider, StreamingConfig, TurnConfig,
    UploadConfig, UserConfig, VoiceConfig,
};
pub use conversation::{
    ChatMessage, Conversation, ConversationManager, ConversationStore, RestConversationStore,
    Role, SqliteConversationStore,
};
pub use error::{Error, Result};
pub use llm::{LlmClient, ReplyGenerator};
pub use notify::{Notice, NoticeLevel, StatusEvent, StatusField, StatusReporter};
pub use upload::{FileUploader, HttpUploader};
