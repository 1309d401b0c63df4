//! alter-stream: 喋るアバターのストリーミング
//!
//! チャット 1 つにつき 1 本のストリームを管理します。
//!
//! - [`api`]: ストリーミング API クライアント (create / sdp / ice / talk / delete)
//! - [`negotiator`]: メディアセッションの確立、ICE 送信、再生検知、終了処理
//! - [`supervisor`]: 接続のリトライと排他制御
//! - [`presentation`]: 静止画・アイドル・ライブ映像の切り替え
//! - [`turn`]: 入力から発話までの 1 ターン
//! - [`chat`]: 上記をまとめた [`ChatSession`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use alter_stream::{ChatConfig, ChatSession, Collaborators};
//!
//! let chat = ChatSession::new(collaborators, ChatConfig::from_config(&config));
//! chat.start().await?;
//! chat.connect().await?;
//! let outcome = chat.submit_turn("こんにちは").await;
//! ```

pub mod api;
pub mod avatar;
pub mod chat;
pub mod error;
pub mod negotiator;
pub mod peer;
pub mod presentation;
pub mod rtc;
pub mod session;
pub mod supervisor;
pub mod transcript;
pub mod turn;

#[cfg(test)]
mod fakes;

pub use api::{StreamingApi, StreamingClient};
pub use chat::{AvatarImage, ChatConfig, ChatSession, Collaborators};
pub use error::{ConnectFailure, Result, StreamError, TalkFailure, TurnFailure};
pub use presentation::{LogSurface, PresentationController, Surface, VideoSurface};
pub use rtc::WebRtcConnector;
pub use session::{ConnectionState, StreamSession};
pub use turn::{RejectReason, TurnOutcome, TurnReport};
