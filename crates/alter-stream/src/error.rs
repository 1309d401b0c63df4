//! エラー型定義 (alter-stream)
//!
//! Display には診断用の詳細を含めます。ユーザーに見せるのは
//! `user_message()` の短い固定文だけです。

use std::fmt;

use thiserror::Error;

/// Why a connect attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    /// The streaming service refused the avatar image
    AvatarRejected,
    /// Unreachable, timed out, or the peer never came up
    Network,
    /// Unexpected status or malformed response
    Protocol,
}

impl ConnectFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AvatarRejected => "avatar-rejected",
            Self::Network => "network",
            Self::Protocol => "protocol",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AvatarRejected => {
                "The avatar image could not be used for video. Try a different image."
            }
            Self::Network | Self::Protocol => {
                "Could not connect to the video service. Please try again."
            }
        }
    }
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status-specific cause of a failed talk submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TalkFailure {
    BadRequest,
    PaymentRequired,
    NotFound,
    Other,
}

impl TalkFailure {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            402 => Self::PaymentRequired,
            404 => Self::NotFound,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::PaymentRequired => "payment-required",
            Self::NotFound => "not-found",
            Self::Other => "other",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest => "The video service did not accept the reply. Please try again.",
            Self::PaymentRequired => "The video service quota has been used up.",
            Self::NotFound => "The video stream has expired. Use /reconnect to start a new one.",
            Self::Other => "The video service had a problem. Please try again.",
        }
    }
}

impl fmt::Display for TalkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which step of a turn failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnFailure {
    Connection(ConnectFailure),
    Conversation,
    Reply,
    Persistence,
    Speech,
    AudioTooShort,
    AudioTooLong,
    Upload,
    Talk(TalkFailure),
}

impl TurnFailure {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Connection(cause) => cause.user_message(),
            Self::Conversation => "Could not open the conversation. Please try again.",
            Self::Reply => "Could not get a reply. Please try again.",
            Self::Persistence => "Your message could not be saved. Please try again.",
            Self::Speech => "Speech could not be generated. Please try again.",
            Self::AudioTooShort => "The reply was too short to animate.",
            Self::AudioTooLong => "The reply was too long to animate. Try asking for a shorter answer.",
            Self::Upload => "Could not prepare the avatar image. Please try again.",
            Self::Talk(failure) => failure.user_message(),
        }
    }
}

/// alter-stream のエラー型
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Connection failed ({cause}): {detail}")]
    Connection { cause: ConnectFailure, detail: String },

    /// `retryable` is set only for a 400 that reads as "not ready yet"
    #[error("Talk request failed ({failure}): {detail}")]
    Talk {
        failure: TalkFailure,
        retryable: bool,
        detail: String,
    },

    #[error("Peer connection error: {0}")]
    Peer(String),

    #[error("No active stream")]
    NotConnected,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid avatar image: {0}")]
    InvalidImage(String),

    #[error(transparent)]
    Core(#[from] alter_core::Error),

    #[error(transparent)]
    Voice(#[from] alter_voice::VoiceError),
}

impl StreamError {
    pub fn connection(cause: ConnectFailure, detail: impl Into<String>) -> Self {
        Self::Connection {
            cause,
            detail: detail.into(),
        }
    }

    /// Connect-time classification of any error
    pub fn connect_failure(&self) -> ConnectFailure {
        match self {
            Self::Connection { cause, .. } => *cause,
            Self::Timeout(_) | Self::Peer(_) => ConnectFailure::Network,
            _ => ConnectFailure::Protocol,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Connection { cause, .. } => cause.user_message(),
            Self::Talk { failure, .. } => failure.user_message(),
            Self::Peer(_) | Self::Timeout(_) | Self::NotConnected => {
                ConnectFailure::Network.user_message()
            }
            Self::InvalidImage(_) => "That image could not be used as an avatar.",
            Self::Core(_) => "Something went wrong. Please try again.",
            Self::Voice(e) => e.user_message(),
        }
    }
}

/// Result 型エイリアス
pub type Result<T> = std::result::Result<T, StreamError>;
