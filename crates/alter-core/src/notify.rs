//! トースト通知とステータス表示
//!
//! UI 層はここを購読して、短いメッセージと接続状態のフィールドを表示します。
//! 購読者がいなくてもエラーにはなりません。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Severity of a user-facing notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl NoticeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Short transient message shown to the user
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Named status fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusField {
    Peer,
    Ice,
    Signaling,
    Streaming,
    Connecting,
    Input,
}

impl StatusField {
    pub const ALL: [StatusField; 6] = [
        Self::Peer,
        Self::Ice,
        Self::Signaling,
        Self::Streaming,
        Self::Connecting,
        Self::Input,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Peer => "peer",
            Self::Ice => "ice",
            Self::Signaling => "signaling",
            Self::Streaming => "streaming",
            Self::Connecting => "connecting",
            Self::Input => "input",
        }
    }
}

impl fmt::Display for StatusField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Notice(Notice),
    StatusChange { field: StatusField, value: String },
}

/// Broadcasts notices and status fields
pub struct StatusReporter {
    tx: broadcast::Sender<StatusEvent>,
    fields: Mutex<BTreeMap<StatusField, String>>,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            tx,
            fields: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Show a notice. Send errors only mean nobody is listening.
    pub fn notify(&self, level: NoticeLevel, text: impl Into<String>) {
        let text = text.into();
        match level {
            NoticeLevel::Error => error!(notice = %text, "Notice"),
            NoticeLevel::Warning => warn!(notice = %text, "Notice"),
            _ => info!(level = level.as_str(), notice = %text, "Notice"),
        }
        let _ = self.tx.send(StatusEvent::Notice(Notice {
            level,
            text,
            at: Utc::now(),
        }));
    }

    pub fn info(&self, text: impl Into<String>) {
        self.notify(NoticeLevel::Info, text);
    }

    pub fn success(&self, text: impl Into<String>) {
        self.notify(NoticeLevel::Success, text);
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.notify(NoticeLevel::Warning, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.notify(NoticeLevel::Error, text);
    }

    /// Update one field; unchanged values are not re-broadcast
    pub fn set_status(&self, field: StatusField, value: impl Into<String>) {
        let value = value.into();
        {
            let mut fields = match self.fields.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if fields.get(&field) == Some(&value) {
                return;
            }
            fields.insert(field, value.clone());
        }
        let _ = self.tx.send(StatusEvent::StatusChange { field, value });
    }

    pub fn status(&self, field: StatusField) -> Option<String> {
        self.snapshot().remove(&field)
    }

    pub fn snapshot(&self) -> BTreeMap<StatusField, String> {
        match self.fields.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
