//! Streaming session state

use std::fmt;

/// Remote identifiers of one negotiated stream. Both exist or neither does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamIds {
    pub stream_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One real-time media connection, live or being attempted
#[derive(Debug, Clone, Default)]
pub struct StreamSession {
    pub ids: Option<StreamIds>,
    pub state: ConnectionState,
    pub last_bytes_received: u64,
    pub is_playing: bool,
}

impl StreamSession {
    /// Connected with both identifiers present
    pub fn is_live(&self) -> bool {
        self.state == ConnectionState::Connected && self.ids.is_some()
    }

    /// Forget the remote stream
    pub fn clear(&mut self, state: ConnectionState) {
        self.ids = None;
        self.state = state;
        self.last_bytes_received = 0;
        self.is_playing = false;
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.ids.as_ref().map(|ids| ids.stream_id.as_str())
    }
}
