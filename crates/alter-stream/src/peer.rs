//! Peer connection seam
//!
//! The negotiator only needs an answer, a stream of local candidates, state
//! notifications, and a byte counter. [`crate::rtc`] provides the real
//! implementation; tests use in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::api::{IceCandidate, IceServer, SessionDescription};
use crate::error::Result;

/// Coarse peer-connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }

    /// The media path is gone for good
    pub fn is_lost(&self) -> bool {
        matches!(self, Self::Failed | Self::Disconnected)
    }
}

/// State callbacks surfaced as status fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Connection(PeerState),
    Ice(String),
    Signaling(String),
}

/// A negotiated peer connection
#[async_trait]
pub trait MediaPeer: Send + Sync {
    /// Cumulative inbound video bytes since the peer was created
    async fn inbound_video_bytes(&self) -> u64;

    /// Close the connection and stop its tracks
    async fn close(&self) -> Result<()>;
}

/// Output of a successful negotiation
pub struct Negotiated {
    pub peer: Arc<dyn MediaPeer>,
    pub answer: SessionDescription,
    pub candidates: mpsc::Receiver<IceCandidate>,
    pub events: mpsc::Receiver<PeerEvent>,
}

/// Builds relay-only peers and answers remote offers
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn negotiate(
        &self,
        offer: &SessionDescription,
        ice_servers: &[IceServer],
    ) -> Result<Negotiated>;
}
