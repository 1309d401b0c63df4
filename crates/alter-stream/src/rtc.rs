//! WebRTC peer connection (webrtc-rs)
//!
//! Relay-only ICE: the streaming service hands out TURN servers and every
//! candidate goes through them. Inbound video is drained from the track and
//! counted, which is what playback detection samples.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use crate::api::{IceCandidate, IceServer, SessionDescription};
use crate::error::{Result, StreamError};
use crate::peer::{MediaPeer, Negotiated, PeerConnector, PeerEvent, PeerState};

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New => PeerState::New,
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Closed => PeerState::Closed,
            _ => PeerState::New,
        }
    }
}

impl From<webrtc::Error> for StreamError {
    fn from(e: webrtc::Error) -> Self {
        StreamError::Peer(e.to_string())
    }
}

fn rtc_ice_servers(servers: &[IceServer]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}

/// Negotiates webrtc-rs peers
#[derive(Debug, Default, Clone)]
pub struct WebRtcConnector;

impl WebRtcConnector {
    pub fn new() -> Self {
        Self
    }

    async fn build_peer(&self, ice_servers: &[IceServer]) -> Result<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: rtc_ice_servers(ice_servers),
            ice_transport_policy: RTCIceTransportPolicy::Relay,
            ..Default::default()
        };

        Ok(Arc::new(api.new_peer_connection(config).await?))
    }

    /// Count payload bytes until the track ends
    async fn drain_track(track: Arc<TrackRemote>, counter: Option<Arc<AtomicU64>>) {
        let kind = track.kind();
        loop {
            match track.read_rtp().await {
                Ok((packet, _)) => {
                    if let Some(counter) = &counter {
                        counter.fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
                    }
                }
                Err(e) => {
                    debug!(kind = %kind, error = %e, "Track read ended");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn negotiate(
        &self,
        offer: &SessionDescription,
        ice_servers: &[IceServer],
    ) -> Result<Negotiated> {
        let pc = self.build_peer(ice_servers).await?;

        let (ice_tx, ice_rx) = mpsc::channel::<IceCandidate>(64);
        let (event_tx, event_rx) = mpsc::channel::<PeerEvent>(32);
        let video_bytes = Arc::new(AtomicU64::new(0));

        pc.on_ice_candidate(Box::new(move |candidate| {
            let ice_tx = ice_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = ice_tx
                            .send(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            })
                            .await;
                    }
                    Err(e) => warn!(error = %e, "Could not serialize local candidate"),
                }
            })
        }));

        let tx = event_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let tx = tx.clone();
            let state = PeerState::from(state);
            info!(state = state.as_str(), "Peer connection state changed");
            Box::pin(async move {
                let _ = tx.send(PeerEvent::Connection(state)).await;
            })
        }));

        let tx = event_tx.clone();
        pc.on_ice_connection_state_change(Box::new(move |state| {
            let tx = tx.clone();
            debug!(ice_state = %state, "ICE connection state changed");
            Box::pin(async move {
                let _ = tx.send(PeerEvent::Ice(state.to_string())).await;
            })
        }));

        let tx = event_tx;
        pc.on_signaling_state_change(Box::new(move |state| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(PeerEvent::Signaling(state.to_string())).await;
            })
        }));

        let counter = video_bytes.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let counter = counter.clone();
            Box::pin(async move {
                let is_video = track.kind() == RTPCodecType::Video;
                info!(
                    kind = %track.kind(),
                    codec = %track.codec().capability.mime_type,
                    "Remote track received"
                );
                // Audio is drained too so the receiver never stalls
                tokio::spawn(WebRtcConnector::drain_track(
                    track,
                    is_video.then_some(counter),
                ));
            })
        }));

        let remote = RTCSessionDescription::offer(offer.sdp.clone())
            .map_err(|e| StreamError::Peer(format!("invalid offer: {}", e)))?;
        pc.set_remote_description(remote).await?;

        let answer = pc.create_answer(None).await?;
        pc.set_local_description(answer.clone()).await?;

        Ok(Negotiated {
            peer: Arc::new(RtcPeer {
                inner: pc,
                video_bytes,
            }),
            answer: SessionDescription::answer(answer.sdp),
            candidates: ice_rx,
            events: event_rx,
        })
    }
}

/// Live webrtc-rs connection
pub struct RtcPeer {
    inner: Arc<RTCPeerConnection>,
    video_bytes: Arc<AtomicU64>,
}

#[async_trait]
impl MediaPeer for RtcPeer {
    async fn inbound_video_bytes(&self) -> u64 {
        self.video_bytes.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await?;
        Ok(())
    }
}
