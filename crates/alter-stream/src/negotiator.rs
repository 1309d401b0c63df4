//! Media session negotiation
//!
//! Owns the one [`StreamSession`] of a chat: creates the remote stream,
//! answers its offer over a relay-only peer, pushes local ICE candidates,
//! samples inbound video to detect playback, submits talks, and tears it
//! all down again.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use alter_core::{StatusField, StatusReporter, StreamingConfig};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{
    CreatedStream, IceCandidate, SessionDescription, StreamingApi, TalkRetry, talk_with_retry,
};
use crate::error::{ConnectFailure, Result, StreamError};
use crate::peer::{MediaPeer, PeerConnector, PeerEvent};
use crate::presentation::PresentationController;
use crate::session::{ConnectionState, StreamIds, StreamSession};

struct Shared {
    session: StreamSession,
    peer: Option<Arc<dyn MediaPeer>>,
    /// Cancels every task bound to the current stream
    cancel: CancellationToken,
    /// Bumped on teardown so late task output is discarded
    generation: u64,
}

pub struct Negotiator {
    api: Arc<dyn StreamingApi>,
    connector: Arc<dyn PeerConnector>,
    reporter: Arc<StatusReporter>,
    presentation: Arc<PresentationController>,
    config: StreamingConfig,
    shared: Mutex<Shared>,
}

impl Negotiator {
    pub fn new(
        api: Arc<dyn StreamingApi>,
        connector: Arc<dyn PeerConnector>,
        reporter: Arc<StatusReporter>,
        presentation: Arc<PresentationController>,
        config: StreamingConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            connector,
            reporter,
            presentation,
            config,
            shared: Mutex::new(Shared {
                session: StreamSession::default(),
                peer: None,
                cancel: CancellationToken::new(),
                generation: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Snapshot of the session
    pub fn session(&self) -> StreamSession {
        self.lock().session.clone()
    }

    pub fn is_live(&self) -> bool {
        self.lock().session.is_live()
    }

    pub fn ids(&self) -> Option<StreamIds> {
        self.lock().session.ids.clone()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.lock().session.state = state;
    }

    async fn bounded<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.request_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(StreamError::Timeout(what.to_string())),
        }
    }

    /// Ask the remote service for a new stream
    pub async fn create_session(
        &self,
        avatar_image_url: &str,
        voice_id: &str,
    ) -> Result<CreatedStream> {
        let created = self
            .bounded(
                "create stream",
                self.api.create_stream(avatar_image_url, voice_id),
            )
            .await?;

        let mut shared = self.lock();
        shared.session.ids = Some(created.ids.clone());
        shared.session.state = ConnectionState::Connecting;
        Ok(created)
    }

    /// Answer the remote offer and start forwarding local candidates
    pub async fn negotiate(self: &Arc<Self>, created: &CreatedStream) -> Result<SessionDescription> {
        let negotiated = self
            .bounded(
                "peer negotiation",
                self.connector.negotiate(&created.offer, &created.ice_servers),
            )
            .await?;

        let accepted = {
            let mut shared = self.lock();
            if shared.session.ids.as_ref() == Some(&created.ids) {
                shared.peer = Some(Arc::clone(&negotiated.peer));
                Some((shared.cancel.clone(), shared.generation))
            } else {
                None
            }
        };
        let Some((cancel, generation)) = accepted else {
            if let Err(e) = negotiated.peer.close().await {
                warn!("Closing superseded peer failed: {}", e);
            }
            return Err(StreamError::connection(
                ConnectFailure::Protocol,
                "stream was replaced during negotiation",
            ));
        };

        self.spawn_ice_forwarder(created.ids.clone(), negotiated.candidates, cancel.clone());
        self.spawn_event_pump(negotiated.events, cancel, generation);

        Ok(negotiated.answer)
    }

    /// Hand the local answer back to the remote service
    pub async fn submit_answer(&self, answer: &SessionDescription) -> Result<()> {
        let ids = self.ids().ok_or(StreamError::NotConnected)?;
        self.bounded("submit sdp", self.api.submit_sdp(&ids, answer))
            .await
    }

    /// Mark the session connected and start sampling playback
    pub fn mark_connected(self: &Arc<Self>) {
        {
            let mut shared = self.lock();
            shared.session.state = ConnectionState::Connected;
            shared.session.last_bytes_received = 0;
            shared.session.is_playing = false;
        }
        self.reporter.set_status(StatusField::Streaming, "inactive");
        self.observe_playback();
    }

    fn spawn_ice_forwarder(
        self: &Arc<Self>,
        ids: StreamIds,
        mut candidates: mpsc::Receiver<IceCandidate>,
        cancel: CancellationToken,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let candidate = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = candidates.recv() => match next {
                        Some(candidate) => candidate,
                        None => break,
                    },
                };

                debug!(stream_id = %ids.stream_id, "Pushing ICE candidate");
                let pushed = this
                    .bounded("submit ice", this.api.submit_ice(&ids, &candidate))
                    .await;
                if let Err(e) = pushed {
                    if cancel.is_cancelled() {
                        break;
                    }
                    warn!(stream_id = %ids.stream_id, "ICE candidate push failed: {}", e);
                    this.reporter
                        .warning("A network route could not be shared. Video may take longer to start.");
                }
            }
            debug!(stream_id = %ids.stream_id, "ICE forwarder stopped");
        });
    }

    fn spawn_event_pump(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<PeerEvent>,
        cancel: CancellationToken,
        generation: u64,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = events.recv() => match next {
                        Some(event) => event,
                        None => break,
                    },
                };

                match event {
                    PeerEvent::Connection(state) => {
                        this.reporter.set_status(StatusField::Peer, state.as_str());
                        if state.is_lost() && this.mark_lost(generation) {
                            this.reporter
                                .warning("The video connection was lost. It will reconnect on your next message.");
                        }
                    }
                    PeerEvent::Ice(state) => this.reporter.set_status(StatusField::Ice, state),
                    PeerEvent::Signaling(state) => {
                        this.reporter.set_status(StatusField::Signaling, state)
                    }
                }
            }
        });
    }

    /// Flag a connected session as failed; false if it is not ours anymore
    fn mark_lost(&self, generation: u64) -> bool {
        let mut shared = self.lock();
        if shared.generation != generation || shared.session.state != ConnectionState::Connected {
            return false;
        }
        shared.session.state = ConnectionState::Failed;
        true
    }

    /// Sample inbound video every `stats_interval`; an increase since the
    /// previous sample means playback is active
    pub fn observe_playback(self: &Arc<Self>) {
        let (peer, cancel, generation) = {
            let shared = self.lock();
            match &shared.peer {
                Some(peer) => (Arc::clone(peer), shared.cancel.clone(), shared.generation),
                None => return,
            }
        };

        let this = Arc::clone(self);
        let interval = self.config.stats_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let bytes = peer.inbound_video_bytes().await;
                if !this.record_sample(generation, bytes) {
                    break;
                }
            }
            debug!("Playback sampler stopped");
        });
    }

    /// Apply one sample; false once the session has moved on
    fn record_sample(self: &Arc<Self>, generation: u64, bytes: u64) -> bool {
        let mut shared = self.lock();
        if shared.generation != generation || shared.cancel.is_cancelled() {
            return false;
        }

        let active = bytes > shared.session.last_bytes_received;
        shared.session.last_bytes_received = bytes;
        if active == shared.session.is_playing {
            return true;
        }
        shared.session.is_playing = active;

        // Under the lock so a concurrent teardown is ordered after this edge
        self.presentation.playback_changed(active);
        self.reporter.set_status(
            StatusField::Streaming,
            if active { "active" } else { "inactive" },
        );
        true
    }

    /// Submit audio plus avatar image to the live stream
    pub async fn send_talk(&self, audio_url: &str, avatar_image_url: &str) -> Result<()> {
        let ids = match self.lock().session.ids.clone() {
            Some(ids) => ids,
            None => return Err(StreamError::NotConnected),
        };

        info!(stream_id = %ids.stream_id, "Sending talk");
        talk_with_retry(
            self.api.as_ref(),
            &ids,
            audio_url,
            avatar_image_url,
            TalkRetry::from_config(&self.config),
        )
        .await
    }

    /// Close the peer, stop sampling, delete the remote stream, and clear
    /// the session. Safe to call in any state.
    pub async fn teardown(&self) {
        let (peer, ids) = {
            let mut shared = self.lock();
            shared.cancel.cancel();
            shared.cancel = CancellationToken::new();
            shared.generation += 1;
            let ids = shared.session.ids.clone();
            shared.session.clear(ConnectionState::Closed);
            (shared.peer.take(), ids)
        };

        self.presentation.teardown();
        self.reporter.set_status(StatusField::Streaming, "inactive");

        if let Some(peer) = peer {
            if let Err(e) = peer.close().await {
                warn!("Closing peer failed: {}", e);
            }
        }

        if let Some(ids) = ids {
            match tokio::time::timeout(
                self.config.request_timeout(),
                self.api.delete_stream(&ids),
            )
            .await
            {
                Ok(Ok(())) => debug!(stream_id = %ids.stream_id, "Remote stream deleted"),
                Ok(Err(e)) => warn!(stream_id = %ids.stream_id, "Deleting remote stream failed: {}", e),
                Err(_) => warn!(stream_id = %ids.stream_id, "Deleting remote stream timed out"),
            }
            info!(stream_id = %ids.stream_id, "Stream torn down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TalkFailure;
    use crate::fakes::{FakePeerConnector, FakeStreamingApi, RecordingSurface};
    use crate::presentation::Surface;
    use std::time::Duration;

    fn negotiator(
        api: Arc<FakeStreamingApi>,
        connector: Arc<FakePeerConnector>,
    ) -> (Arc<Negotiator>, Arc<PresentationController>, Arc<StatusReporter>) {
        let reporter = Arc::new(StatusReporter::new());
        let presentation =
            PresentationController::new(Arc::new(RecordingSurface::default()), "https://img/a.png");
        let config = StreamingConfig {
            talk_backoff_ms: 10,
            ..Default::default()
        };
        let negotiator = Negotiator::new(
            api,
            connector,
            reporter.clone(),
            presentation.clone(),
            config,
        );
        (negotiator, presentation, reporter)
    }

    async fn connect(negotiator: &Arc<Negotiator>) {
        let created = negotiator.create_session("https://img/a.png", "v").await.unwrap();
        let answer = negotiator.negotiate(&created).await.unwrap();
        negotiator.submit_answer(&answer).await.unwrap();
        negotiator.mark_connected();
    }

    #[tokio::test]
    async fn test_handshake_forwards_candidates() {
        let api = Arc::new(FakeStreamingApi::default());
        let connector = Arc::new(FakePeerConnector::with_candidates(2));
        let (negotiator, _, _) = negotiator(api.clone(), connector);

        connect(&negotiator).await;
        assert!(negotiator.is_live());
        assert_eq!(api.sdp_answers(), vec!["answer-sdp".to_string()]);

        api.wait_for_ice(2).await;
        assert_eq!(api.ice_count(), 2);
    }

    #[tokio::test]
    async fn test_ice_failure_is_only_a_warning() {
        let api = Arc::new(FakeStreamingApi::default());
        api.fail_ice(true);
        let connector = Arc::new(FakePeerConnector::with_candidates(1));
        let (negotiator, _, reporter) = negotiator(api.clone(), connector);
        let mut events = reporter.subscribe();

        connect(&negotiator).await;

        loop {
            if let alter_core::StatusEvent::Notice(notice) = events.recv().await.unwrap() {
                assert_eq!(notice.level, alter_core::NoticeLevel::Warning);
                break;
            }
        }
        assert!(negotiator.is_live());
    }

    #[tokio::test]
    async fn test_peer_for_replaced_stream_is_closed() {
        let api = Arc::new(FakeStreamingApi::default());
        let connector = Arc::new(FakePeerConnector::default());
        let (negotiator, _, _) = negotiator(api, connector.clone());

        let created = negotiator.create_session("https://img/a.png", "v").await.unwrap();
        negotiator.teardown().await;

        let err = negotiator.negotiate(&created).await.unwrap_err();
        assert!(matches!(err, StreamError::Connection { .. }), "{err:?}");
        assert!(connector.peer().is_closed());
        assert!(negotiator.session().ids.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_drives_presentation() {
        let api = Arc::new(FakeStreamingApi::default());
        let connector = Arc::new(FakePeerConnector::default());
        let (negotiator, presentation, _) = negotiator(api, connector.clone());
        connect(&negotiator).await;

        assert_eq!(presentation.current(), Surface::StaticImage);

        connector.peer().add_bytes(1000);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(presentation.current(), Surface::LiveVideo);
        assert!(negotiator.session().is_playing);

        // No new bytes for one interval
        tokio::time::sleep(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;
        assert_eq!(presentation.current(), Surface::StaticImage);
        assert!(!negotiator.session().is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_stops_sampling_and_clears() {
        let api = Arc::new(FakeStreamingApi::default());
        let connector = Arc::new(FakePeerConnector::default());
        let (negotiator, presentation, _) = negotiator(api.clone(), connector.clone());
        connect(&negotiator).await;

        connector.peer().add_bytes(1000);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(presentation.current(), Surface::LiveVideo);

        negotiator.teardown().await;
        let session = negotiator.session();
        assert!(session.ids.is_none());
        assert_eq!(session.state, ConnectionState::Closed);
        assert_eq!(presentation.current(), Surface::StaticImage);
        assert!(connector.peer().is_closed());
        assert_eq!(api.deleted(), 1);

        // Bytes after teardown never reach the presentation
        connector.peer().add_bytes(5000);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(presentation.current(), Surface::StaticImage);
    }

    #[tokio::test]
    async fn test_send_talk_requires_stream() {
        let (negotiator, _, _) = negotiator(
            Arc::new(FakeStreamingApi::default()),
            Arc::new(FakePeerConnector::default()),
        );
        assert!(matches!(
            negotiator.send_talk("https://a/x.mp3", "https://img/a.png").await,
            Err(StreamError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_talk_gives_up_after_three_not_ready() {
        let api = Arc::new(FakeStreamingApi::default());
        api.talk_status(Some(400));
        let (negotiator, _, _) = negotiator(api.clone(), Arc::new(FakePeerConnector::default()));
        connect(&negotiator).await;

        let err = negotiator
            .send_talk("https://a/x.mp3", "https://img/a.png")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::Talk {
                failure: TalkFailure::BadRequest,
                ..
            }
        ));
        assert_eq!(api.talk_calls(), 3);
    }

    #[tokio::test]
    async fn test_send_talk_payment_required_is_immediate() {
        let api = Arc::new(FakeStreamingApi::default());
        api.talk_status(Some(402));
        let (negotiator, _, _) = negotiator(api.clone(), Arc::new(FakePeerConnector::default()));
        connect(&negotiator).await;

        let err = negotiator
            .send_talk("https://a/x.mp3", "https://img/a.png")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::Talk {
                failure: TalkFailure::PaymentRequired,
                ..
            }
        ));
        assert_eq!(api.talk_calls(), 1);
    }
}
