//! In-memory collaborators for tests

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use alter_core::{ChatMessage, FileUploader, ReplyGenerator};
use alter_voice::{SpeechSynthesizer, SynthesizedAudio, VoiceError};
use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use crate::api::{CreatedStream, IceCandidate, IceServer, SessionDescription, StreamingApi};
use crate::error::{ConnectFailure, Result, StreamError, TalkFailure};
use crate::peer::{MediaPeer, Negotiated, PeerConnector};
use crate::presentation::{Surface, VideoSurface};
use crate::session::StreamIds;

#[derive(Default)]
struct ApiState {
    create_calls: usize,
    failures_left: usize,
    failure: Option<ConnectFailure>,
    sdp_answers: Vec<String>,
    ice: usize,
    fail_ice: bool,
    talk_status: Option<u16>,
    talks: Vec<(String, String)>,
    deleted: usize,
}

#[derive(Default)]
pub struct FakeStreamingApi {
    state: Mutex<ApiState>,
    ice_pushed: Notify,
}

impl FakeStreamingApi {
    pub fn fail_creates(&self, times: usize, cause: ConnectFailure) {
        let mut state = self.state.lock().unwrap();
        state.failures_left = times;
        state.failure = Some(cause);
    }

    pub fn fail_ice(&self, fail: bool) {
        self.state.lock().unwrap().fail_ice = fail;
    }

    /// `None` accepts every talk
    pub fn talk_status(&self, status: Option<u16>) {
        self.state.lock().unwrap().talk_status = status;
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    pub fn sdp_answers(&self) -> Vec<String> {
        self.state.lock().unwrap().sdp_answers.clone()
    }

    pub fn ice_count(&self) -> usize {
        self.state.lock().unwrap().ice
    }

    pub async fn wait_for_ice(&self, count: usize) {
        loop {
            let notified = self.ice_pushed.notified();
            if self.ice_count() >= count {
                return;
            }
            notified.await;
        }
    }

    pub fn talk_calls(&self) -> usize {
        self.state.lock().unwrap().talks.len()
    }

    pub fn talks(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().talks.clone()
    }

    pub fn deleted(&self) -> usize {
        self.state.lock().unwrap().deleted
    }
}

#[async_trait]
impl StreamingApi for FakeStreamingApi {
    async fn create_stream(&self, _source_url: &str, _voice_id: &str) -> Result<CreatedStream> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        if state.failures_left > 0 {
            state.failures_left -= 1;
            let cause = state.failure.unwrap_or(ConnectFailure::Network);
            return Err(StreamError::connection(cause, "scripted failure"));
        }
        let n = state.create_calls;
        Ok(CreatedStream {
            ids: StreamIds {
                stream_id: format!("strm_{n}"),
                session_id: format!("sess_{n}"),
            },
            offer: SessionDescription {
                sdp_type: "offer".to_string(),
                sdp: "offer-sdp".to_string(),
            },
            ice_servers: vec![IceServer {
                urls: vec!["turn:relay".to_string()],
                ..Default::default()
            }],
        })
    }

    async fn submit_sdp(&self, _ids: &StreamIds, answer: &SessionDescription) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .sdp_answers
            .push(answer.sdp.clone());
        Ok(())
    }

    async fn submit_ice(&self, _ids: &StreamIds, _candidate: &IceCandidate) -> Result<()> {
        let fail = {
            let mut state = self.state.lock().unwrap();
            state.ice += 1;
            state.fail_ice
        };
        self.ice_pushed.notify_waiters();
        if fail {
            return Err(StreamError::connection(ConnectFailure::Network, "ice rejected"));
        }
        Ok(())
    }

    async fn talk(&self, _ids: &StreamIds, audio_url: &str, source_url: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .talks
            .push((audio_url.to_string(), source_url.to_string()));
        match state.talk_status {
            None => Ok(()),
            Some(status) => Err(StreamError::Talk {
                failure: TalkFailure::from_status(status),
                retryable: status == 400,
                detail: format!("{status}"),
            }),
        }
    }

    async fn delete_stream(&self, _ids: &StreamIds) -> Result<()> {
        self.state.lock().unwrap().deleted += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePeer {
    bytes: AtomicU64,
    closed: AtomicBool,
}

impl FakePeer {
    pub fn add_bytes(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaPeer for FakePeer {
    async fn inbound_video_bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePeerConnector {
    candidates: usize,
    latest: Mutex<Option<Arc<FakePeer>>>,
}

impl FakePeerConnector {
    pub fn with_candidates(candidates: usize) -> Self {
        Self {
            candidates,
            latest: Mutex::new(None),
        }
    }

    /// Peer of the most recent negotiation
    pub fn peer(&self) -> Arc<FakePeer> {
        self.latest.lock().unwrap().clone().expect("no peer negotiated")
    }
}

#[async_trait]
impl PeerConnector for FakePeerConnector {
    async fn negotiate(
        &self,
        _offer: &SessionDescription,
        _ice_servers: &[IceServer],
    ) -> Result<Negotiated> {
        let peer = Arc::new(FakePeer::default());
        *self.latest.lock().unwrap() = Some(peer.clone());

        let (ice_tx, ice_rx) = mpsc::channel(16);
        for i in 0..self.candidates {
            let _ = ice_tx
                .send(IceCandidate {
                    candidate: format!("candidate:{i}"),
                    sdp_mid: Some("0".to_string()),
                    sdp_mline_index: Some(0),
                })
                .await;
        }
        let (_event_tx, event_rx) = mpsc::channel(1);

        Ok(Negotiated {
            peer,
            answer: SessionDescription::answer("answer-sdp"),
            candidates: ice_rx,
            events: event_rx,
        })
    }
}

#[derive(Default)]
pub struct RecordingSurface {
    pub shown: Mutex<Vec<Surface>>,
}

#[async_trait]
impl VideoSurface for RecordingSurface {
    fn show(&self, surface: Surface, _image_url: &str) {
        self.shown.lock().unwrap().push(surface);
    }

    async fn play_live(&self) {}
}

/// Reply generator that can be held open
#[derive(Default)]
pub struct FakeReplies {
    pub calls: AtomicUsize,
    pub history_lens: Mutex<Vec<usize>>,
    pub last_history: Mutex<Vec<ChatMessage>>,
    gate: Mutex<Option<Arc<Notify>>>,
    fail: AtomicBool,
}

impl FakeReplies {
    /// Block every reply until the returned notify fires
    pub fn hold(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(notify.clone());
        notify
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReplyGenerator for FakeReplies {
    async fn generate_reply(
        &self,
        _persona: &str,
        message: &str,
        history: &[ChatMessage],
    ) -> alter_core::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.history_lens.lock().unwrap().push(history.len());
        *self.last_history.lock().unwrap() = history.to_vec();
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(alter_core::Error::LlmApi("scripted".to_string()));
        }
        Ok(format!("reply to {message}"))
    }
}

/// Speech with a scripted duration
pub struct FakeSpeech {
    pub duration_secs: Mutex<f64>,
    pub calls: AtomicUsize,
}

impl Default for FakeSpeech {
    fn default() -> Self {
        Self {
            duration_secs: Mutex::new(3.0),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeSpeech {
    pub fn set_duration(&self, secs: f64) {
        *self.duration_secs.lock().unwrap() = secs;
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(
        &self,
        _text: &str,
        _voice_id: &str,
    ) -> std::result::Result<SynthesizedAudio, VoiceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SynthesizedAudio {
            url: format!("https://cdn.example.com/u/speech-{n}.mp3"),
            duration_secs: *self.duration_secs.lock().unwrap(),
        })
    }
}

pub const HOSTED_PREFIX: &str = "https://cdn.example.com/u/";

#[derive(Default)]
pub struct FakeUploader {
    pub uploads: AtomicUsize,
    pub rehosted: Mutex<Vec<String>>,
}

#[async_trait]
impl FileUploader for FakeUploader {
    async fn upload(
        &self,
        _data: Vec<u8>,
        file_name: &str,
        _content_type: &str,
    ) -> alter_core::Result<String> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{HOSTED_PREFIX}{n}-{file_name}"))
    }

    fn is_hosted(&self, url: &str) -> bool {
        url.starts_with(HOSTED_PREFIX)
    }

    async fn rehost_url(&self, url: &str) -> alter_core::Result<String> {
        self.rehosted.lock().unwrap().push(url.to_string());
        let name = url.rsplit('/').next().unwrap_or("file");
        Ok(format!("{HOSTED_PREFIX}rehosted-{name}"))
    }
}
