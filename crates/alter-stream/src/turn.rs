//! Turn pipeline
//!
//! One turn takes typed text to a talking avatar: guard, connect, persist,
//! reply, persist, synthesize, gate on duration, host the image, talk, and
//! wait for the live video. Every failure ends the turn with a notice; the
//! stream and the conversation stay as they were.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alter_core::{
    ChatMessage, ConversationManager, ReplyGenerator, Role, StatusField, StatusReporter,
    TurnConfig,
};
use alter_voice::{SpeechSynthesizer, SynthesizedAudio, VoiceError, check_duration};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::avatar::AvatarState;
use crate::error::{ConnectFailure, StreamError, TalkFailure, TurnFailure};
use crate::presentation::PresentationController;
use crate::supervisor::ConnectionSupervisor;
use crate::transcript::Transcript;

/// Why a submission never became a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Empty,
    /// Same text is already in flight
    Duplicate,
    /// Another turn is running
    Busy,
}

impl RejectReason {
    /// Notice to show, if any. Duplicates are dropped without one.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            Self::Empty => Some("Type a message first."),
            Self::Duplicate => None,
            Self::Busy => Some("Please wait for the current reply to finish."),
        }
    }
}

/// Content key of a submission
pub fn turn_key(text: &str) -> String {
    hex::encode(Sha256::digest(text.trim().as_bytes()))
}

#[derive(Debug, Default)]
struct InFlightState {
    keys: HashSet<String>,
    active: usize,
}

fn lock_state(state: &Mutex<InFlightState>) -> MutexGuard<'_, InFlightState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Admission control for turns
#[derive(Debug)]
pub struct InFlightTurns {
    next_turn: AtomicU64,
    state: Arc<Mutex<InFlightState>>,
    allow_concurrent: bool,
}

impl InFlightTurns {
    pub fn new(allow_concurrent: bool) -> Self {
        Self {
            next_turn: AtomicU64::new(1),
            state: Arc::new(Mutex::new(InFlightState::default())),
            allow_concurrent,
        }
    }

    /// Admit `text` or say why not. Never awaits.
    pub fn try_begin(&self, text: &str) -> Result<TurnTicket, RejectReason> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(RejectReason::Empty);
        }

        let key = turn_key(trimmed);
        {
            let mut state = lock_state(&self.state);
            if state.keys.contains(&key) {
                return Err(RejectReason::Duplicate);
            }
            if state.active > 0 && !self.allow_concurrent {
                return Err(RejectReason::Busy);
            }
            state.keys.insert(key.clone());
            state.active += 1;
        }

        Ok(TurnTicket {
            turn_no: self.next_turn.fetch_add(1, Ordering::SeqCst),
            key,
            text: trimmed.to_string(),
            started_at: Instant::now(),
            state: Arc::clone(&self.state),
        })
    }

    pub fn active(&self) -> usize {
        lock_state(&self.state).active
    }
}

/// An admitted turn. Dropping it releases its key.
#[derive(Debug)]
pub struct TurnTicket {
    pub turn_no: u64,
    pub key: String,
    pub text: String,
    pub started_at: Instant,
    state: Arc<Mutex<InFlightState>>,
}

impl Drop for TurnTicket {
    fn drop(&mut self) {
        let mut state = lock_state(&self.state);
        state.keys.remove(&self.key);
        state.active = state.active.saturating_sub(1);
    }
}

/// What a completed turn produced
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub turn_no: u64,
    pub user: ChatMessage,
    pub reply: ChatMessage,
    pub audio: SynthesizedAudio,
    pub image_url: String,
    /// Whether live video showed up within the wait
    pub live: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed(TurnReport),
    Rejected(RejectReason),
    Failed(TurnFailure),
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Everything a turn touches
pub struct TurnContext {
    pub supervisor: Arc<ConnectionSupervisor>,
    pub conversations: Arc<ConversationManager>,
    pub replies: Arc<dyn ReplyGenerator>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub avatar: Arc<AvatarState>,
    pub transcript: Arc<Transcript>,
    pub reporter: Arc<StatusReporter>,
    pub presentation: Arc<PresentationController>,
}

pub struct TurnPipeline {
    ctx: TurnContext,
    in_flight: InFlightTurns,
    user_id: String,
    history_limit: usize,
    live_wait: Duration,
}

fn speech_failure(e: &VoiceError) -> TurnFailure {
    match e {
        VoiceError::DurationOutOfRange { duration_secs, .. } if *duration_secs < 1.0 => {
            TurnFailure::AudioTooShort
        }
        VoiceError::DurationOutOfRange { .. } => TurnFailure::AudioTooLong,
        _ => TurnFailure::Speech,
    }
}

fn talk_failure(e: &StreamError) -> TurnFailure {
    match e {
        StreamError::Talk { failure, .. } => TurnFailure::Talk(*failure),
        StreamError::NotConnected => TurnFailure::Connection(ConnectFailure::Network),
        StreamError::Connection { cause, .. } => TurnFailure::Connection(*cause),
        _ => TurnFailure::Talk(TalkFailure::Other),
    }
}

impl TurnPipeline {
    pub fn new(
        ctx: TurnContext,
        user_id: impl Into<String>,
        turns: &TurnConfig,
        live_wait: Duration,
    ) -> Self {
        Self {
            ctx,
            in_flight: InFlightTurns::new(turns.allow_concurrent),
            user_id: user_id.into(),
            history_limit: turns.history_limit.max(1),
            live_wait,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.active()
    }

    /// Run one turn for `text`
    pub async fn submit(&self, text: &str) -> TurnOutcome {
        let ticket = match self.in_flight.try_begin(text) {
            Ok(ticket) => ticket,
            Err(reason) => {
                match reason.user_message() {
                    Some(message) => self.ctx.reporter.warning(message),
                    None => debug!("Duplicate submission dropped"),
                }
                return TurnOutcome::Rejected(reason);
            }
        };

        info!(turn = ticket.turn_no, "Turn started");
        self.ctx.reporter.set_status(StatusField::Input, "disabled");

        let outcome = match self.run(&ticket).await {
            Ok(report) => {
                info!(
                    turn = ticket.turn_no,
                    elapsed_ms = ticket.started_at.elapsed().as_millis() as u64,
                    live = report.live,
                    "Turn completed"
                );
                TurnOutcome::Completed(report)
            }
            Err(failure) => {
                warn!(turn = ticket.turn_no, ?failure, "Turn failed");
                // The supervisor already reported connection failures
                if !matches!(failure, TurnFailure::Connection(_)) {
                    self.ctx.reporter.error(failure.user_message());
                }
                TurnOutcome::Failed(failure)
            }
        };

        drop(ticket);
        if self.in_flight.active() == 0 {
            self.ctx.reporter.set_status(StatusField::Input, "enabled");
        }
        outcome
    }

    async fn run(&self, ticket: &TurnTicket) -> std::result::Result<TurnReport, TurnFailure> {
        let ctx = &self.ctx;

        let source_url = ctx.avatar.presentable_image().await.map_err(|e| {
            warn!("Avatar image could not be hosted: {}", e);
            TurnFailure::Upload
        })?;
        let voice_id = ctx.avatar.voice_id();
        if let Err(e) = ctx.supervisor.connect(&source_url, &voice_id).await {
            return Err(TurnFailure::Connection(e.connect_failure()));
        }
        ctx.reporter.set_status(StatusField::Input, "disabled");

        let reference = ctx.avatar.reference();
        let conversation = ctx
            .conversations
            .get_or_create(&self.user_id, &reference.id, reference.kind)
            .await
            .map_err(|e| {
                warn!("Conversation lookup failed: {}", e);
                TurnFailure::Conversation
            })?;

        let user = ChatMessage::user(ticket.text.clone());
        ctx.transcript.push(user.clone());
        if let Err(e) = ctx.conversations.save(&conversation.id, &user).await {
            warn!(conversation = %conversation.id, "Saving user message failed: {}", e);
            ctx.transcript.retract(&user);
            return Err(TurnFailure::Persistence);
        }

        let mut history = ctx
            .conversations
            .recent(&conversation.id, self.history_limit + 1)
            .await
            .map_err(|e| {
                warn!("Loading history failed: {}", e);
                TurnFailure::Conversation
            })?;
        if let Some(index) = history
            .iter()
            .rposition(|m| m.role == Role::User && m.content == user.content)
        {
            history.remove(index);
        }
        let excess = history.len().saturating_sub(self.history_limit);
        history.drain(..excess);

        let reply_text = ctx
            .replies
            .generate_reply(&reference.persona, &user.content, &history)
            .await
            .map_err(|e| {
                warn!("Reply generation failed: {}", e);
                TurnFailure::Reply
            })?;

        let reply = ChatMessage::assistant(reply_text);
        if let Err(e) = ctx.conversations.save(&conversation.id, &reply).await {
            warn!(conversation = %conversation.id, "Saving reply failed: {}", e);
            return Err(TurnFailure::Persistence);
        }
        ctx.transcript.push(reply.clone());

        let audio = ctx
            .speech
            .synthesize(&reply.content, &reference.voice_id)
            .await
            .map_err(|e| {
                warn!("Speech synthesis failed: {}", e);
                speech_failure(&e)
            })?;
        check_duration(audio.duration_secs).map_err(|e| {
            warn!("{}", e);
            speech_failure(&e)
        })?;

        let image_url = ctx.avatar.presentable_image().await.map_err(|e| {
            warn!("Avatar image could not be hosted: {}", e);
            TurnFailure::Upload
        })?;

        ctx.supervisor
            .negotiator()
            .send_talk(&audio.url, &image_url)
            .await
            .map_err(|e| {
                warn!("Talk failed: {}", e);
                talk_failure(&e)
            })?;

        let live = ctx.presentation.wait_for_live(self.live_wait).await;
        if !live {
            debug!(turn = ticket.turn_no, "Live video not visible yet");
        }

        Ok(TurnReport {
            turn_no: ticket.turn_no,
            user,
            reply,
            audio,
            image_url,
            live,
        })
    }
}
