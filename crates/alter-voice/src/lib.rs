//! alter-voice: Speech synthesis for alter-gateway
//!
//! This crate turns an alter's reply into audio the streaming service can
//! fetch: it synthesizes speech, measures its length, rejects audio outside
//! the animatable range, and re-hosts the bytes under a public URL.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use alter_voice::{HostedSpeech, SpeechSynthesizer, TtsClient, TtsConfig};
//!
//! let tts = TtsClient::new(TtsConfig::from_voice_config(&config.voice))?;
//! let speech = HostedSpeech::new(tts, Arc::new(uploader));
//! let audio = speech.synthesize("Hello!", "voice-id").await?;
//! println!("{} ({:.1}s)", audio.url, audio.duration_secs);
//! ```

pub mod error;
pub mod speech;
pub mod tts;

pub use error::{Result, VoiceError};
pub use speech::{HostedSpeech, SpeechSynthesizer, SynthesizedAudio};
pub use tts::{
    MAX_DURATION_SECS, MIN_DURATION_SECS, SynthesisResult, TtsClient, TtsConfig, check_duration,
    estimate_duration,
};
