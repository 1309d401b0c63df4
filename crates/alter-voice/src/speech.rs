//! Speech that the streaming service can fetch
//!
//! Synthesized audio only exists in memory; the talk request needs a URL,
//! so the bytes are uploaded before they are handed on.

use std::sync::Arc;

use alter_core::FileUploader;
use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::tts::{TtsClient, check_duration};

/// Audio ready for a talk request
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub url: String,
    pub duration_secs: f64,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<SynthesizedAudio>;
}

/// TTS followed by upload
pub struct HostedSpeech {
    tts: TtsClient,
    uploader: Arc<dyn FileUploader>,
}

impl HostedSpeech {
    pub fn new(tts: TtsClient, uploader: Arc<dyn FileUploader>) -> Self {
        Self { tts, uploader }
    }
}

#[async_trait]
impl SpeechSynthesizer for HostedSpeech {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<SynthesizedAudio> {
        let result = self.tts.synthesize(text, voice_id).await?;

        // Out-of-range audio is never uploaded
        check_duration(result.duration_secs)?;

        let file_name = format!("speech-{}.mp3", uuid::Uuid::new_v4());
        let url = self
            .uploader
            .upload(result.audio_data, &file_name, &result.content_type)
            .await?;

        info!("Speech hosted at {} ({:.2}s)", url, result.duration_secs);
        Ok(SynthesizedAudio {
            url,
            duration_secs: result.duration_secs,
        })
    }
}
