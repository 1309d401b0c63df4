//! Text-to-Speech synthesis
//!
//! ElevenLabs-style API: one request per reply, voice chosen per call.
//! The returned MP3 is constant bitrate, so its length follows from its size
//! unless the provider reports a duration itself.

use alter_core::VoiceConfig;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::error::{Result, VoiceError};

/// Shortest audio the streaming service will animate
pub const MIN_DURATION_SECS: f64 = 1.0;
/// Longest audio the streaming service will animate
pub const MAX_DURATION_SECS: f64 = 90.0;

/// Header some providers use to report the audio length in seconds
const DURATION_HEADER: &str = "x-audio-duration";

/// TTS configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// API key
    pub api_key: String,
    /// API base URL
    pub base_url: String,
    /// Model to use
    pub model: String,
    /// Provider output format, e.g. `mp3_44100_128`
    pub output_format: String,
    pub stability: f32,
    pub similarity_boost: f32,
}

impl TtsConfig {
    /// Create a new ElevenLabs TTS configuration
    pub fn elevenlabs(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.elevenlabs.io/v1".to_string(),
            model: "eleven_multilingual_v2".to_string(),
            output_format: "mp3_44100_128".to_string(),
            stability: 0.5,
            similarity_boost: 0.75,
        }
    }

    pub fn from_voice_config(config: &VoiceConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            output_format: config.output_format.clone(),
            ..Self::elevenlabs("")
        }
    }

    /// Set base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Bitrate in kbit/s encoded in the output format (`mp3_44100_128` -> 128)
    pub fn bitrate_kbps(&self) -> Option<u32> {
        self.output_format
            .rsplit('_')
            .next()
            .and_then(|b| b.parse().ok())
            .filter(|b| *b > 0)
    }
}

/// TTS synthesis result
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// Encoded audio
    pub audio_data: Vec<u8>,
    /// Content type
    pub content_type: String,
    /// Duration in seconds
    pub duration_secs: f64,
}

/// Length of constant-bitrate audio
pub fn estimate_duration(byte_len: usize, bitrate_kbps: u32) -> f64 {
    if bitrate_kbps == 0 {
        return 0.0;
    }
    (byte_len as f64 * 8.0) / (bitrate_kbps as f64 * 1000.0)
}

/// Reject audio the streaming service cannot animate
pub fn check_duration(duration_secs: f64) -> Result<()> {
    if !duration_secs.is_finite()
        || !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&duration_secs)
    {
        return Err(VoiceError::DurationOutOfRange {
            duration_secs,
            min: MIN_DURATION_SECS,
            max: MAX_DURATION_SECS,
        });
    }
    Ok(())
}

/// TTS client for speech synthesis
pub struct TtsClient {
    client: Client,
    config: TtsConfig,
}

impl TtsClient {
    /// Create a new TTS client
    pub fn new(config: TtsConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(VoiceError::ConfigError("voice api_key is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| VoiceError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Synthesize `text` with the given voice
    pub async fn synthesize(&self, text: &str, voice_id: &str) -> Result<SynthesisResult> {
        if voice_id.trim().is_empty() {
            return Err(VoiceError::ConfigError("voice_id is required".to_string()));
        }

        let url = format!("{}/text-to-speech/{}", self.config.base_url, voice_id);

        info!("Synthesizing speech: {} chars using voice {}", text.len(), voice_id);
        debug!("Model: {}, format: {}", self.config.model, self.config.output_format);

        let body = serde_json::json!({
            "text": text,
            "model_id": self.config.model,
            "voice_settings": {
                "stability": self.config.stability,
                "similarity_boost": self.config.similarity_boost,
            }
        });

        let response = self
            .client
            .post(&url)
            .query(&[("output_format", self.config.output_format.as_str())])
            .header("xi-api-key", &self.config.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::ApiError(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            warn!("TTS API error {}: {}", status, error_text);
            return Err(VoiceError::SynthesisFailed(format!("API error {}", status)));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let reported = response
            .headers()
            .get(DURATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok());

        let audio_data = response.bytes().await.map_err(|e| {
            VoiceError::SynthesisFailed(format!("Failed to read audio data: {}", e))
        })?;

        if audio_data.is_empty() {
            return Err(VoiceError::SynthesisFailed("empty audio".to_string()));
        }

        let duration_secs = match (reported, self.config.bitrate_kbps()) {
            (Some(d), _) => d,
            (None, Some(kbps)) => estimate_duration(audio_data.len(), kbps),
            (None, None) => {
                return Err(VoiceError::SynthesisFailed(format!(
                    "cannot determine duration for format {}",
                    self.config.output_format
                )));
            }
        };

        info!(
            "Synthesis complete: {} bytes, {:.2}s, content-type: {}",
            audio_data.len(),
            duration_secs,
            content_type
        );

        Ok(SynthesisResult {
            audio_data: audio_data.to_vec(),
            content_type,
            duration_secs,
        })
    }
}
