//! Error types for alter-voice

use thiserror::Error;

/// alter-voice error type
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Speech synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Audio duration {duration_secs:.2}s is outside [{min}, {max}]s")]
    DurationOutOfRange { duration_secs: f64, min: f64, max: f64 },

    #[error("Audio upload failed: {0}")]
    Upload(#[from] alter_core::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl VoiceError {
    /// Short text safe to show to the user
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::DurationOutOfRange { duration_secs, .. } if *duration_secs < 1.0 => {
                "The reply was too short to animate."
            }
            Self::DurationOutOfRange { .. } => "The reply was too long to animate.",
            Self::Upload(_) => "Could not prepare the reply audio.",
            _ => "Speech could not be generated.",
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, VoiceError>;
