//! Chat session
//!
//! One [`ChatSession`] per open chat with one alter. It owns the stream
//! supervisor, the presentation, the transcript and the turn pipeline, and
//! is built from explicit collaborators; there is no process-wide instance.

use std::path::Path;
use std::sync::Arc;

use alter_core::upload::guess_content_type;
use alter_core::{
    AvatarConfig, AvatarReference, AvatarSettings, ChatMessage, Config, ConversationManager,
    ConversationStore, FileUploader, ReplyGenerator, StatusField, StatusReporter, StreamingConfig,
    TurnConfig,
};
use alter_voice::SpeechSynthesizer;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{info, warn};

use crate::api::StreamingApi;
use crate::avatar::AvatarState;
use crate::error::{Result, StreamError};
use crate::negotiator::Negotiator;
use crate::peer::PeerConnector;
use crate::presentation::{PresentationController, VideoSurface};
use crate::session::StreamSession;
use crate::supervisor::ConnectionSupervisor;
use crate::transcript::Transcript;
use crate::turn::{TurnContext, TurnOutcome, TurnPipeline};

/// External services a chat talks to
pub struct Collaborators {
    pub streaming: Arc<dyn StreamingApi>,
    pub peers: Arc<dyn PeerConnector>,
    pub replies: Arc<dyn ReplyGenerator>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub uploader: Arc<dyn FileUploader>,
    pub conversations: Arc<dyn ConversationStore>,
    pub settings: Arc<dyn AvatarSettings>,
    pub surface: Arc<dyn VideoSurface>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatConfig {
    pub user_id: String,
    pub avatar: AvatarConfig,
    /// The avatar was chosen explicitly and beats the stored selection
    pub explicit_avatar: bool,
    pub streaming: StreamingConfig,
    pub turns: TurnConfig,
}

impl ChatConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            user_id: config.user.id.clone(),
            avatar: config.avatar.clone(),
            explicit_avatar: false,
            streaming: config.streaming.clone(),
            turns: config.turns.clone(),
        }
    }

    pub fn with_explicit_avatar(mut self, avatar_id: impl Into<String>) -> Self {
        self.avatar.id = avatar_id.into();
        self.explicit_avatar = true;
        self
    }
}

/// Custom avatar image as given by the user
#[derive(Debug, Clone, PartialEq)]
pub enum AvatarImage {
    Url(String),
    Bytes {
        data: Vec<u8>,
        file_name: String,
        content_type: String,
    },
}

impl AvatarImage {
    /// Accepts an http(s) URL, a `data:image/...;base64,` URL, or a file path
    pub async fn from_input(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(StreamError::InvalidImage("empty".to_string()));
        }

        if input.starts_with("http://") || input.starts_with("https://") {
            return Ok(Self::Url(input.to_string()));
        }

        if let Some(rest) = input.strip_prefix("data:") {
            let (meta, payload) = rest
                .split_once(',')
                .ok_or_else(|| StreamError::InvalidImage("malformed data URL".to_string()))?;
            let content_type = meta
                .strip_suffix(";base64")
                .ok_or_else(|| StreamError::InvalidImage("data URL is not base64".to_string()))?;
            if !content_type.starts_with("image/") {
                return Err(StreamError::InvalidImage(format!(
                    "unsupported type {}",
                    content_type
                )));
            }
            let data = BASE64
                .decode(payload)
                .map_err(|e| StreamError::InvalidImage(format!("bad base64: {}", e)))?;
            let ext = content_type.trim_start_matches("image/");
            return Ok(Self::Bytes {
                data,
                file_name: format!("avatar.{}", ext),
                content_type: content_type.to_string(),
            });
        }

        let path = Path::new(input);
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("avatar")
            .to_string();
        let content_type = guess_content_type(&file_name);
        if !content_type.starts_with("image/") {
            return Err(StreamError::InvalidImage(format!(
                "{} is not a supported image",
                file_name
            )));
        }
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| StreamError::InvalidImage(format!("{}: {}", input, e)))?;
        Ok(Self::Bytes {
            data,
            file_name,
            content_type: content_type.to_string(),
        })
    }
}

pub struct ChatSession {
    config: ChatConfig,
    settings: Arc<dyn AvatarSettings>,
    reporter: Arc<StatusReporter>,
    presentation: Arc<PresentationController>,
    avatar: Arc<AvatarState>,
    transcript: Arc<Transcript>,
    conversations: Arc<ConversationManager>,
    supervisor: Arc<ConnectionSupervisor>,
    pipeline: TurnPipeline,
}

impl ChatSession {
    pub fn new(collaborators: Collaborators, config: ChatConfig) -> Self {
        let reporter = Arc::new(StatusReporter::new());
        let avatar = Arc::new(AvatarState::new(
            AvatarReference::from_config(&config.avatar),
            config.avatar.default_image_url.clone(),
            collaborators.uploader,
        ));
        let presentation = PresentationController::new(collaborators.surface, avatar.image_url());
        let negotiator = Negotiator::new(
            collaborators.streaming,
            collaborators.peers,
            reporter.clone(),
            presentation.clone(),
            config.streaming.clone(),
        );
        let supervisor = Arc::new(ConnectionSupervisor::new(
            negotiator,
            reporter.clone(),
            &config.streaming,
        ));
        let conversations = Arc::new(ConversationManager::new(collaborators.conversations));
        let transcript = Arc::new(Transcript::new());

        let pipeline = TurnPipeline::new(
            TurnContext {
                supervisor: supervisor.clone(),
                conversations: conversations.clone(),
                replies: collaborators.replies,
                speech: collaborators.speech,
                avatar: avatar.clone(),
                transcript: transcript.clone(),
                reporter: reporter.clone(),
                presentation: presentation.clone(),
            },
            config.user_id.clone(),
            &config.turns,
            config.streaming.live_wait(),
        );

        reporter.set_status(StatusField::Input, "disabled");

        Self {
            config,
            settings: collaborators.settings,
            reporter,
            presentation,
            avatar,
            transcript,
            conversations,
            supervisor,
            pipeline,
        }
    }

    /// Load the avatar, open its conversation, and replay the history
    pub async fn start(&self) -> Result<()> {
        let configured = AvatarReference::from_config(&self.config.avatar);
        let reference = self
            .settings
            .load_avatar(configured, self.config.explicit_avatar);
        self.avatar.replace(reference.clone());
        self.presentation.set_image(self.avatar.image_url());

        let conversation = self
            .conversations
            .get_or_create(&self.config.user_id, &reference.id, reference.kind)
            .await?;
        let history = self.conversations.load_history(&conversation.id).await?;
        info!(
            conversation = %conversation.id,
            alter = %reference.id,
            messages = history.len(),
            "Chat started"
        );
        self.transcript.replace(history);

        self.reporter.set_status(StatusField::Input, "enabled");
        Ok(())
    }

    pub async fn connect(&self) -> Result<()> {
        let source_url = self.avatar.presentable_image().await?;
        self.supervisor
            .connect(&source_url, &self.avatar.voice_id())
            .await
    }

    pub async fn reconnect(&self) -> Result<()> {
        let source_url = self.avatar.presentable_image().await?;
        self.supervisor
            .reconnect(&source_url, &self.avatar.voice_id())
            .await
    }

    pub async fn submit_turn(&self, text: &str) -> TurnOutcome {
        self.pipeline.submit(text).await
    }

    /// Upload (when needed) and apply a custom image; returns its URL
    pub async fn set_custom_avatar(&self, input: &str) -> Result<String> {
        let image = match AvatarImage::from_input(input).await {
            Ok(image) => image,
            Err(e) => {
                warn!("Rejected avatar image: {}", e);
                self.reporter.error("That image can't be used as an avatar.");
                return Err(e);
            }
        };

        let uploader = self.avatar.uploader();
        let uploaded = match image {
            AvatarImage::Url(url) if uploader.is_hosted(&url) => Ok(url),
            AvatarImage::Url(url) => uploader.rehost_url(&url).await,
            AvatarImage::Bytes {
                data,
                file_name,
                content_type,
            } => uploader.upload(data, &file_name, &content_type).await,
        };
        let url = match uploaded {
            Ok(url) => url,
            Err(e) => {
                warn!("Avatar upload failed: {}", e);
                self.reporter
                    .error("Could not upload the image. Please try again.");
                return Err(e.into());
            }
        };

        self.update_custom_image(Some(url.clone()))?;
        self.reporter.success("Avatar image updated.");
        Ok(url)
    }

    pub async fn clear_custom_avatar(&self) -> Result<()> {
        self.update_custom_image(None)?;
        self.reporter.info("Avatar image reset.");
        Ok(())
    }

    fn update_custom_image(&self, url: Option<String>) -> Result<()> {
        let mut reference = self.avatar.reference();
        reference.set_custom_image(url);
        self.settings.save_avatar(&reference)?;
        self.avatar.replace(reference);
        self.presentation.set_image(self.avatar.image_url());
        Ok(())
    }

    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.transcript.snapshot()
    }

    pub fn presentation(&self) -> &Arc<PresentationController> {
        &self.presentation
    }

    pub fn status(&self) -> &Arc<StatusReporter> {
        &self.reporter
    }

    pub fn avatar(&self) -> AvatarReference {
        self.avatar.reference()
    }

    pub fn image_url(&self) -> String {
        self.avatar.image_url()
    }

    pub fn session(&self) -> StreamSession {
        self.supervisor.negotiator().session()
    }

    pub fn is_connected(&self) -> bool {
        self.supervisor.is_connected()
    }

    pub async fn shutdown(&self) {
        self.supervisor.disconnect().await;
        self.reporter.set_status(StatusField::Input, "disabled");
        info!("Chat closed");
    }
}
