//! Configuration management
//!
//! 設定は以下の優先順位で読み込まれます:
//! 1. 環境変数
//! 2. alter-gateway.toml 設定ファイル
//! 3. デフォルト値
//!
//! 設定ファイル内では `${VAR_NAME}` 形式で環境変数を展開できます。

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::avatar::AvatarKind;
use crate::error::{Error, Result};

/// Default config file name looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "alter-gateway.toml";

/// LLM Provider type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Anthropic Claude API
    #[default]
    Claude,
    /// OpenAI-compatible API
    OpenAi,
}

impl LlmProvider {
    /// Parse a provider name; anything unknown falls back to Claude
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "openai" | "glm" | "zai" | "minimax" => LlmProvider::OpenAi,
            _ => LlmProvider::Claude,
        }
    }
}

/// Reply-generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// API key
    pub api_key: String,
    /// Model to use
    pub model: String,
    /// API provider
    pub provider: LlmProvider,
    /// Base URL (optional, for custom endpoints)
    pub base_url: Option<String>,
    /// Upper bound on reply length
    pub max_tokens: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            provider: LlmProvider::Claude,
            base_url: None,
            max_tokens: 512,
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

/// Speech-synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// API key for the speech service
    pub api_key: String,
    /// Base URL of the speech service
    pub base_url: String,
    /// Synthesis model
    pub model: String,
    /// Output format requested from the service
    pub output_format: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.elevenlabs.io/v1".to_string(),
            model: "eleven_multilingual_v2".to_string(),
            output_format: "mp3_44100_128".to_string(),
        }
    }
}

/// Remote video-streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Static credential in `user:password` form, sent as HTTP Basic auth
    pub api_key: String,
    /// Base URL of the streaming service
    pub base_url: String,
    /// Stream creation attempts per connect
    pub connect_attempts: u32,
    /// Delay between connect attempts (ms)
    pub retry_delay_ms: u64,
    /// Talk submission attempts when the stream is not ready yet
    pub talk_attempts: u32,
    /// Delay between talk attempts (ms)
    pub talk_backoff_ms: u64,
    /// Timeout for each signaling request (ms)
    pub request_timeout_ms: u64,
    /// Inbound stats sampling interval (ms)
    pub stats_interval_ms: u64,
    /// How long a turn waits for the live video to appear (ms)
    pub live_wait_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.d-id.com".to_string(),
            connect_attempts: 3,
            retry_delay_ms: 2000,
            talk_attempts: 3,
            talk_backoff_ms: 1000,
            request_timeout_ms: 15_000,
            stats_interval_ms: 500,
            live_wait_ms: 1000,
        }
    }
}

impl StreamingConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn talk_backoff(&self) -> Duration {
        Duration::from_millis(self.talk_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn live_wait(&self) -> Duration {
        Duration::from_millis(self.live_wait_ms)
    }

    /// Split the credential into its Basic auth parts
    pub fn basic_credentials(&self) -> Option<(&str, &str)> {
        self.api_key.split_once(':')
    }
}

/// File-upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Multipart upload endpoint
    pub endpoint: String,
    /// URLs under this prefix are already hosted by us
    pub public_base_url: String,
    /// Optional bearer token for the upload endpoint
    pub token: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000/api/upload".to_string(),
            public_base_url: "http://localhost:3000/uploads/".to_string(),
            token: None,
        }
    }
}

/// Conversation persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// PostgREST-style data API; when unset the local SQLite store is used
    pub url: Option<String>,
    /// API key for the data API
    pub api_key: Option<String>,
    /// Path to the local SQLite database
    pub db_path: String,
    /// Path to the local settings database
    pub settings_path: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            db_path: "data/alter-gateway.db".to_string(),
            settings_path: "data/settings.db".to_string(),
        }
    }
}

/// External user identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub id: String,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            id: "local-user".to_string(),
        }
    }
}

/// Initially selected alter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AvatarKind,
    pub name: String,
    /// Persona context handed to reply generation
    pub persona: String,
    pub voice_id: String,
    /// Image URLs declared by the alter itself, in preference order
    pub image_urls: Vec<String>,
    /// Last-resort image when nothing else resolves
    pub default_image_url: String,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            kind: AvatarKind::Premade,
            name: "Alter".to_string(),
            persona: "You are a friendly digital twin. Keep answers short and conversational."
                .to_string(),
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            image_urls: Vec::new(),
            default_image_url: "http://localhost:3000/uploads/default-avatar.png".to_string(),
        }
    }
}

/// Turn handling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Most recent messages handed to reply generation
    pub history_limit: usize,
    /// Allow distinct utterances to overlap
    pub allow_concurrent: bool,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            history_limit: 20,
            allow_concurrent: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Main configuration for alter-gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub voice: VoiceConfig,
    pub streaming: StreamingConfig,
    pub upload: UploadConfig,
    pub data: DataConfig,
    pub user: UserConfig,
    pub avatar: AvatarConfig,
    pub turns: TurnConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// 設定ファイルから環境変数を展開する
    ///
    /// `${VAR_NAME}` 形式の文字列を環境変数の値に置換します。
    /// 環境変数が存在しない場合は空文字列になります。
    fn expand_env_vars(value: &str) -> String {
        let mut result = String::new();
        let mut chars = value.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next(); // '{' を消費

                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }

                if let Ok(env_value) = std::env::var(&var_name) {
                    result.push_str(&env_value);
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    /// TOML 設定ファイルから設定を読み込む
    ///
    /// 設定ファイル内の `${VAR_NAME}` は環境変数の値に置換され、
    /// その後、環境変数による上書きが適用されます。
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let toml_content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut cfg = Self::from_toml_str(&toml_content)?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Parse a TOML document (after `${VAR}` expansion) without env overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let expanded = Self::expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// デフォルトパスから設定を読み込む
    ///
    /// 1. 明示されたパス
    /// 2. `./alter-gateway.toml`
    /// 3. 見つからない場合は環境変数のみ
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_toml_file(path);
        }

        if Path::new(DEFAULT_CONFIG_FILE).exists() {
            return Self::from_toml_file(DEFAULT_CONFIG_FILE);
        }

        Ok(Self::from_env())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg
    }

    /// 環境変数で設定を上書きする
    fn apply_env_overrides(&mut self) {
        fn non_empty(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }

        // LLM
        if let Some(key) = non_empty("LLM_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(model) = non_empty("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(provider) = non_empty("LLM_PROVIDER") {
            self.llm.provider = LlmProvider::parse(&provider);
        }
        if let Some(base_url) = non_empty("LLM_BASE_URL") {
            self.llm.base_url = Some(base_url);
        }

        // Voice
        if let Some(key) = non_empty("VOICE_API_KEY").or_else(|| non_empty("ELEVENLABS_API_KEY")) {
            self.voice.api_key = key;
        }
        if let Some(base_url) = non_empty("VOICE_BASE_URL") {
            self.voice.base_url = base_url;
        }

        // Streaming
        if let Some(key) = non_empty("STREAMING_API_KEY").or_else(|| non_empty("DID_API_KEY")) {
            self.streaming.api_key = key;
        }
        if let Some(base_url) = non_empty("STREAMING_BASE_URL") {
            self.streaming.base_url = base_url;
        }

        // Upload
        if let Some(endpoint) = non_empty("UPLOAD_ENDPOINT") {
            self.upload.endpoint = endpoint;
        }
        if let Some(base) = non_empty("UPLOAD_PUBLIC_BASE_URL") {
            self.upload.public_base_url = base;
        }
        if let Some(token) = non_empty("UPLOAD_TOKEN") {
            self.upload.token = Some(token);
        }

        // Data
        if let Some(url) = non_empty("DATA_API_URL") {
            self.data.url = Some(url);
        }
        if let Some(key) = non_empty("DATA_API_KEY") {
            self.data.api_key = Some(key);
        }
        if let Some(path) = non_empty("DB_PATH") {
            self.data.db_path = path;
        }

        if let Some(user) = non_empty("ALTER_USER_ID") {
            self.user.id = user;
        }
        if let Some(level) = non_empty("LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Check that every credential the client needs at init is present.
    ///
    /// A failure here is fatal for the whole client.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.is_empty() {
            return Err(Error::Config("LLM_API_KEY not set".to_string()));
        }
        if self.voice.api_key.is_empty() {
            return Err(Error::Config("VOICE_API_KEY not set".to_string()));
        }
        if self.streaming.api_key.is_empty() {
            return Err(Error::Config("STREAMING_API_KEY not set".to_string()));
        }
        if self.streaming.basic_credentials().is_none() {
            return Err(Error::Config(
                "STREAMING_API_KEY must be in `user:password` form".to_string(),
            ));
        }
        if self.streaming.connect_attempts == 0 || self.streaming.talk_attempts == 0 {
            return Err(Error::Config("attempt counts must be at least 1".to_string()));
        }
        if self.user.id.trim().is_empty() {
            return Err(Error::Config("user id must not be empty".to_string()));
        }
        Ok(())
    }
}
