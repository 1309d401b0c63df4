//! alter-gateway: talking-avatar chat client
//!
//! Usage:
//!   alter-gateway                   - Start an interactive chat
//!   alter-gateway --config <path>   - Use a specific config file
//!   alter-gateway --avatar <id>     - Chat with this alter instead of the stored one
//!   alter-gateway --help            - Show help

mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use alter_core::{
    Config, ConversationStore, HttpUploader, LlmClient, RestConversationStore, SettingsStore,
    SqliteConversationStore,
};
use alter_stream::{ChatConfig, ChatSession, Collaborators, LogSurface, StreamingClient, WebRtcConnector};
use alter_voice::{HostedSpeech, TtsClient, TtsConfig};
use tracing_subscriber::EnvFilter;

/// Parsed command line
#[derive(Debug, Default, PartialEq)]
struct Args {
    help: bool,
    version: bool,
    config: Option<PathBuf>,
    avatar: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1))?;

    if args.help {
        print_help();
        return Ok(());
    }
    if args.version {
        println!("alter-gateway {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load .env file
    dotenvy::dotenv().ok();

    let config = Config::load(args.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    tracing::info!("Starting alter-gateway...");
    tracing::info!("Model: {}", config.llm.model);

    let mut chat_config = ChatConfig::from_config(&config);
    if let Some(avatar) = &args.avatar {
        chat_config = chat_config.with_explicit_avatar(avatar.clone());
    }

    let chat = Arc::new(ChatSession::new(build_collaborators(&config)?, chat_config));
    cli::run_cli(chat).await
}

/// Wire every external service from config
fn build_collaborators(config: &Config) -> anyhow::Result<Collaborators> {
    let uploader = Arc::new(
        HttpUploader::new(config.upload.clone())
            .map_err(|e| anyhow::anyhow!("Failed to create uploader: {}", e))?,
    );

    let tts = TtsClient::new(TtsConfig::from_voice_config(&config.voice))
        .map_err(|e| anyhow::anyhow!("Failed to create TTS client: {}", e))?;
    let speech = Arc::new(HostedSpeech::new(tts, uploader.clone()));

    let replies = Arc::new(
        LlmClient::new(&config.llm)
            .map_err(|e| anyhow::anyhow!("Failed to create LLM client: {}", e))?,
    );

    let streaming = Arc::new(
        StreamingClient::new(&config.streaming)
            .map_err(|e| anyhow::anyhow!("Failed to create streaming client: {}", e))?,
    );

    let conversations: Arc<dyn ConversationStore> = match &config.data.url {
        Some(url) => {
            tracing::info!("Using data API at {}", url);
            Arc::new(
                RestConversationStore::new(url.clone(), config.data.api_key.clone())
                    .map_err(|e| anyhow::anyhow!("Failed to create data API client: {}", e))?,
            )
        }
        None => {
            tracing::info!("Using local database at {}", config.data.db_path);
            Arc::new(
                SqliteConversationStore::new(&config.data.db_path)
                    .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?,
            )
        }
    };

    let settings = Arc::new(
        SettingsStore::new(&config.data.settings_path)
            .map_err(|e| anyhow::anyhow!("Failed to open settings: {}", e))?,
    );

    Ok(Collaborators {
        streaming,
        peers: Arc::new(WebRtcConnector::new()),
        replies,
        speech,
        uploader,
        conversations,
        settings,
        surface: Arc::new(LogSurface),
    })
}

/// Parse command line arguments
fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => parsed.help = true,
            "--version" | "-v" => parsed.version = true,
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--avatar" | "-a" => {
                let id = args
                    .next()
                    .filter(|id| !id.trim().is_empty())
                    .ok_or_else(|| anyhow::anyhow!("--avatar requires an alter id"))?;
                parsed.avatar = Some(id);
            }
            other => anyhow::bail!("Unknown argument: {} (see --help)", other),
        }
    }

    Ok(parsed)
}

/// Print help message
fn print_help() {
    println!("alter-gateway - talking-avatar chat");
    println!();
    println!("Usage:");
    println!("  alter-gateway                  Start an interactive chat");
    println!("  alter-gateway --config <path>  Config file (default: ./alter-gateway.toml)");
    println!("  alter-gateway --avatar <id>    Chat with this alter");
    println!("  alter-gateway --help           Show this help message");
    println!("  alter-gateway --version        Show version");
    println!();
    println!("Environment Variables:");
    println!("  LLM_API_KEY              Reply generation API key (required)");
    println!("  LLM_PROVIDER             Provider: claude or openai (default: claude)");
    println!("  VOICE_API_KEY            Speech synthesis API key (required)");
    println!("  STREAMING_API_KEY        Streaming credential user:password (required)");
    println!("  UPLOAD_ENDPOINT          File upload endpoint");
    println!("  UPLOAD_PUBLIC_BASE_URL   Public URL prefix of uploaded files");
    println!("  DATA_API_URL             Data API base URL (default: local SQLite)");
    println!("  ALTER_USER_ID            User id");
    println!("  RUST_LOG / LOG_LEVEL     Log filter");
}
