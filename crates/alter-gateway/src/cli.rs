//! CLI (Command Line Interface) mode
//!
//! 1 つの ChatSession を対話的に操作する REPL です。
//! 通知とアバター表示の変化はバックグラウンドタスクが色付きで出力します。

use std::sync::Arc;

use alter_core::{ChatMessage, Notice, NoticeLevel, Role, StatusEvent};
use alter_stream::{ChatSession, TurnOutcome};
use nu_ansi_term::{Color, Style};
use reedline::{
    ColumnarMenu, Completer, DefaultHinter, Emacs, KeyCode, KeyModifiers, Keybindings,
    MenuBuilder, Prompt, Reedline, ReedlineEvent, ReedlineMenu, Signal, Suggestion,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Available commands for autocomplete display
const COMMANDS: &[(&str, &str)] = &[
    ("/help", "ヘルプを表示"),
    ("/exit", "プログラムを終了"),
    ("/quit", "プログラムを終了"),
    ("/history", "会話履歴を表示"),
    ("/status", "接続状態を表示"),
    ("/reconnect", "ストリームを張り直す"),
    ("/avatar", "アバター画像を設定 (URL またはファイルパス)"),
    ("/clear-avatar", "アバター画像を元に戻す"),
];

/// Command completer for reedline
#[derive(Clone)]
pub struct CommandCompleter {
    commands: Vec<(&'static str, &'static str)>,
}

impl CommandCompleter {
    pub fn new() -> Self {
        Self {
            commands: COMMANDS.to_vec(),
        }
    }
}

impl Default for CommandCompleter {
    fn default() -> Self {
        Self::new()
    }
}

impl Completer for CommandCompleter {
    fn complete(&mut self, line: &str, pos: usize) -> Vec<Suggestion> {
        if !line.starts_with('/') {
            return Vec::new();
        }

        self.commands
            .iter()
            .filter(|(cmd, _)| cmd.starts_with(line))
            .map(|(cmd, desc)| Suggestion {
                value: cmd.to_string(),
                description: Some(desc.to_string()),
                extra: None,
                span: reedline::Span::new(0, pos),
                append_whitespace: true,
                style: None,
            })
            .collect()
    }
}

/// Prompt showing the alter's name
struct ColoredPrompt {
    name: String,
    style: Style,
}

impl ColoredPrompt {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            style: Color::Cyan.bold(),
        }
    }
}

impl Prompt for ColoredPrompt {
    fn render_prompt_left(&self) -> std::borrow::Cow<'_, str> {
        std::borrow::Cow::Owned(self.style.paint(format!("{} > ", self.name)).to_string())
    }

    fn render_prompt_right(&self) -> std::borrow::Cow<'_, str> {
        std::borrow::Cow::Borrowed("")
    }

    fn render_prompt_indicator(
        &self,
        _prompt_mode: reedline::PromptEditMode,
    ) -> std::borrow::Cow<'_, str> {
        std::borrow::Cow::Borrowed("")
    }

    fn render_prompt_multiline_indicator(&self) -> std::borrow::Cow<'_, str> {
        std::borrow::Cow::Borrowed("")
    }

    fn render_prompt_history_search_indicator(
        &self,
        _history_search: reedline::PromptHistorySearch,
    ) -> std::borrow::Cow<'_, str> {
        std::borrow::Cow::Borrowed("")
    }
}

/// What the REPL does after a line
#[derive(Debug, PartialEq)]
enum Action {
    Continue,
    Exit,
}

/// Run CLI interactive mode
pub async fn run_cli(chat: Arc<ChatSession>) -> anyhow::Result<()> {
    print_welcome();
    let printer = spawn_notice_printer(&chat);

    chat.start()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start chat: {}", e))?;
    let avatar = chat.avatar();
    info!("Chatting with {} ({})", avatar.name, avatar.id);
    let replayed = chat.transcript().len();
    if replayed > 0 {
        println!("📜 {} 件の会話履歴を読み込みました (/history で表示)", replayed);
    }

    // Connect in the background so the prompt shows up at once
    let connecting = Arc::clone(&chat);
    tokio::spawn(async move {
        if let Err(e) = connecting.connect().await {
            warn!("Initial connect failed: {}", e);
        }
    });

    let mut keybindings = default_keybindings();
    keybindings.add_binding(
        KeyModifiers::NONE,
        KeyCode::Char('/'),
        ReedlineEvent::Edit(vec![reedline::EditCommand::Complete]),
    );

    let menu = Box::new(
        ColumnarMenu::default()
            .with_name("command_menu")
            .with_columns(1)
            .with_column_width(Some(50))
            .with_only_buffer_difference(false),
    );
    let hinter = DefaultHinter::default().with_style(Style::new().dimmed());

    let mut line_editor = Reedline::create()
        .with_completer(Box::new(CommandCompleter::new()))
        .with_menu(ReedlineMenu::EngineCompleter(menu))
        .with_hinter(Box::new(hinter))
        .with_edit_mode(Box::new(Emacs::new(keybindings)));

    let prompt = ColoredPrompt::new(avatar.name.clone());

    loop {
        let signal = tokio::task::block_in_place(|| line_editor.read_line(&prompt));

        match signal {
            Ok(Signal::Success(line)) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                if input.starts_with('/') {
                    if handle_command(&chat, input).await == Action::Exit {
                        break;
                    }
                    continue;
                }

                if let TurnOutcome::Completed(report) = chat.submit_turn(input).await {
                    print_reply(&chat.avatar().name, &report.reply.content);
                }
            }
            Ok(Signal::CtrlC) => {
                println!("^C");
                continue;
            }
            Ok(Signal::CtrlD) => break,
            Err(err) => {
                eprintln!("\n❌ エラー: {}\n", err);
                break;
            }
        }
    }

    chat.shutdown().await;
    printer.abort();
    println!("\n👋 さようなら！\n");
    Ok(())
}

/// Default keybindings for reedline
fn default_keybindings() -> Keybindings {
    let mut keybindings = Keybindings::new();
    keybindings.add_binding(
        KeyModifiers::NONE,
        KeyCode::Tab,
        ReedlineEvent::Edit(vec![reedline::EditCommand::Complete]),
    );
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Enter, ReedlineEvent::Submit);
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Esc, ReedlineEvent::Esc);
    keybindings.add_binding(
        KeyModifiers::CONTROL,
        KeyCode::Char('c'),
        ReedlineEvent::CtrlC,
    );
    keybindings.add_binding(
        KeyModifiers::CONTROL,
        KeyCode::Char('d'),
        ReedlineEvent::CtrlD,
    );
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Up, ReedlineEvent::Up);
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Down, ReedlineEvent::Down);
    keybindings
}

/// Split `/command rest` into its parts
fn split_command(input: &str) -> (String, &str) {
    match input.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd.to_lowercase(), rest.trim()),
        None => (input.to_lowercase(), ""),
    }
}

/// Handle slash commands
async fn handle_command(chat: &ChatSession, input: &str) -> Action {
    let (cmd, arg) = split_command(input);

    match cmd.as_str() {
        "/exit" | "/quit" | "/q" => return Action::Exit,
        "/help" | "/?" => print_help(),
        "/history" => print_history(&chat.transcript(), &chat.avatar().name),
        "/status" => print_status(chat),
        "/reconnect" => {
            if let Err(e) = chat.reconnect().await {
                warn!("Reconnect failed: {}", e);
            }
        }
        "/avatar" if arg.is_empty() => {
            println!("\n🖼  現在の画像: {}\n", chat.image_url());
        }
        "/avatar" => {
            if let Ok(url) = chat.set_custom_avatar(arg).await {
                println!("\n🖼  {}\n", url);
            }
        }
        "/clear-avatar" => {
            if let Err(e) = chat.clear_custom_avatar().await {
                eprintln!("\n❌ エラー: {}\n", e);
            }
        }
        _ => {
            eprintln!(
                "\n❓ 不明なコマンド: {}。/help でコマンド一覧を確認してください。\n",
                input
            );
        }
    }
    Action::Continue
}

/// Print notices and presentation changes as they happen
fn spawn_notice_printer(chat: &ChatSession) -> JoinHandle<()> {
    let mut events = chat.status().subscribe();
    let mut surfaces = chat.presentation().subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(StatusEvent::Notice(notice)) => print_notice(&notice),
                    Ok(StatusEvent::StatusChange { .. }) => {}
                    Err(RecvError::Lagged(skipped)) => warn!("Skipped {} status events", skipped),
                    Err(RecvError::Closed) => break,
                },
                changed = surfaces.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let surface = *surfaces.borrow_and_update();
                    println!("{}", Style::new().dimmed().paint(format!("[avatar: {}]", surface)));
                }
            }
        }
    })
}

fn notice_style(level: NoticeLevel) -> (Color, &'static str) {
    match level {
        NoticeLevel::Info => (Color::Blue, "ℹ"),
        NoticeLevel::Success => (Color::Green, "✅"),
        NoticeLevel::Warning => (Color::Yellow, "⚠"),
        NoticeLevel::Error => (Color::Red, "❌"),
    }
}

fn print_notice(notice: &Notice) {
    let (color, icon) = notice_style(notice.level);
    println!("{} {}", icon, color.paint(&notice.text));
}

fn print_reply(name: &str, text: &str) {
    println!("\n{} {}\n", Color::Magenta.bold().paint(format!("{}:", name)), text);
}

/// Print welcome message
fn print_welcome() {
    println!();
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║          🎭 alter-gateway - 対話モード                     ║");
    println!("╠════════════════════════════════════════════════════════════╣");
    println!("║  メッセージを入力して Enter でアバターが話します           ║");
    println!("║  コマンド: /help, /status, /avatar, /exit                  ║");
    println!("║  / を入力するとコマンド候補が表示されます                   ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
}

/// Print help message
fn print_help() {
    println!();
    println!("📖 利用可能なコマンド:");
    for (cmd, desc) in COMMANDS {
        println!("  {} - {}", cmd, desc);
    }
    println!();
    println!("💡 ヒント: / から入力するとコマンド候補が表示されます");
    println!("💡 /avatar には https URL、data URL、画像ファイルのパスを指定できます");
    println!();
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() > max_chars {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}

/// Print conversation history
fn print_history(messages: &[ChatMessage], name: &str) {
    println!();
    println!("📜 会話履歴 ({} 件):", messages.len());
    println!("{}", "─".repeat(50));

    for (i, msg) in messages.iter().enumerate() {
        let role = match msg.role {
            Role::User => "👤 あなた".to_string(),
            Role::Assistant => format!("🎭 {}", name),
        };
        println!("{}. {}: {}", i + 1, role, preview(&msg.content, 100));
    }

    println!("{}", "─".repeat(50));
    println!();
}

/// Print status fields and session state
fn print_status(chat: &ChatSession) {
    let session = chat.session();
    let avatar = chat.avatar();

    println!();
    println!("📡 接続状態:");
    println!("  session   : {}", session.state);
    if let Some(ids) = &session.ids {
        println!("  stream    : {}", ids.stream_id);
    }
    println!("  surface   : {}", chat.presentation().current());
    println!("  alter     : {} ({})", avatar.name, avatar.id);
    println!("  image     : {}", chat.image_url());
    for (field, value) in chat.status().snapshot() {
        println!("  {:<10}: {}", field, value);
    }
    println!();
}
