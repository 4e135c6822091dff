//! Handlers behind each `juno` subcommand.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;

use juno::attachment::Attachment;
use juno::calculator::{Calculator, Key, parse_keys};
use juno::chat::ChatSession;
use juno::context::AppContext;
use juno::events::{ChatEvent, ContentPart, Conversation};
use juno::history::{HistoryBrowser, HistoryClient};
use juno::storage::Credentials;
use juno::stream::StreamClient;
use juno::timer::{CountdownTimer, TimerEvent, format_hms, run_countdown};

pub const DEFAULT_CONVERSATION: &str = "New Conversation";

pub fn setup(ctx: &mut AppContext, name: &str, gemini_key: &str, tavily_key: &str) -> Result<()> {
    let credentials = Credentials::new(name, gemini_key, tavily_key).context("Setup is incomplete")?;
    ctx.complete_setup(credentials).context("Failed to save credentials")?;
    println!("👋 Welcome, {}! Juno is ready.", name.trim());
    Ok(())
}

pub fn reset(ctx: &mut AppContext) -> Result<()> {
    ctx.reset().context("Failed to clear stored credentials")?;
    println!("🧹 Stored credentials removed. Run 'juno setup' to start again.");
    Ok(())
}

pub async fn history(ctx: &AppContext, page: Option<u32>, search: Option<&str>) -> Result<()> {
    let client = HistoryClient::new(ctx.config())?;

    let conversations: Vec<Conversation> = match (page, search) {
        (Some(page), None) => {
            let result = client
                .try_fetch_page(page)
                .await
                .with_context(|| format!("Failed to load history page {page}"))?;
            println!("📚 Page {} of {}", result.current_page, result.total_pages.max(1));
            result.conversations
        }
        (_, search) => {
            let mut browser = HistoryBrowser::new(client);
            browser.load_first().await;
            if search.is_some() {
                while browser.has_more() && browser.load_more().await {}
            }
            if let Some(message) = browser.load_error() {
                bail!("{message}");
            }
            match search {
                Some(query) => browser.search(query).into_iter().cloned().collect(),
                None => browser.conversations().to_vec(),
            }
        }
    };

    if conversations.is_empty() {
        println!("📭 No conversations found.");
        return Ok(());
    }

    for conversation in &conversations {
        println!(
            "💬 {}  ({} messages, last active {})",
            conversation.id,
            conversation.messages.len(),
            conversation.last_message_time.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

pub async fn show(ctx: &AppContext, name: &str) -> Result<()> {
    let client = HistoryClient::new(ctx.config())?;
    let conversation = match client.fetch_conversation(name).await {
        Ok(conversation) => conversation,
        Err(e) if e.is_not_found() => {
            println!("❌ Conversation '{name}' not found.");
            println!("Run 'juno history' to see available conversations.");
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to load conversation"),
    };

    println!("💬 {}", conversation.id);
    println!("{}", "=".repeat(50));
    for message in &conversation.messages {
        let who = if message.is_user() { "🧑 You" } else { "🤖 Juno" };
        println!("{who} [{}]", message.date_time.format("%Y-%m-%d %H:%M"));
        println!("{}", message.content.plain_text());
        println!();
    }
    Ok(())
}

pub async fn chat(ctx: &AppContext, conversation: Option<&str>, attachments: &[PathBuf], prompt: &str) -> Result<()> {
    let Some(api_key) = ctx.gemini_api_key() else {
        bail!("Juno is not set up yet. Run 'juno setup' first.");
    };

    let mut session = match conversation {
        Some(name) => load_session(ctx, name).await?,
        None => ChatSession::new(DEFAULT_CONVERSATION),
    };

    let mut parts = vec![ContentPart::text(prompt)];
    for path in attachments {
        let attachment =
            Attachment::from_path(path).with_context(|| format!("Failed to read attachment {}", path.display()))?;
        parts.push(attachment.into_part());
    }

    let Some(pending) = session.begin_send(parts) else {
        bail!("Nothing to send");
    };

    let client = StreamClient::new(ctx.config(), Some(api_key.to_string()))?;
    session.attach(client.stream_response(pending.request));

    let mut stdout = io::stdout();
    let mut failure = None;
    while let Some(event) = session.next_event().await {
        match event {
            ChatEvent::Delta(fragment) => {
                write!(stdout, "{fragment}")?;
                stdout.flush()?;
            }
            ChatEvent::ToolCall { .. } => {
                if let Some(status) = session.tool_status() {
                    eprintln!("🔎 {status}...");
                }
            }
            ChatEvent::Complete { .. } => writeln!(stdout)?,
            ChatEvent::Error(message) => failure = Some(message),
        }
    }

    if let Some(message) = failure {
        bail!("Sorry, an error occurred: {message}");
    }
    Ok(())
}

async fn load_session(ctx: &AppContext, name: &str) -> Result<ChatSession> {
    let client = HistoryClient::new(ctx.config())?;
    match client.fetch_conversation(name).await {
        Ok(conversation) => Ok(ChatSession::from_conversation(conversation)),
        Err(e) if e.is_not_found() => {
            tracing::debug!(conversation = name, "starting a new conversation");
            Ok(ChatSession::new(name))
        }
        Err(e) => Err(e).context("Failed to load conversation"),
    }
}

pub fn calc(keys: &str) -> Result<String> {
    let mut calculator = Calculator::new();
    calculator.press_all(parse_keys(keys).context("Unrecognised calculator key")?);
    calculator.press(Key::Equals);
    let shown = calculator.display().to_string();
    println!("{shown}");
    Ok(shown)
}

/// Countdown length for `juno timer`, from `--minutes` or the configured default
pub fn timer_duration_ms(ctx: &AppContext, minutes: Option<u64>) -> Result<u64> {
    let initial_ms = match minutes {
        Some(minutes) => minutes
            .checked_mul(60_000)
            .context("Timer duration is too long")?,
        None => ctx.config().default_timer_ms(),
    };
    if initial_ms == 0 {
        bail!("Timer duration must be greater than zero");
    }
    Ok(initial_ms)
}

pub async fn timer(ctx: &AppContext, minutes: Option<u64>) -> Result<()> {
    let mut countdown = CountdownTimer::new(timer_duration_ms(ctx, minutes)?);
    countdown.start_pause();

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    println!("⏳ {}", countdown.display());
    let finished = run_countdown(&mut countdown, &cancel, |event| {
        if let TimerEvent::Tick { remaining_ms } = event {
            print!("\r⏳ {}", format_hms(remaining_ms));
            let _ = io::stdout().flush();
        }
    })
    .await;

    println!();
    if finished {
        println!("⏰ Time's up!");
    } else {
        println!("⏸️  Stopped with {} left.", countdown.display());
    }
    Ok(())
}
