use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use juno::config::Config;
use juno::context::AppContext;

mod commands;

#[derive(Parser)]
#[command(name = "juno")]
#[command(version)]
#[command(about = "Chat with Juno, browse past conversations, calculate and keep time", long_about = None)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store your name and API keys
    Setup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        gemini_key: String,
        #[arg(long)]
        tavily_key: String,
    },
    /// Forget stored credentials
    Reset,
    /// List past conversations
    History {
        /// Fetch a single page
        #[arg(long)]
        page: Option<u32>,
        /// Only conversations whose name contains this text
        #[arg(long)]
        search: Option<String>,
    },
    /// Print one conversation
    Show { conversation: String },
    /// Send a prompt and stream the reply
    Chat {
        /// Continue (or start) a named conversation
        #[arg(long)]
        conversation: Option<String>,
        /// Files to send along with the prompt
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
        prompt: String,
    },
    /// Evaluate keypad input, e.g. `12×3+4`
    Calc { keys: String },
    /// Run a countdown
    Timer {
        #[arg(long)]
        minutes: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    juno::logging::init(cli.verbose);

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_context() -> Result<AppContext> {
    Ok(AppContext::load(Config::load()?))
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Setup {
            name,
            gemini_key,
            tavily_key,
        } => commands::setup(&mut load_context()?, &name, &gemini_key, &tavily_key),
        Commands::Reset => commands::reset(&mut load_context()?),
        Commands::History { page, search } => {
            commands::history(&load_context()?, page, search.as_deref()).await
        }
        Commands::Show { conversation } => commands::show(&load_context()?, &conversation).await,
        Commands::Chat {
            conversation,
            attachments,
            prompt,
        } => {
            let ctx = load_context()?;
            commands::chat(&ctx, conversation.as_deref(), &attachments, &prompt).await
        }
        Commands::Calc { keys } => commands::calc(&keys).map(|_| ()),
        Commands::Timer { minutes } => commands::timer(&load_context()?, minutes).await,
    }
}
