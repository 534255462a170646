pub mod commands;
pub mod config;
pub mod db;
pub mod llm;
pub mod pipeline;
pub mod security;
pub mod transcript;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::commands::{has_rows, Command, Flow, Session};
use crate::config::AppConfig;
use crate::db::connectors::create_connector;
use crate::db::gateway::DatabaseGateway;
use crate::llm::{AzureOpenAiClient, CompletionBackend};
use crate::pipeline::Pipeline;
use crate::transcript::TranscriptStore;

/// Ask questions about a construction schedule database in plain language
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML secrets file; environment variables (and .env) are used otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Run a single question, print the result and exit
    #[arg(long)]
    ask: Option<String>,
    /// With --ask, also explain the result
    #[arg(long, requires = "ask")]
    summarize: bool,
    /// Refuse statements that modify data
    #[arg(long)]
    read_only: bool,
    /// SQLite file that records every turn
    #[arg(long)]
    transcript: Option<PathBuf>,
    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => {
            if let Err(e) = dotenvy::dotenv() {
                log::debug!("No .env file loaded: {}", e);
            }
            AppConfig::from_env()?
        }
    };
    if cli.read_only {
        config.pipeline.read_only = true;
    }
    Ok(config)
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(&cli)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_session(cli, config))
}

async fn run_session(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    if !config.llm.has_credentials() {
        log::warn!("Azure OpenAI credentials are missing; SQL generation and summaries will fail");
    }
    log::info!(
        "Using {} database{}",
        config.database.engine,
        if config.pipeline.read_only { " (read-only mode)" } else { "" }
    );

    let gateway = DatabaseGateway::new(create_connector(config.database.clone()));
    let backend: Arc<dyn CompletionBackend> =
        Arc::new(AzureOpenAiClient::new(&config.llm.api_key, &config.llm.endpoint));
    let pipeline = Pipeline::new(gateway, backend, &config.llm, config.pipeline.clone());
    let transcript = cli
        .transcript
        .as_deref()
        .map(TranscriptStore::open)
        .transpose()?;

    let mut session = Session::new(pipeline, transcript, std::io::stdout());

    if let Some(question) = cli.ask {
        session.handle(Command::Ask(question)).await?;
        if cli.summarize && session.pipeline().current_turn().is_some_and(has_rows) {
            session.handle(Command::Summarize).await?;
        }
    } else {
        repl(&mut session).await?;
    }

    session.shutdown().await;
    Ok(())
}

async fn repl<W: Write + Send>(session: &mut Session<W>) -> anyhow::Result<()> {
    println!("Ask a question about the schedule, or :help for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("schedule> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if session.handle_line(&line).await? == Flow::Quit {
            break;
        }
    }
    Ok(())
}
