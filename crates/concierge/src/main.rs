//! Concierge - interactive support agent

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use concierge::ConciergeError;
use concierge::config::Config;
use concierge::conversation::{ConversationEngine, EngineServices};
use concierge::error::Result;
use concierge::knowledge::{index_knowledge, read_knowledge_file};
use concierge::monitor::{AlertQueue, TracingAlertSink};
use concierge::provider::{InMemoryIndex, RemoteEmbeddingProvider, RemoteGenerationProvider};

/// Concierge - customer-support agent with knowledge-base retrieval and human handoff
#[derive(Parser)]
#[command(name = "concierge")]
#[command(about = "Customer-support agent with knowledge-base retrieval and human handoff")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Chat on stdin, one message per line (default command)
    Chat {
        /// Session id for the conversation
        #[arg(long, short = 's', default_value = "local")]
        session: String,

        /// JSON knowledge file to index before chatting
        #[arg(long, short = 'k')]
        knowledge: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;
    config.validate()?;

    match cli.command {
        Some(Command::Config) => {
            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| ConciergeError::Serialization(e.to_string()))?;
            println!("{rendered}");
            Ok(())
        }
        Some(Command::Chat { session, knowledge }) => chat(config, session, knowledge).await,
        None => chat(config, "local".to_string(), None).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,concierge=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    if let Some(path) = config_path {
        tracing::info!("Loading config from: {}", path.display());
        return Config::from_file(&path);
    }

    let default_paths = [
        dirs::home_dir().map(|h| h.join(".concierge").join("config.toml")),
        dirs::config_dir().map(|c| c.join("concierge").join("config.toml")),
        Some(PathBuf::from("config.toml")),
    ];

    for path in default_paths.iter().flatten() {
        if path.exists() {
            tracing::info!("Loading config from: {}", path.display());
            return Config::from_file(path);
        }
    }

    tracing::info!("No config file found, using defaults");
    Ok(Config::default())
}

async fn chat(config: Config, session: String, knowledge: Option<PathBuf>) -> Result<()> {
    let embedder = Arc::new(RemoteEmbeddingProvider::new(&config.provider)?);
    let generator = Arc::new(RemoteGenerationProvider::new(&config.provider)?);
    let index = Arc::new(InMemoryIndex::new());

    let services = EngineServices::build(&config, embedder, index.clone(), generator);
    let sweeper = services.cache.spawn_sweeper(config.cache.sweep_interval());

    if let Some(path) = knowledge {
        let entries = read_knowledge_file(&path)?;
        index_knowledge(entries, &services.dispatcher, &index).await?;
    }

    let (alerts, alert_worker) = AlertQueue::spawn(
        Arc::new(TracingAlertSink),
        config.monitor.alert_queue_capacity,
    );
    let engine = ConversationEngine::new(config, services).with_alerts(alerts);

    tracing::info!("Chatting as session '{}'. Commands: /history /clear /escalate <reason> /feedback <turn> <rating> [comment] /health /costs", session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(command) = line.strip_prefix('/') {
            if let Err(e) = run_command(&engine, &session, command) {
                eprintln!("Error: {e}");
            }
            continue;
        }

        match engine.process_message(line, &session).await {
            Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            Err(e) => eprintln!("Error: {e}"),
        }
    }

    println!("{}", serde_json::to_string_pretty(&engine.cost_report(30))?);
    println!("{}", serde_json::to_string_pretty(&engine.health_report(None))?);

    // Dropping the engine closes the alert queue so the worker can drain
    drop(engine);
    sweeper.abort();
    if let Err(e) = alert_worker.await {
        tracing::warn!("Alert worker ended abnormally: {}", e);
    }
    Ok(())
}

fn run_command(engine: &ConversationEngine, session: &str, command: &str) -> Result<()> {
    let mut parts = command.splitn(2, ' ');
    let name = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default().trim();

    match name {
        "history" => {
            let history = engine.session_history(session)?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        "clear" => {
            let removed = engine.clear_session(session)?;
            println!("{}", if removed { "Session cleared" } else { "No session to clear" });
        }
        "escalate" => {
            let reason = if rest.is_empty() { "Requested by user" } else { rest };
            let ticket = engine.escalate_to_human(session, reason)?;
            println!("{}", serde_json::to_string_pretty(&ticket)?);
        }
        "feedback" => {
            let mut args = rest.splitn(3, ' ');
            let turn = args
                .next()
                .and_then(|t| t.parse::<usize>().ok())
                .ok_or_else(|| ConciergeError::General("Usage: /feedback <turn> <rating> [comment]".to_string()))?;
            let rating = args
                .next()
                .and_then(|r| r.parse::<u8>().ok())
                .ok_or_else(|| ConciergeError::General("Rating must be a number from 1 to 5".to_string()))?;
            let comment = args.next().unwrap_or_default();
            let feedback = engine.add_feedback(session, turn, rating, comment)?;
            println!("{}", serde_json::to_string_pretty(&feedback)?);
        }
        "health" => println!("{}", serde_json::to_string_pretty(&engine.health_report(None))?),
        "costs" => println!("{}", serde_json::to_string_pretty(&engine.cost_report(30))?),
        other => {
            return Err(ConciergeError::General(format!("Unknown command: /{other}")));
        }
    }
    Ok(())
}
