//! NileCare chat CLI - main entry point
//!
//! Indexes the knowledge base, connects to the local model and runs an
//! interactive console conversation.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nilecare_chat::config::derive_storage_dir;
use nilecare_chat::{app, metrics, Config};

#[derive(Parser)]
#[command(name = "nilecare_chat")]
#[command(about = "Health chat assistant grounded in a local knowledge base", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config.yml (defaults to ./config.yml or ../config.yml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ollama model name
    #[arg(short, long, env = "OLLAMA_MODEL_NAME")]
    model: Option<String>,

    /// Knowledge base file
    #[arg(short, long, env = "NILECARE_KNOWLEDGE_FILE")]
    knowledge: Option<PathBuf>,

    /// Reuse the existing index instead of rebuilding it
    #[arg(long, default_value_t = false)]
    skip_ingest: bool,

    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,
}

/// What the user typed, after trimming.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Exit,
    Reset,
    Empty,
    Message(&'a str),
}

fn classify(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        Input::Empty
    } else if line.eq_ignore_ascii_case("exit") {
        Input::Exit
    } else if line.eq_ignore_ascii_case("reset") {
        Input::Reset
    } else {
        Input::Message(line)
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::new()?,
    };

    if let Some(model) = &cli.model {
        config.model_name = model.clone();
    }
    if let Some(knowledge) = &cli.knowledge {
        config.knowledge_file = knowledge.clone();
        config.storage_dir = derive_storage_dir(knowledge);
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("nilecare_chat=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr.as_deref() {
        match addr.parse::<SocketAddr>() {
            Ok(socket) => metrics::spawn_metrics_server(socket),
            Err(err) => warn!(%addr, "Invalid metrics address: {}", err),
        }
    }

    let config = load_config(&cli)?;

    let embedder = app::build_embedder(&config).context("Failed to build embedder")?;
    let store = app::open_store(&config, embedder)
        .await
        .context("Failed to open vector store")?;

    if cli.skip_ingest {
        info!("Skipping knowledge base ingestion");
    } else {
        let stored = app::ingest_knowledge(&config, store.as_ref())
            .await
            .context("Failed to index knowledge base")?;
        info!(
            "Indexed {} records from {}",
            stored,
            config.knowledge_file.display()
        );
    }

    let mut assistant = app::build_assistant(&config, store)
        .await
        .context("Failed to initialize the chat model")?;

    println!("Starting NileCare Chatbot with model: {}", config.model_name);
    println!("\n--- NileCare Chatbot (Type 'exit' to quit, 'reset' to clear conversation) ---");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        stdout.write_all(b"You: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match classify(&line) {
            Input::Exit => break,
            Input::Empty => continue,
            Input::Reset => {
                assistant.reset_conversation();
                println!("Chatbot: Conversation history cleared.");
            }
            Input::Message(text) => {
                let reply = assistant.process_message(text).await;
                println!("Chatbot: {}", reply);
            }
        }
    }

    println!("Exiting chatbot. Goodbye!");
    Ok(())
}
