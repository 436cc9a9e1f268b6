//! Query the knowledge base index without involving the chat model

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use nilecare_chat::app;
use nilecare_chat::config::{derive_storage_dir, Config};
use nilecare_chat::rag::retriever::distance_to_similarity;

#[derive(Parser)]
#[command(name = "kb_query")]
#[command(about = "Search the indexed health knowledge base")]
struct Cli {
    /// Search query
    query: String,

    /// Number of nearest records to show
    #[arg(short = 'n', long, default_value = "3")]
    limit: usize,

    /// Path to config.yml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Knowledge base file
    #[arg(short, long, env = "NILECARE_KNOWLEDGE_FILE")]
    knowledge: Option<PathBuf>,

    /// Rebuild the index from the knowledge file first
    #[arg(long)]
    rebuild: bool,

    /// Characters of content to print per hit
    #[arg(long, default_value = "160")]
    snippet: usize,
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::new()?,
    };
    if let Some(knowledge) = &cli.knowledge {
        config.knowledge_file = knowledge.clone();
        config.storage_dir = derive_storage_dir(knowledge);
    }

    let embedder = app::build_embedder(&config)?;
    let store = app::open_store(&config, embedder).await?;

    if cli.rebuild {
        let stored = app::ingest_knowledge(&config, store.as_ref()).await?;
        println!(
            "Indexed {} records from {}\n",
            stored,
            config.knowledge_file.display()
        );
    }

    let total = store.count().await?;
    if total == 0 {
        println!("Collection '{}' is empty. Run with --rebuild.", config.collection);
        return Ok(());
    }

    println!(
        "Searching {} records in '{}' for '{}' (threshold {:.2})\n",
        total, config.collection, cli.query, config.min_similarity
    );

    let matches = store.query(&cli.query, cli.limit).await?;
    for (idx, hit) in matches.iter().enumerate() {
        let similarity = distance_to_similarity(hit.distance);
        let marker = if similarity >= config.min_similarity {
            "✓"
        } else {
            " "
        };
        println!(
            "{} {}. {} (distance {:.3}, similarity {:.3})",
            marker,
            idx + 1,
            hit.metadata.get("title").map(String::as_str).unwrap_or("untitled"),
            hit.distance,
            similarity
        );
        println!("     {}\n", snippet(&hit.text, cli.snippet));
    }

    Ok(())
}
