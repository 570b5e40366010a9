// src/main.rs
// CLI entrypoint: load the sources config, run one ingestion pass, print
// the run report as JSON. The in-memory store and hashing embedder make
// this runnable without external services; production embeds this crate
// as a library with real collaborators.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use signal_harvester::embed::HashingEmbedder;
use signal_harvester::{IngestionPipeline, MemoryStore, RunOptions, SignalsConfig};

#[derive(Debug, Parser)]
#[command(name = "signal-harvester", about = "Run one signal ingestion pass")]
struct Args {
    /// Path to the sources config (JSON).
    #[arg(long, default_value = "config/signals_sources.json")]
    config: PathBuf,

    /// Restrict the run to these source ids (repeatable).
    #[arg(long = "source")]
    sources: Vec<String>,

    /// Re-ingest items already on record.
    #[arg(long)]
    force: bool,

    /// Directory for run reports and logs.
    #[arg(long, default_value = "data/signals")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config_path = std::env::var("SIGNALS_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or(args.config);
    let config = SignalsConfig::load(&config_path)?;

    let store = Arc::new(MemoryStore::new());
    let embedder = Arc::new(HashingEmbedder::default());
    let pipeline = IngestionPipeline::new(config, store, embedder, args.data_dir);

    let report = pipeline
        .run(RunOptions {
            source_ids: args.sources,
            force: args.force,
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
