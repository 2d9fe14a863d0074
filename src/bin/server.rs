//! Phloem MCP server
//!
//! Run with: phloem-server

use anyhow::Context;
use clap::Parser;

use phloem::embedding::create_embedder;
use phloem::engine::MemoryEngine;
use phloem::mcp::{McpServer, ToolRouter};
use phloem::storage::Storage;

#[derive(Parser, Debug)]
#[command(name = "phloem-server")]
#[command(about = "Phloem MCP server for AI memory")]
struct Args {
    /// Database path (defaults to $PHLOEM_DATA_DIR/memories.db)
    #[arg(long)]
    db_path: Option<String>,

    /// Embedder selector (local)
    #[arg(long, env = "PHLOEM_EMBEDDINGS")]
    embeddings: Option<String>,

    /// Log filter (e.g. info, phloem=debug)
    #[arg(long, env = "PHLOEM_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(args.log.clone())
        .with_writer(std::io::stderr)
        .init();

    let embedder =
        create_embedder(args.embeddings.as_deref()).context("failed to build embedder")?;

    let engine = match &args.db_path {
        Some(path) => {
            let storage = Storage::open(path).context("failed to open database")?;
            MemoryEngine::new(storage, embedder)
        }
        None => MemoryEngine::open_default(embedder).context("failed to open data directory")?,
    };

    let stats = engine.stats()?;
    tracing::info!(
        "phloem-server {} ready ({} memories)",
        phloem::VERSION,
        stats.memory_count
    );

    let router = ToolRouter::new(engine);
    let server = McpServer::new(router);

    // The protocol loop is blocking line-oriented IO; run it off the runtime
    tokio::task::spawn_blocking(move || server.run())
        .await
        .context("server task panicked")??;

    Ok(())
}
