//! Phloem CLI
//!
//! Command-line interface for memory management.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use phloem::curation;
use phloem::embedding::create_embedder;
use phloem::engine::MemoryEngine;
use phloem::graft;
use phloem::storage::Storage;
use phloem::types::{BlendOptions, Memory};

#[derive(Parser)]
#[command(name = "phloem")]
#[command(about = "Local-first AI memory engine CLI")]
#[command(version)]
struct Cli {
    /// Database path (defaults to $PHLOEM_DATA_DIR/memories.db)
    #[arg(long)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a memory
    Remember {
        /// Content to remember
        content: String,
        /// Tags (comma-separated)
        #[arg(short = 'T', long)]
        tags: Option<String>,
        /// Context string
        #[arg(short, long)]
        context: Option<String>,
        /// Scope (typically a repository)
        #[arg(short, long)]
        scope: Option<String>,
    },
    /// Recall memories ranked against a query
    Recall {
        /// Search query
        query: String,
        /// Maximum results
        #[arg(short, long, default_value = "5")]
        limit: usize,
        /// Filter by tags (comma-separated)
        #[arg(short = 'T', long)]
        tags: Option<String>,
        /// Filter by scope
        #[arg(short, long)]
        scope: Option<String>,
    },
    /// Show a memory by id
    Get {
        /// Memory id
        id: String,
    },
    /// List memories, newest first
    List {
        /// Maximum number to return (0 = no limit)
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Filter by tags (comma-separated)
        #[arg(short = 'T', long)]
        tags: Option<String>,
    },
    /// Delete a memory
    Forget {
        /// Memory id
        id: String,
    },
    /// Show store statistics
    Stats,
    /// Print the session-start briefing
    Context {
        /// Topic hint
        hint: Option<String>,
    },
    /// Run the curation pass
    Dream {
        /// Only decay citations older than this many days
        #[arg(long)]
        max_age_days: Option<i64>,
        /// Decay factor for the windowed mode
        #[arg(long, default_value = "0.9")]
        factor: f32,
    },
    /// Export memories into a graft bundle
    Export {
        /// Output file
        output: PathBuf,
        /// Bundle name
        #[arg(short, long)]
        name: String,
        /// Bundle description
        #[arg(short, long, default_value = "")]
        description: String,
        /// Author attribution
        #[arg(short, long, default_value = "")]
        author: String,
        /// Only export memories bearing one of these tags (comma-separated)
        #[arg(short = 'T', long)]
        tags: Option<String>,
    },
    /// Import a graft bundle
    Import {
        /// Graft file
        input: PathBuf,
    },
    /// Show a graft manifest without importing
    Inspect {
        /// Graft file
        input: PathBuf,
    },
}

fn split_tags(tags: Option<String>) -> Option<Vec<String>> {
    tags.map(|t| {
        t.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn print_memory(memory: &Memory) {
    let tags = if memory.tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", memory.tags.join(", "))
    };
    let scope = memory
        .scope
        .as_deref()
        .map(|s| format!(" ({})", s))
        .unwrap_or_default();
    println!("{}  {}{}{}", memory.id, memory.content, tags, scope);
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("PHLOEM_LOG").unwrap_or_else(|_| "warn".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let embedder = create_embedder(None).context("failed to build embedder")?;
    let engine = match &cli.db_path {
        Some(path) => {
            let storage = Storage::open(path).context("failed to open database")?;
            MemoryEngine::new(storage, embedder)
        }
        None => MemoryEngine::open_default(embedder).context("failed to open data directory")?,
    };

    match cli.command {
        Commands::Remember {
            content,
            tags,
            context,
            scope,
        } => {
            let tags = split_tags(tags).unwrap_or_default();
            let memory = engine.remember(&content, &tags, context.as_deref(), scope.as_deref())?;
            println!("remembered {}", memory.id);
        }
        Commands::Recall {
            query,
            limit,
            tags,
            scope,
        } => {
            let tags = split_tags(tags);
            let memories = if tags.is_some() || scope.is_some() {
                engine.recall(&query, limit, tags.as_deref(), scope.as_deref())?
            } else {
                engine.recall_blended(&query, limit, &BlendOptions::default())?
            };
            for memory in &memories {
                print_memory(memory);
            }
        }
        Commands::Get { id } => {
            let memory = engine.get(&id)?;
            println!("{}", serde_json::to_string_pretty(&memory)?);
        }
        Commands::List { limit, tags } => {
            let tags = split_tags(tags);
            for memory in engine.list(limit, tags.as_deref())? {
                print_memory(&memory);
            }
        }
        Commands::Forget { id } => {
            engine.forget(&id)?;
            println!("forgotten {}", id);
        }
        Commands::Stats => {
            let stats = engine.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Context { hint } => {
            let report = engine.session_context(hint.as_deref())?;
            println!("{}", report.text);
        }
        Commands::Dream {
            max_age_days,
            factor,
        } => match max_age_days {
            Some(days) => {
                let decayed =
                    curation::dream_once(&engine, chrono::Duration::days(days), factor)?;
                println!("decayed {} citations", decayed);
            }
            None => {
                let report = curation::run_nightly(&engine)?;
                println!(
                    "decayed {} citations, added {} semantic edges",
                    report.decayed_citations, report.edges_added
                );
            }
        },
        Commands::Export {
            output,
            name,
            description,
            author,
            tags,
        } => {
            let tags = split_tags(tags);
            let manifest = graft::export_graft(
                &engine,
                &output,
                &name,
                &description,
                &author,
                tags.as_deref(),
            )?;
            println!(
                "packaged {} memories into {}",
                manifest.memory_count,
                output.display()
            );
        }
        Commands::Import { input } => {
            let summary = graft::import_graft(&engine, &input)?;
            println!(
                "imported {} memories ({} already present, {} citations)",
                summary.imported, summary.skipped, summary.citations
            );
        }
        Commands::Inspect { input } => {
            let manifest = graft::inspect(&input)?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
    }

    Ok(())
}
