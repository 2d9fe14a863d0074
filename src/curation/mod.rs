//! Offline curation pass ("dreams")
//!
//! Runs out-of-band against the store: decays citation confidence, re-scores
//! memory utility from aggregate citation confidence, and links recent
//! memories to their nearest neighbours with semantic edges.

use chrono::Duration;

use crate::citation;
use crate::engine::MemoryEngine;
use crate::error::Result;
use crate::graph;
use crate::storage::queries;
use crate::types::EdgeType;

/// Recent-memory window examined by the dream linker
pub const DREAM_RECENT_LIMIT: usize = 30;

/// Semantic links attempted per memory
pub const DREAM_LINKS_PER_MEMORY: usize = 3;

/// Memories shorter than this carry too little signal to link
const MIN_DREAM_CONTENT_CHARS: usize = 10;

/// Summary of a nightly curation run
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DreamReport {
    pub decayed_citations: usize,
    pub edges_added: usize,
}

/// Full nightly pass: decay, critic re-scoring, semantic linking
pub fn run_nightly(engine: &MemoryEngine) -> Result<DreamReport> {
    let decayed_citations = engine
        .storage()
        .with_transaction(citation::decay_citations)?;
    run_critic(engine)?;
    let edges_added = run_dreams(engine, DREAM_RECENT_LIMIT, DREAM_LINKS_PER_MEMORY)?;
    Ok(DreamReport {
        decayed_citations,
        edges_added,
    })
}

/// Re-score utility from aggregate citation confidence
///
/// utility <- 0.5 + 0.5 * mean(confidence). Memories without citations are
/// untouched and stay at their default 1.0. Returns the number of memories
/// re-scored.
pub fn run_critic(engine: &MemoryEngine) -> Result<usize> {
    engine.storage().with_transaction(|conn| {
        let mut stmt = conn.prepare("SELECT DISTINCT memory_id FROM citations")?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        let mut rescored = 0;
        for id in ids {
            let confidence = citation::memory_confidence(conn, &id)?;
            queries::set_utility(conn, &id, 0.5 + 0.5 * confidence)?;
            rescored += 1;
        }
        Ok(rescored)
    })
}

/// Link each recent memory to its nearest neighbours with semantic edges
///
/// Returns the number of edges added. Recall failures for individual
/// memories are logged and skipped.
pub fn run_dreams(
    engine: &MemoryEngine,
    recent_limit: usize,
    links_per_memory: usize,
) -> Result<usize> {
    let recent = engine.list(recent_limit, None)?;
    let mut added = 0;

    for memory in recent {
        if memory.content.chars().count() < MIN_DREAM_CONTENT_CHARS {
            continue;
        }

        let neighbours = match engine.recall(&memory.content, links_per_memory + 1, None, None) {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("dream recall failed for {}: {}", memory.id, e);
                continue;
            }
        };

        for candidate in neighbours {
            if candidate.id == memory.id {
                continue;
            }
            let is_new = engine.storage().with_transaction(|conn| {
                if graph::edge_exists(conn, &memory.id, &candidate.id, EdgeType::Semantic)? {
                    return Ok(false);
                }
                graph::add_edge(conn, &memory.id, &candidate.id, "semantic", None)?;
                Ok(true)
            })?;
            if is_new {
                added += 1;
            }
        }
    }

    Ok(added)
}

/// Windowed decay only (the "dreams" tool entry point)
pub fn dream_once(engine: &MemoryEngine, max_age: Duration, factor: f32) -> Result<usize> {
    engine
        .storage()
        .with_transaction(|conn| citation::dream_decay(conn, max_age, factor))
}
