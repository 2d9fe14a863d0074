//! Memory engine: primary CRUD, deduplication, embedding orchestration,
//! graph writes, and recall
//!
//! One engine owns the store, the vector index, and an embedder. Writes
//! serialise through the storage handle; the embedder runs before the write
//! transaction opens so the lock is never held across a (possibly slow)
//! embedding call.

mod recall;
mod session;

pub use recall::ComposeResult;
pub use session::SessionContextReport;

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::citation::{self, VerifyOutcome};
use crate::embedding::Embedder;
use crate::error::{PhloemError, Result};
use crate::graph::{self, causal::extract_causes};
use crate::index::VecIndex;
use crate::storage::{queries, Storage};
use crate::types::{merge_tags, Edge, EdgeType, Memory, MemoryId, MemoryStats};

/// The memory engine
pub struct MemoryEngine {
    storage: Storage,
    index: Arc<VecIndex>,
    embedder: Arc<dyn Embedder>,
}

impl Clone for MemoryEngine {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            index: self.index.clone(),
            embedder: self.embedder.clone(),
        }
    }
}

impl MemoryEngine {
    /// Build an engine over an open store
    pub fn new(storage: Storage, embedder: Arc<dyn Embedder>) -> Self {
        let index = VecIndex::open(storage.clone(), embedder.dimension());
        match index.backfill() {
            Ok(0) => {}
            Ok(n) => tracing::info!("backfilled {} embeddings into the vector index", n),
            Err(e) => tracing::warn!("vector index backfill failed: {}", e),
        }
        Self {
            storage,
            index: Arc::new(index),
            embedder,
        }
    }

    /// Open the engine against the default data directory
    pub fn open_default(embedder: Arc<dyn Embedder>) -> Result<Self> {
        let db_path = crate::config::db_path()?;
        let storage = Storage::open(db_path.to_string_lossy().as_ref())?;
        Ok(Self::new(storage, embedder))
    }

    /// Open an engine over an in-memory store (testing)
    pub fn open_in_memory(embedder: Arc<dyn Embedder>) -> Result<Self> {
        Ok(Self::new(Storage::open_in_memory()?, embedder))
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.storage
    }

    pub(crate) fn index(&self) -> &VecIndex {
        &self.index
    }

    pub(crate) fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Store a memory, deduplicating on (content hash, scope)
    ///
    /// A dedupe hit merges the tag sets in a single transaction and returns
    /// the existing memory; that is the only update semantics for
    /// content-identical input. Index insert, temporal edge, and causal
    /// extraction are best-effort and never fail the write.
    pub fn remember(
        &self,
        content: &str,
        tags: &[String],
        context: Option<&str>,
        scope: Option<&str>,
    ) -> Result<Memory> {
        if content.trim().is_empty() {
            return Err(PhloemError::InvalidArgument(
                "memory content must not be empty".to_string(),
            ));
        }

        let hash = crate::types::content_hash(content);
        let merged_id = self.storage.with_transaction(|conn| {
            match queries::find_by_content_hash(conn, &hash, scope)? {
                Some(existing) => {
                    let merged = merge_tags(&existing.tags, tags);
                    queries::merge_memory_tags(conn, &existing.id, &merged, Utc::now())?;
                    Ok(Some(existing.id))
                }
                None => Ok(None),
            }
        })?;
        if let Some(id) = merged_id {
            return self.get(&id);
        }

        // Embed before the write transaction opens
        let embedding = self.embedder.embed(content)?;

        let mut memory = Memory::new(
            content.to_string(),
            tags.to_vec(),
            context.map(|c| c.to_string()).filter(|c| !c.is_empty()),
            scope.map(|s| s.to_string()).filter(|s| !s.is_empty()),
        );
        memory.embedding = embedding;

        self.persist_new(&memory)?;
        self.schedule_causal_extraction(memory.id.clone(), memory.content.clone());
        Ok(memory)
    }

    /// Direct insert with caller-supplied id and timestamps (importers)
    ///
    /// A dedupe hit is a silent no-op returning the existing memory, which
    /// keeps graft re-import idempotent.
    pub fn add(&self, memory: Memory) -> Result<Memory> {
        if memory.content.trim().is_empty() {
            return Err(PhloemError::InvalidArgument(
                "memory content must not be empty".to_string(),
            ));
        }

        let mut memory = memory;
        if memory.content_hash.is_empty() {
            memory.content_hash = crate::types::content_hash(&memory.content);
        }
        if let Some(existing) = self.storage.with_connection(|conn| {
            queries::find_by_content_hash(conn, &memory.content_hash, memory.scope.as_deref())
        })? {
            return Ok(existing);
        }

        if memory.embedding.len() != self.embedder.dimension() {
            memory.embedding = self.embedder.embed(&memory.content)?;
        }

        self.persist_new(&memory)?;
        self.schedule_causal_extraction(memory.id.clone(), memory.content.clone());
        Ok(memory)
    }

    /// Shared tail of remember/add: row write, then best-effort index insert
    /// and temporal edge
    fn persist_new(&self, memory: &Memory) -> Result<()> {
        let previous = self
            .storage
            .with_connection(|conn| graph::previous_memory_id(conn, memory.created_at))
            .unwrap_or_default();

        self.storage.with_transaction(|conn| {
            queries::insert_memory(conn, memory)?;
            if let Some(scope) = &memory.scope {
                queries::upsert_scope(conn, scope, memory.created_at)?;
            }
            Ok(())
        })?;

        if let Err(e) = self.index.insert(&memory.id, &memory.embedding) {
            tracing::warn!("vector index insert failed for {}: {}", memory.id, e);
        }

        if let Some(previous) = previous {
            let result = self.storage.with_transaction(|conn| {
                graph::add_edge(conn, &previous, &memory.id, "temporal", None)
            });
            if let Err(e) = result {
                tracing::warn!("temporal edge insert failed for {}: {}", memory.id, e);
            }
        }
        Ok(())
    }

    /// Delete a memory and everything hanging off it
    pub fn forget(&self, id: &str) -> Result<()> {
        self.storage
            .with_transaction(|conn| queries::delete_memory(conn, id))?;
        if let Err(e) = self.index.delete(id) {
            tracing::warn!("vector index delete failed for {}: {}", id, e);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Fetch a memory by id
    pub fn get(&self, id: &str) -> Result<Memory> {
        self.storage.with_connection(|conn| queries::get_memory(conn, id))
    }

    /// List memories, newest first; `limit = 0` means no limit
    pub fn list(&self, limit: usize, filter_tags: Option<&[String]>) -> Result<Vec<Memory>> {
        self.storage
            .with_connection(|conn| queries::list_memories(conn, limit, filter_tags))
    }

    /// Total memory count
    pub fn count(&self) -> Result<i64> {
        self.storage.with_connection(queries::count_memories)
    }

    /// Scopes seen so far, most recently touched first
    pub fn scopes(&self) -> Result<Vec<crate::types::Scope>> {
        self.storage.with_connection(queries::list_scopes)
    }

    /// Memories created within `max_age` bearing an important tag
    pub fn recent_important(&self, max_age: Duration, k: usize) -> Result<Vec<Memory>> {
        let cutoff = Utc::now() - max_age;
        self.storage
            .with_connection(|conn| queries::recent_important(conn, cutoff, k))
    }

    /// Store statistics for the stats tool
    pub fn stats(&self) -> Result<MemoryStats> {
        let (memory_count, citation_count, edge_count, last_activity) =
            self.storage.with_connection(|conn| {
                Ok((
                    queries::count_memories(conn)?,
                    queries::count_citations(conn)?,
                    queries::count_edges(conn)?,
                    queries::last_activity(conn)?,
                ))
            })?;
        Ok(MemoryStats {
            memory_count,
            citation_count,
            edge_count,
            db_size_bytes: self.storage.db_size().unwrap_or(0),
            last_activity,
        })
    }

    // ------------------------------------------------------------------
    // Citations
    // ------------------------------------------------------------------

    pub fn add_citation(
        &self,
        memory_id: &str,
        file_path: &str,
        start_line: u32,
        end_line: u32,
        commit: Option<&str>,
        snapshot: Option<&str>,
    ) -> Result<crate::types::Citation> {
        self.storage.with_transaction(|conn| {
            citation::add_citation(conn, memory_id, file_path, start_line, end_line, commit, snapshot)
        })
    }

    pub fn verify_citation(&self, id: &str) -> Result<VerifyOutcome> {
        self.storage
            .with_transaction(|conn| citation::verify_citation(conn, id))
    }

    pub fn get_citations(&self, memory_id: &str) -> Result<Vec<crate::types::Citation>> {
        self.storage
            .with_connection(|conn| citation::get_citations(conn, memory_id))
    }

    pub fn memory_confidence(&self, memory_id: &str) -> Result<f32> {
        self.storage
            .with_connection(|conn| citation::memory_confidence(conn, memory_id))
    }

    /// Verify every citation of a memory; errors if the memory is unknown
    pub fn verify_memory(&self, memory_id: &str) -> Result<Vec<VerifyOutcome>> {
        self.get(memory_id)?;
        let citations = self.get_citations(memory_id)?;
        let mut outcomes = Vec::with_capacity(citations.len());
        for c in citations {
            outcomes.push(self.verify_citation(&c.id)?);
        }
        Ok(outcomes)
    }

    // ------------------------------------------------------------------
    // Graph
    // ------------------------------------------------------------------

    pub fn add_edge(
        &self,
        source_id: &str,
        target_id: &str,
        edge_type: &str,
        payload: Option<&str>,
    ) -> Result<Option<Edge>> {
        self.storage
            .with_transaction(|conn| graph::add_edge(conn, source_id, target_id, edge_type, payload))
    }

    pub fn edges_from(&self, source_id: &str, edge_type: Option<EdgeType>) -> Result<Vec<Edge>> {
        self.storage
            .with_connection(|conn| graph::edges_from(conn, source_id, edge_type))
    }

    pub fn edges_to(&self, target_id: &str, edge_type: Option<EdgeType>) -> Result<Vec<Edge>> {
        self.storage
            .with_connection(|conn| graph::edges_to(conn, target_id, edge_type))
    }

    pub fn causal_neighbors(&self, id: &str) -> Result<Vec<Memory>> {
        self.get(id)?;
        self.storage
            .with_connection(|conn| graph::causal_neighbors(conn, id))
    }

    pub fn affected_if_changed(&self, id: &str) -> Result<Vec<MemoryId>> {
        self.get(id)?;
        self.storage
            .with_connection(|conn| graph::affected_if_changed(conn, id))
    }

    // ------------------------------------------------------------------
    // Causal extraction (fire-and-forget)
    // ------------------------------------------------------------------

    fn schedule_causal_extraction(&self, memory_id: MemoryId, content: String) {
        let engine = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || engine.extract_and_link(&memory_id, &content));
            }
            // No runtime (tests, synchronous callers): run inline after the
            // row is already committed
            Err(_) => self.extract_and_link(&memory_id, &content),
        }
    }

    /// Resolve causal hints against the store; every failure is swallowed
    fn extract_and_link(&self, memory_id: &str, content: &str) {
        for hint in extract_causes(content) {
            let matched = match self.recall(&hint.phrase, 1, None, None) {
                Ok(memories) => memories.into_iter().next(),
                Err(e) => {
                    tracing::debug!("causal recall failed for {}: {}", memory_id, e);
                    continue;
                }
            };
            let Some(matched) = matched else { continue };
            if matched.id == memory_id {
                continue;
            }
            let result = self.storage.with_transaction(|conn| {
                graph::add_edge(conn, memory_id, &matched.id, "causal", Some(&hint.reason))
            });
            if let Err(e) = result {
                tracing::debug!("causal edge insert failed for {}: {}", memory_id, e);
            }
        }
    }
}
