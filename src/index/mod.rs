//! Approximate nearest-neighbour index over sqlite-vec
//!
//! Embeddings live in a `vec0` virtual table inside the main database file,
//! keyed through the `vec_map` rowid mapping. `vec_meta` records the indexed
//! dimension so a changed embedder truncates the index instead of serving
//! mixed-dimension results.
//!
//! Availability contract: if the extension cannot be registered or the
//! virtual table cannot be created, every operation becomes a no-op and
//! recall falls back to a linear scan. Logged once, never surfaced to
//! callers.

use once_cell::sync::Lazy;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::storage::Storage;
use crate::types::MemoryId;

/// Process-wide registration of the sqlite-vec extension; must complete
/// before the first connection opens.
static VEC_EXTENSION: Lazy<bool> = Lazy::new(|| unsafe {
    let rc = rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
        sqlite_vec::sqlite3_vec_init as *const (),
    )));
    rc == rusqlite::ffi::SQLITE_OK
});

/// Register the sqlite-vec extension for all future connections
pub(crate) fn ensure_extension() -> bool {
    *VEC_EXTENSION
}

/// Approximate KNN index keyed by memory id
pub struct VecIndex {
    storage: Storage,
    dimension: usize,
    available: bool,
}

impl VecIndex {
    /// Open the index for the given dimension, truncating on dimension change
    pub fn open(storage: Storage, dimension: usize) -> Self {
        let available = match Self::initialize(&storage, dimension) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "vector index unavailable, falling back to linear scan: {}",
                    e
                );
                false
            }
        };

        Self {
            storage,
            dimension,
            available,
        }
    }

    fn initialize(storage: &Storage, dimension: usize) -> Result<()> {
        if !ensure_extension() {
            return Err(crate::error::PhloemError::Storage(
                "sqlite-vec extension registration failed".to_string(),
            ));
        }

        storage.with_transaction(|conn| {
            let stored = stored_dimension(conn)?;
            if stored.map(|d| d != dimension).unwrap_or(false) {
                tracing::info!(
                    "embedding dimension changed ({} -> {}), truncating vector index",
                    stored.unwrap_or(0),
                    dimension
                );
                conn.execute("DROP TABLE IF EXISTS vec_memories", [])?;
                conn.execute("DELETE FROM vec_map", [])?;
            }

            conn.execute(
                &format!(
                    "CREATE VIRTUAL TABLE IF NOT EXISTS vec_memories USING vec0(
                        embedding float[{}] distance_metric=cosine
                    )",
                    dimension
                ),
                [],
            )?;
            conn.execute(
                "INSERT INTO vec_meta (key, value) VALUES ('dimension', ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![dimension.to_string()],
            )?;
            Ok(())
        })
    }

    /// Whether the index can serve queries
    pub fn available(&self) -> bool {
        self.available
    }

    /// Indexed dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Upsert a vector for a memory id
    pub fn insert(&self, id: &str, vector: &[f32]) -> Result<()> {
        if !self.available || vector.len() != self.dimension {
            return Ok(());
        }
        self.storage.with_transaction(|conn| {
            let rowid = map_rowid(conn, id)?;
            // vec0 handles plain INSERT/DELETE; upsert is delete-then-insert
            conn.execute("DELETE FROM vec_memories WHERE rowid = ?", params![rowid])?;
            conn.execute(
                "INSERT INTO vec_memories (rowid, embedding) VALUES (?, ?)",
                params![rowid, vector_blob(vector)],
            )?;
            Ok(())
        })
    }

    /// Remove a memory id from the index (idempotent)
    pub fn delete(&self, id: &str) -> Result<()> {
        if !self.available {
            return Ok(());
        }
        self.storage.with_transaction(|conn| {
            let rowid: Option<i64> = conn
                .query_row(
                    "SELECT rowid FROM vec_map WHERE memory_id = ?",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(rowid) = rowid {
                conn.execute("DELETE FROM vec_memories WHERE rowid = ?", params![rowid])?;
                conn.execute("DELETE FROM vec_map WHERE rowid = ?", params![rowid])?;
            }
            Ok(())
        })
    }

    /// KNN search; results in non-decreasing cosine distance (1 - cos, [0, 2])
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(MemoryId, f32)>> {
        if !self.available || k == 0 || query.len() != self.dimension {
            return Ok(Vec::new());
        }
        self.storage.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT m.memory_id, v.distance
                 FROM vec_memories v
                 JOIN vec_map m ON m.rowid = v.rowid
                 WHERE v.embedding MATCH ? AND k = ?
                 ORDER BY v.distance",
            )?;
            let rows = stmt.query_map(params![vector_blob(query), k as i64], |row| {
                let id: String = row.get(0)?;
                let distance: f64 = row.get(1)?;
                Ok((id, distance as f32))
            })?;

            let mut results = Vec::with_capacity(k);
            for row in rows {
                results.push(row?);
            }
            Ok(results)
        })
    }

    /// Index memories whose stored embedding has the indexed dimension and no
    /// mapping row yet. Returns the number of vectors inserted.
    pub fn backfill(&self) -> Result<usize> {
        if !self.available {
            return Ok(0);
        }
        let pending = self
            .storage
            .with_connection(crate::storage::queries::unindexed_embeddings)?;

        let mut inserted = 0;
        for (id, embedding) in pending {
            if embedding.len() == self.dimension {
                self.insert(&id, &embedding)?;
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Number of indexed vectors
    pub fn len(&self) -> Result<usize> {
        if !self.available {
            return Ok(0);
        }
        self.storage.with_connection(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM vec_map", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Fetch-or-assign the integer rowid for a memory id
fn map_rowid(conn: &Connection, memory_id: &str) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO vec_map (memory_id) VALUES (?)",
        params![memory_id],
    )?;
    let rowid: i64 = conn.query_row(
        "SELECT rowid FROM vec_map WHERE memory_id = ?",
        params![memory_id],
        |row| row.get(0),
    )?;
    Ok(rowid)
}

/// Stored dimension from vec_meta, if any
fn stored_dimension(conn: &Connection) -> Result<Option<usize>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM vec_meta WHERE key = 'dimension'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()))
}

/// Little-endian f32 blob as sqlite-vec expects
fn vector_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}
