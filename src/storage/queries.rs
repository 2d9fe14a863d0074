//! Database queries for memory rows, tags, and scopes

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{PhloemError, Result};
use crate::types::{Memory, MemoryId, IMPORTANT_TAGS};

/// Column list shared by every memory SELECT
pub const MEMORY_COLUMNS: &str = "id, content, tags, context, embedding, created_at, updated_at, \
     utility_score, scope, content_hash, source";

/// Parse an RFC 3339 timestamp, falling back to now for corrupt rows
fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a memory from a database row (column order = MEMORY_COLUMNS)
pub fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
    let id: String = row.get(0)?;
    let content: String = row.get(1)?;
    let tags_json: String = row.get(2)?;
    let context: Option<String> = row.get(3)?;
    let embedding_json: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    // Columns added by later migrations may be NULL in old rows
    let utility_score: Option<f32> = row.get(7)?;
    let scope: Option<String> = row.get(8)?;
    let content_hash: Option<String> = row.get(9)?;
    let source: Option<String> = row.get(10)?;

    Ok(Memory {
        id,
        content,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        context,
        embedding: serde_json::from_str(&embedding_json).unwrap_or_default(),
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
        utility_score: utility_score.unwrap_or(1.0),
        scope,
        content_hash: content_hash.unwrap_or_default(),
        source,
    })
}

/// Insert a memory row together with its tag rows
pub fn insert_memory(conn: &Connection, memory: &Memory) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO memories ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            MEMORY_COLUMNS
        ),
        params![
            memory.id,
            memory.content,
            serde_json::to_string(&memory.tags)?,
            memory.context,
            serde_json::to_string(&memory.embedding)?,
            memory.created_at.to_rfc3339(),
            memory.updated_at.to_rfc3339(),
            memory.utility_score,
            memory.scope,
            memory.content_hash,
            memory.source,
        ],
    )?;
    replace_tag_rows(conn, &memory.id, &memory.tags)?;
    Ok(())
}

/// Replace the tag association rows for a memory
pub fn replace_tag_rows(conn: &Connection, memory_id: &str, tags: &[String]) -> Result<()> {
    conn.execute("DELETE FROM tags WHERE memory_id = ?", params![memory_id])?;
    let mut stmt = conn.prepare_cached("INSERT OR IGNORE INTO tags (memory_id, tag) VALUES (?, ?)")?;
    for tag in tags {
        stmt.execute(params![memory_id, tag])?;
    }
    Ok(())
}

/// Apply a merged tag set to an existing memory (dedupe hit)
pub fn merge_memory_tags(
    conn: &Connection,
    memory_id: &str,
    merged: &[String],
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE memories SET tags = ?, updated_at = ? WHERE id = ?",
        params![serde_json::to_string(merged)?, now.to_rfc3339(), memory_id],
    )?;
    replace_tag_rows(conn, memory_id, merged)
}

/// Find a memory by content hash within a scope
///
/// Absent scope is a distinguished empty scope: a NULL-scoped memory only
/// dedupes against other NULL-scoped memories.
pub fn find_by_content_hash(
    conn: &Connection,
    content_hash: &str,
    scope: Option<&str>,
) -> Result<Option<Memory>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM memories
         WHERE content_hash = ?
           AND (scope = ? OR (scope IS NULL AND ? IS NULL))
         LIMIT 1",
        MEMORY_COLUMNS
    ))?;

    let result = stmt
        .query_row(params![content_hash, scope, scope], memory_from_row)
        .optional()?;
    Ok(result)
}

/// Fetch a memory by id
pub fn get_memory(conn: &Connection, id: &str) -> Result<Memory> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM memories WHERE id = ?",
        MEMORY_COLUMNS
    ))?;
    stmt.query_row(params![id], memory_from_row)
        .optional()?
        .ok_or_else(|| PhloemError::memory_not_found(id))
}

/// Fetch a batch of memories by id, preserving lookup success only
pub fn get_memories_batch(conn: &Connection, ids: &[MemoryId]) -> Result<Vec<Memory>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT {} FROM memories WHERE id IN ({})",
        MEMORY_COLUMNS, placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), memory_from_row)?;
    let mut memories = Vec::with_capacity(ids.len());
    for row in rows {
        memories.push(row?);
    }
    Ok(memories)
}

/// Delete a memory row; tag/citation/edge rows cascade
pub fn delete_memory(conn: &Connection, id: &str) -> Result<()> {
    let rows = conn.execute("DELETE FROM memories WHERE id = ?", params![id])?;
    if rows == 0 {
        return Err(PhloemError::memory_not_found(id));
    }
    Ok(())
}

/// List memories ordered by created_at descending
///
/// `limit = 0` means no limit. When filter tags are supplied, a memory
/// matches if it bears at least one of them.
pub fn list_memories(
    conn: &Connection,
    limit: usize,
    filter_tags: Option<&[String]>,
) -> Result<Vec<Memory>> {
    let mut sql = format!("SELECT {} FROM memories m", MEMORY_COLUMNS);
    let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(tags) = filter_tags.filter(|t| !t.is_empty()) {
        let placeholders = vec!["?"; tags.len()].join(", ");
        sql.push_str(&format!(
            " WHERE EXISTS (SELECT 1 FROM tags t WHERE t.memory_id = m.id AND t.tag IN ({}))",
            placeholders
        ));
        for tag in tags {
            bound.push(Box::new(tag.clone()));
        }
    }

    sql.push_str(" ORDER BY created_at DESC, id");
    if limit > 0 {
        sql.push_str(" LIMIT ?");
        bound.push(Box::new(limit as i64));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(bound.iter().map(|p| p.as_ref())),
        memory_from_row,
    )?;

    let mut memories = Vec::new();
    for row in rows {
        memories.push(row?);
    }
    Ok(memories)
}

/// Count all memories
pub fn count_memories(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
    Ok(count)
}

/// Count citations and edges for stats
pub fn count_citations(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM citations", [], |row| row.get(0))?;
    Ok(count)
}

pub fn count_edges(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))?;
    Ok(count)
}

/// Timestamp of the most recent write, if any
pub fn last_activity(conn: &Connection) -> Result<Option<DateTime<Utc>>> {
    let ts: Option<String> = conn
        .query_row("SELECT MAX(updated_at) FROM memories", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(ts.map(|s| parse_ts(&s)))
}

/// Memories created after `cutoff` bearing at least one important tag
pub fn recent_important(
    conn: &Connection,
    cutoff: DateTime<Utc>,
    k: usize,
) -> Result<Vec<Memory>> {
    let placeholders = vec!["?"; IMPORTANT_TAGS.len()].join(", ");
    let sql = format!(
        "SELECT {} FROM memories m
         WHERE m.created_at >= ?
           AND EXISTS (SELECT 1 FROM tags t WHERE t.memory_id = m.id AND t.tag IN ({}))
         ORDER BY m.created_at DESC, m.id
         LIMIT ?",
        MEMORY_COLUMNS, placeholders
    );

    let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    bound.push(Box::new(cutoff.to_rfc3339()));
    for tag in IMPORTANT_TAGS {
        bound.push(Box::new(tag.to_string()));
    }
    bound.push(Box::new(k as i64));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(bound.iter().map(|p| p.as_ref())),
        memory_from_row,
    )?;

    let mut memories = Vec::new();
    for row in rows {
        memories.push(row?);
    }
    Ok(memories)
}

/// Overwrite the stored embedding for a memory
pub fn update_embedding(conn: &Connection, id: &str, embedding: &[f32]) -> Result<()> {
    conn.execute(
        "UPDATE memories SET embedding = ? WHERE id = ?",
        params![serde_json::to_string(embedding)?, id],
    )?;
    Ok(())
}

/// Set the utility score of a memory
pub fn set_utility(conn: &Connection, id: &str, utility: f32) -> Result<()> {
    conn.execute(
        "UPDATE memories SET utility_score = ? WHERE id = ?",
        params![utility.clamp(0.0, 1.0), id],
    )?;
    Ok(())
}

/// Register a scope name on first use
pub fn upsert_scope(conn: &Connection, name: &str, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO scopes (name, created_at, updated_at) VALUES (?, ?, ?)
         ON CONFLICT(name) DO UPDATE SET updated_at = excluded.updated_at",
        params![name, now.to_rfc3339(), now.to_rfc3339()],
    )?;
    Ok(())
}

/// All registered scopes, most recently touched first
pub fn list_scopes(conn: &Connection) -> Result<Vec<crate::types::Scope>> {
    let mut stmt = conn.prepare_cached(
        "SELECT name, scope_type, metadata, created_at, updated_at
         FROM scopes ORDER BY updated_at DESC, name",
    )?;
    let rows = stmt.query_map([], |row| {
        let name: String = row.get(0)?;
        let scope_type: Option<String> = row.get(1)?;
        let metadata: String = row.get(2)?;
        let created_at: String = row.get(3)?;
        let updated_at: String = row.get(4)?;
        Ok((name, scope_type, metadata, created_at, updated_at))
    })?;

    let mut scopes = Vec::new();
    for row in rows {
        let (name, scope_type, metadata, created_at, updated_at) = row?;
        scopes.push(crate::types::Scope {
            name,
            scope_type,
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
        });
    }
    Ok(scopes)
}

/// Ids and embeddings not yet present in the vec mapping (backfill source)
pub fn unindexed_embeddings(conn: &Connection) -> Result<Vec<(MemoryId, Vec<f32>)>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.embedding FROM memories m
         WHERE m.embedding != '[]'
           AND NOT EXISTS (SELECT 1 FROM vec_map v WHERE v.memory_id = m.id)",
    )?;
    let rows = stmt.query_map([], |row| {
        let id: String = row.get(0)?;
        let embedding_json: String = row.get(1)?;
        Ok((id, embedding_json))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, embedding_json) = row?;
        let embedding: Vec<f32> = serde_json::from_str(&embedding_json).unwrap_or_default();
        if !embedding.is_empty() {
            out.push((id, embedding));
        }
    }
    Ok(out)
}
