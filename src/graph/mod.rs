//! Temporal/causal/semantic edge graph
//!
//! Edges are created automatically (temporal on every write, causal by the
//! extractor, semantic by curation) and die with either endpoint. Traversals
//! carry a visited set; the graph may contain cycles.

pub mod causal;

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{PhloemError, Result};
use crate::storage::queries::get_memories_batch;
use crate::types::{new_id, Edge, EdgeType, Memory, MemoryId};

const EDGE_COLUMNS: &str = "id, source_id, target_id, edge_type, payload, created_at";

fn edge_from_row(row: &Row) -> rusqlite::Result<Edge> {
    let edge_type: String = row.get(3)?;
    let created_at: String = row.get(5)?;
    Ok(Edge {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        edge_type: edge_type.parse().unwrap_or(EdgeType::Semantic),
        payload: row.get(4)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Insert a typed edge between two memories
///
/// An empty source or type is a silent no-op (importer convenience). A
/// self-edge is rejected. Within a type, a duplicate (source, target) pair
/// returns the existing edge untouched.
pub fn add_edge(
    conn: &Connection,
    source_id: &str,
    target_id: &str,
    edge_type: &str,
    payload: Option<&str>,
) -> Result<Option<Edge>> {
    if source_id.is_empty() || edge_type.is_empty() {
        return Ok(None);
    }
    let edge_type: EdgeType = edge_type
        .parse()
        .map_err(PhloemError::InvalidArgument)?;
    if target_id.is_empty() {
        return Err(PhloemError::InvalidArgument(format!(
            "{} edges require a target",
            edge_type
        )));
    }
    if source_id == target_id {
        return Err(PhloemError::InvalidArgument(
            "edge source and target must differ".to_string(),
        ));
    }

    let edge = Edge {
        id: new_id(),
        source_id: source_id.to_string(),
        target_id: Some(target_id.to_string()),
        edge_type,
        payload: payload.map(|p| p.to_string()),
        created_at: Utc::now(),
    };

    let inserted = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO edges ({}) VALUES (?, ?, ?, ?, ?, ?)",
            EDGE_COLUMNS
        ),
        params![
            edge.id,
            edge.source_id,
            edge.target_id,
            edge.edge_type.as_str(),
            edge.payload,
            edge.created_at.to_rfc3339(),
        ],
    )?;

    if inserted > 0 {
        return Ok(Some(edge));
    }

    // Duplicate within the type: hand back the existing row
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM edges WHERE source_id = ? AND target_id = ? AND edge_type = ?",
        EDGE_COLUMNS
    ))?;
    let existing = stmt
        .query_row(
            params![source_id, target_id, edge.edge_type.as_str()],
            edge_from_row,
        )
        .optional()?;
    Ok(existing)
}

/// Whether an edge of the given type already exists between two memories
pub fn edge_exists(
    conn: &Connection,
    source_id: &str,
    target_id: &str,
    edge_type: EdgeType,
) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM edges
         WHERE source_id = ? AND target_id = ? AND edge_type = ?)",
        params![source_id, target_id, edge_type.as_str()],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Outgoing edges of a memory, newest first
pub fn edges_from(
    conn: &Connection,
    source_id: &str,
    edge_type: Option<EdgeType>,
) -> Result<Vec<Edge>> {
    edges_by_endpoint(conn, "source_id", source_id, edge_type)
}

/// Incoming edges of a memory, newest first
pub fn edges_to(
    conn: &Connection,
    target_id: &str,
    edge_type: Option<EdgeType>,
) -> Result<Vec<Edge>> {
    edges_by_endpoint(conn, "target_id", target_id, edge_type)
}

fn edges_by_endpoint(
    conn: &Connection,
    column: &str,
    id: &str,
    edge_type: Option<EdgeType>,
) -> Result<Vec<Edge>> {
    let mut sql = format!("SELECT {} FROM edges WHERE {} = ?", EDGE_COLUMNS, column);
    let mut bound: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(id.to_string())];
    if let Some(et) = edge_type {
        sql.push_str(" AND edge_type = ?");
        bound.push(Box::new(et.as_str().to_string()));
    }
    sql.push_str(" ORDER BY created_at DESC, id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        rusqlite::params_from_iter(bound.iter().map(|p| p.as_ref())),
        edge_from_row,
    )?;

    let mut edges = Vec::new();
    for row in rows {
        edges.push(row?);
    }
    Ok(edges)
}

/// Memories one causal hop away in either direction, deduplicated
pub fn causal_neighbors(conn: &Connection, id: &str) -> Result<Vec<Memory>> {
    let mut ordered: Vec<MemoryId> = Vec::new();
    let mut seen: HashSet<MemoryId> = HashSet::new();

    for edge in edges_from(conn, id, Some(EdgeType::Causal))? {
        if let Some(target) = edge.target_id {
            if target != id && seen.insert(target.clone()) {
                ordered.push(target);
            }
        }
    }
    for edge in edges_to(conn, id, Some(EdgeType::Causal))? {
        if edge.source_id != id && seen.insert(edge.source_id.clone()) {
            ordered.push(edge.source_id);
        }
    }

    let fetched = get_memories_batch(conn, &ordered)?;
    // Restore the neighbour order; batch fetch returns rows in table order
    let mut by_id: std::collections::HashMap<MemoryId, Memory> =
        fetched.into_iter().map(|m| (m.id.clone(), m)).collect();
    Ok(ordered.into_iter().filter_map(|id| by_id.remove(&id)).collect())
}

/// Transitively reachable ids over outgoing causal edges, seed excluded
///
/// Breadth-first with a visited set; cycles terminate. Sorted lexically for
/// determinism.
pub fn affected_if_changed(conn: &Connection, id: &str) -> Result<Vec<MemoryId>> {
    let mut visited: HashSet<MemoryId> = HashSet::new();
    let mut queue: VecDeque<MemoryId> = VecDeque::new();
    visited.insert(id.to_string());
    queue.push_back(id.to_string());

    let mut affected: Vec<MemoryId> = Vec::new();
    while let Some(current) = queue.pop_front() {
        for edge in edges_from(conn, &current, Some(EdgeType::Causal))? {
            if let Some(target) = edge.target_id {
                if visited.insert(target.clone()) {
                    affected.push(target.clone());
                    queue.push_back(target);
                }
            }
        }
    }

    affected.sort();
    Ok(affected)
}

/// Most recent memory created strictly before the given instant
pub fn previous_memory_id(
    conn: &Connection,
    before: DateTime<Utc>,
) -> Result<Option<MemoryId>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM memories WHERE created_at < ?
             ORDER BY created_at DESC, id DESC LIMIT 1",
            params![before.to_rfc3339()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::queries::insert_memory;
    use crate::storage::Storage;

    fn seed(storage: &Storage, content: &str) -> MemoryId {
        let memory = Memory::new(content.to_string(), vec![], None, None);
        let id = memory.id.clone();
        storage
            .with_transaction(|conn| insert_memory(conn, &memory))
            .unwrap();
        id
    }

    #[test]
    fn test_add_edge_and_duplicates() {
        let storage = Storage::open_in_memory().unwrap();
        let a = seed(&storage, "cause");
        let b = seed(&storage, "effect");

        let first = storage
            .with_transaction(|conn| add_edge(conn, &a, &b, "causal", Some("because")))
            .unwrap()
            .unwrap();

        // Duplicate within the type returns the existing edge
        let second = storage
            .with_transaction(|conn| add_edge(conn, &a, &b, "causal", None))
            .unwrap()
            .unwrap();
        assert_eq!(first.id, second.id);

        // Same pair, different type is a new edge
        let semantic = storage
            .with_transaction(|conn| add_edge(conn, &a, &b, "semantic", None))
            .unwrap()
            .unwrap();
        assert_ne!(first.id, semantic.id);
    }

    #[test]
    fn test_add_edge_noop_and_rejections() {
        let storage = Storage::open_in_memory().unwrap();
        let a = seed(&storage, "node");

        let none = storage
            .with_transaction(|conn| add_edge(conn, "", &a, "causal", None))
            .unwrap();
        assert!(none.is_none());

        let none = storage
            .with_transaction(|conn| add_edge(conn, &a, &a, "", None))
            .unwrap();
        assert!(none.is_none());

        let err = storage
            .with_transaction(|conn| add_edge(conn, &a, &a, "causal", None))
            .unwrap_err();
        assert!(matches!(err, PhloemError::InvalidArgument(_)));

        let err = storage
            .with_transaction(|conn| add_edge(conn, &a, &a, "friendship", None))
            .unwrap_err();
        assert!(matches!(err, PhloemError::InvalidArgument(_)));
    }

    #[test]
    fn test_edges_from_to_with_filter() {
        let storage = Storage::open_in_memory().unwrap();
        let a = seed(&storage, "a");
        let b = seed(&storage, "b");
        let c = seed(&storage, "c");

        storage
            .with_transaction(|conn| {
                add_edge(conn, &a, &b, "causal", None)?;
                add_edge(conn, &a, &c, "temporal", None)?;
                Ok(())
            })
            .unwrap();

        let all = storage
            .with_connection(|conn| edges_from(conn, &a, None))
            .unwrap();
        assert_eq!(all.len(), 2);

        let causal = storage
            .with_connection(|conn| edges_from(conn, &a, Some(EdgeType::Causal)))
            .unwrap();
        assert_eq!(causal.len(), 1);
        assert_eq!(causal[0].target_id.as_deref(), Some(b.as_str()));

        let incoming = storage
            .with_connection(|conn| edges_to(conn, &b, Some(EdgeType::Causal)))
            .unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].source_id, a);
    }

    #[test]
    fn test_causal_neighbors_both_directions() {
        let storage = Storage::open_in_memory().unwrap();
        let a = seed(&storage, "a");
        let b = seed(&storage, "b");
        let c = seed(&storage, "c");

        storage
            .with_transaction(|conn| {
                add_edge(conn, &a, &b, "causal", None)?; // outgoing from a
                add_edge(conn, &c, &a, "causal", None)?; // incoming to a
                add_edge(conn, &a, &c, "semantic", None)?; // wrong type, ignored
                Ok(())
            })
            .unwrap();

        let neighbors = storage
            .with_connection(|conn| causal_neighbors(conn, &a))
            .unwrap();
        let ids: HashSet<_> = neighbors.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&b));
        assert!(ids.contains(&c));
    }

    #[test]
    fn test_affected_transitive_and_sorted() {
        let storage = Storage::open_in_memory().unwrap();
        let m1 = seed(&storage, "m1");
        let m2 = seed(&storage, "m2");
        let m3 = seed(&storage, "m3");

        storage
            .with_transaction(|conn| {
                add_edge(conn, &m1, &m2, "causal", None)?;
                add_edge(conn, &m2, &m3, "causal", None)?;
                Ok(())
            })
            .unwrap();

        let affected = storage
            .with_connection(|conn| affected_if_changed(conn, &m1))
            .unwrap();
        let mut expected = vec![m2.clone(), m3.clone()];
        expected.sort();
        assert_eq!(affected, expected);

        let leaf = storage
            .with_connection(|conn| affected_if_changed(conn, &m3))
            .unwrap();
        assert!(leaf.is_empty());
    }

    #[test]
    fn test_affected_terminates_on_cycle() {
        let storage = Storage::open_in_memory().unwrap();
        let a = seed(&storage, "a");
        let b = seed(&storage, "b");

        storage
            .with_transaction(|conn| {
                add_edge(conn, &a, &b, "causal", None)?;
                add_edge(conn, &b, &a, "causal", None)?;
                Ok(())
            })
            .unwrap();

        let affected = storage
            .with_connection(|conn| affected_if_changed(conn, &a))
            .unwrap();
        assert_eq!(affected, vec![b.clone()]);
        assert!(!affected.contains(&a), "seed never appears in its own result");
    }

    #[test]
    fn test_previous_memory_id() {
        let storage = Storage::open_in_memory().unwrap();

        let mut first = Memory::new("first".to_string(), vec![], None, None);
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let mut second = Memory::new("second".to_string(), vec![], None, None);
        second.created_at = Utc::now() - chrono::Duration::seconds(5);

        storage
            .with_transaction(|conn| {
                insert_memory(conn, &first)?;
                insert_memory(conn, &second)?;
                Ok(())
            })
            .unwrap();

        let previous = storage
            .with_connection(|conn| previous_memory_id(conn, Utc::now()))
            .unwrap();
        assert_eq!(previous.as_deref(), Some(second.id.as_str()));

        let previous = storage
            .with_connection(|conn| previous_memory_id(conn, first.created_at))
            .unwrap();
        assert!(previous.is_none());
    }
}
