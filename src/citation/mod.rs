//! Citations: anchors from memories to file/line ranges
//!
//! A citation's confidence starts at 1.0, decays over time, and is restored
//! or reduced by verification against the current file contents. Expected
//! failure conditions (missing file, changed content, traversal attempt)
//! report `valid = false` instead of erroring.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{PhloemError, Result};
use crate::types::{new_id, Citation};

/// Files larger than this are never read during verification
pub const MAX_VERIFY_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// A changed snapshot still verifies when word-set similarity exceeds this
pub const SNAPSHOT_VALID_THRESHOLD: f32 = 0.8;

/// Daily decay keeps confidence at or above this floor
pub const DECAY_FLOOR: f32 = 0.1;

/// Curation decay floor (one-shot windowed decay)
pub const DREAM_DECAY_FLOOR: f32 = 0.01;

const CITATION_COLUMNS: &str =
    "id, memory_id, file_path, start_line, end_line, commit_hash, snapshot, \
     confidence, verified_at, created_at";

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn citation_from_row(row: &Row) -> rusqlite::Result<Citation> {
    let verified_at: Option<String> = row.get(8)?;
    let created_at: String = row.get(9)?;
    let created = parse_ts(&created_at);
    Ok(Citation {
        id: row.get(0)?,
        memory_id: row.get(1)?,
        file_path: row.get(2)?,
        start_line: row.get::<_, i64>(3)? as u32,
        end_line: row.get::<_, i64>(4)? as u32,
        commit: row.get(5)?,
        snapshot: row.get(6)?,
        confidence: row.get::<_, f64>(7)? as f32,
        verified_at: verified_at.map(|s| parse_ts(&s)).unwrap_or(created),
        created_at: created,
    })
}

/// Register a citation for a memory with initial confidence 1.0
pub fn add_citation(
    conn: &Connection,
    memory_id: &str,
    file_path: &str,
    start_line: u32,
    end_line: u32,
    commit: Option<&str>,
    snapshot: Option<&str>,
) -> Result<Citation> {
    if file_path.trim().is_empty() {
        return Err(PhloemError::InvalidArgument(
            "citation file_path must not be empty".to_string(),
        ));
    }
    if start_line < 1 || end_line < start_line {
        return Err(PhloemError::InvalidArgument(format!(
            "invalid line range {}..{}",
            start_line, end_line
        )));
    }

    // The FK would catch this too, but NotFound is the contract
    let memory_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM memories WHERE id = ?)",
        params![memory_id],
        |row| row.get(0),
    )?;
    if !memory_exists {
        return Err(PhloemError::memory_not_found(memory_id));
    }

    let now = Utc::now();
    let citation = Citation {
        id: new_id(),
        memory_id: memory_id.to_string(),
        file_path: file_path.to_string(),
        start_line,
        end_line,
        commit: commit.map(|c| c.to_string()).filter(|c| !c.is_empty()),
        snapshot: snapshot.map(|s| s.to_string()),
        confidence: 1.0,
        verified_at: now,
        created_at: now,
    };

    conn.execute(
        &format!(
            "INSERT INTO citations ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            CITATION_COLUMNS
        ),
        params![
            citation.id,
            citation.memory_id,
            citation.file_path,
            citation.start_line as i64,
            citation.end_line as i64,
            citation.commit,
            citation.snapshot,
            citation.confidence as f64,
            citation.verified_at.to_rfc3339(),
            citation.created_at.to_rfc3339(),
        ],
    )?;

    Ok(citation)
}

/// Insert a citation row as-is, preserving confidence and timestamps
///
/// Used by graft import. Skips silently when the id already exists or the
/// memory is absent.
pub fn insert_citation(conn: &Connection, citation: &Citation) -> Result<bool> {
    let memory_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM memories WHERE id = ?)",
        params![citation.memory_id],
        |row| row.get(0),
    )?;
    if !memory_exists {
        return Ok(false);
    }

    let inserted = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO citations ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            CITATION_COLUMNS
        ),
        params![
            citation.id,
            citation.memory_id,
            citation.file_path,
            citation.start_line as i64,
            citation.end_line as i64,
            citation.commit,
            citation.snapshot,
            citation.confidence.clamp(0.0, 1.0) as f64,
            citation.verified_at.to_rfc3339(),
            citation.created_at.to_rfc3339(),
        ],
    )?;
    Ok(inserted > 0)
}

/// Fetch a citation by id
pub fn get_citation(conn: &Connection, id: &str) -> Result<Citation> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM citations WHERE id = ?",
        CITATION_COLUMNS
    ))?;
    stmt.query_row(params![id], citation_from_row)
        .optional()?
        .ok_or_else(|| PhloemError::citation_not_found(id))
}

/// All citations of a memory, newest first
pub fn get_citations(conn: &Connection, memory_id: &str) -> Result<Vec<Citation>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM citations WHERE memory_id = ? ORDER BY created_at DESC, id",
        CITATION_COLUMNS
    ))?;
    let rows = stmt.query_map(params![memory_id], citation_from_row)?;
    let mut citations = Vec::new();
    for row in rows {
        citations.push(row?);
    }
    Ok(citations)
}

/// Mean citation confidence of a memory, or 1.0 when it has none
pub fn memory_confidence(conn: &Connection, memory_id: &str) -> Result<f32> {
    let mean: Option<f64> = conn.query_row(
        "SELECT AVG(confidence) FROM citations WHERE memory_id = ?",
        params![memory_id],
        |row| row.get(0),
    )?;
    Ok(mean.map(|m| m as f32).unwrap_or(1.0))
}

/// Outcome of verifying a citation against the filesystem
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub citation: Citation,
    pub valid: bool,
    pub reason: String,
}

/// Verify a citation against the current file contents
///
/// Updates the stored confidence and `verified_at` and returns the outcome.
pub fn verify_citation(conn: &Connection, id: &str) -> Result<VerifyOutcome> {
    let citation = get_citation(conn, id)?;
    let (confidence, valid, reason) = check_against_file(&citation);

    let now = Utc::now();
    conn.execute(
        "UPDATE citations SET confidence = ?, verified_at = ? WHERE id = ?",
        params![confidence as f64, now.to_rfc3339(), id],
    )?;

    let mut updated = citation;
    updated.confidence = confidence;
    updated.verified_at = now;
    Ok(VerifyOutcome {
        citation: updated,
        valid,
        reason,
    })
}

/// The filesystem check behind verification: (confidence, valid, reason)
fn check_against_file(citation: &Citation) -> (f32, bool, String) {
    // Directory-traversal guard
    if citation.file_path.contains("..") {
        return (0.0, false, "path contains '..'".to_string());
    }

    let metadata = match std::fs::metadata(&citation.file_path) {
        Ok(m) => m,
        Err(_) => return (0.0, false, "file not found".to_string()),
    };
    if metadata.len() > MAX_VERIFY_FILE_BYTES {
        return (0.0, false, "file exceeds verification size cap".to_string());
    }

    let contents = match std::fs::read_to_string(&citation.file_path) {
        Ok(c) => c,
        Err(_) => return (0.0, false, "file not readable".to_string()),
    };

    let lines: Vec<&str> = contents.lines().collect();
    let start = citation.start_line as usize;
    let end = citation.end_line as usize;
    if start < 1 || end > lines.len() {
        return (0.0, false, "line range out of bounds".to_string());
    }
    let current = lines[start - 1..end].join("\n");

    match &citation.snapshot {
        Some(snapshot) => {
            if snapshot.trim() == current.trim() {
                (1.0, true, "snapshot matches".to_string())
            } else {
                let similarity = jaccard_similarity(snapshot, &current);
                (
                    similarity,
                    similarity > SNAPSHOT_VALID_THRESHOLD,
                    format!("snapshot drifted (similarity {:.2})", similarity),
                )
            }
        }
        None => (0.9, true, "range readable, no snapshot stored".to_string()),
    }
}

/// Word-set Jaccard similarity over lowercased whitespace tokens
pub fn jaccard_similarity(a: &str, b: &str) -> f32 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let set_a: std::collections::HashSet<&str> = a_lower.split_whitespace().collect();
    let set_b: std::collections::HashSet<&str> = b_lower.split_whitespace().collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Daily decay pass: confidence <- max(0.1, c * 0.9^days_since_verified)
///
/// Citations verified within the last day are untouched. Returns the number
/// of rows whose value changed.
pub fn decay_citations(conn: &Connection) -> Result<usize> {
    let mut stmt = conn.prepare(
        "SELECT id, confidence, COALESCE(verified_at, created_at)
         FROM citations WHERE confidence > 0",
    )?;
    let rows: Vec<(String, f32, String)> = stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get::<_, f64>(1)? as f32,
                row.get(2)?,
            ))
        })?
        .filter_map(|r| r.ok())
        .collect();

    let now = Utc::now();
    let mut changed = 0;
    for (id, confidence, verified_at) in rows {
        let days = (now - parse_ts(&verified_at)).num_days();
        if days < 1 {
            continue;
        }
        let decayed = (confidence * 0.9_f32.powi(days as i32)).max(DECAY_FLOOR);
        if (decayed - confidence).abs() > f32::EPSILON {
            conn.execute(
                "UPDATE citations SET confidence = ? WHERE id = ?",
                params![decayed as f64, id],
            )?;
            changed += 1;
        }
    }
    Ok(changed)
}

/// One-shot windowed decay used by curation
///
/// Citations last verified (or created, if never verified) before
/// `now - max_age` have confidence multiplied by `factor`, floored at 0.01.
pub fn dream_decay(conn: &Connection, max_age: Duration, factor: f32) -> Result<usize> {
    let factor = factor.clamp(0.0, 1.0);
    let cutoff = (Utc::now() - max_age).to_rfc3339();

    let mut stmt = conn.prepare(
        "SELECT id, confidence FROM citations
         WHERE COALESCE(verified_at, created_at) < ?",
    )?;
    let rows: Vec<(String, f32)> = stmt
        .query_map(params![cutoff], |row| {
            Ok((row.get(0)?, row.get::<_, f64>(1)? as f32))
        })?
        .filter_map(|r| r.ok())
        .collect();

    let mut changed = 0;
    for (id, confidence) in rows {
        let decayed = (confidence * factor).max(DREAM_DECAY_FLOOR);
        if (decayed - confidence).abs() > f32::EPSILON {
            conn.execute(
                "UPDATE citations SET confidence = ? WHERE id = ?",
                params![decayed as f64, id],
            )?;
            changed += 1;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::queries::insert_memory;
    use crate::storage::Storage;
    use crate::types::Memory;
    use std::io::Write;

    fn storage_with_memory() -> (Storage, String) {
        let storage = Storage::open_in_memory().unwrap();
        let memory = Memory::new("cited memory".to_string(), vec![], None, None);
        let id = memory.id.clone();
        storage
            .with_transaction(|conn| insert_memory(conn, &memory))
            .unwrap();
        (storage, id)
    }

    fn write_fixture(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_add_citation_defaults() {
        let (storage, memory_id) = storage_with_memory();
        let citation = storage
            .with_transaction(|conn| {
                add_citation(conn, &memory_id, "src/main.rs", 1, 5, Some("abc123"), None)
            })
            .unwrap();
        assert_eq!(citation.confidence, 1.0);
        assert_eq!(citation.start_line, 1);
        assert_eq!(citation.end_line, 5);
    }

    #[test]
    fn test_add_citation_rejects_bad_range() {
        let (storage, memory_id) = storage_with_memory();
        let err = storage
            .with_transaction(|conn| add_citation(conn, &memory_id, "f.rs", 5, 2, None, None))
            .unwrap_err();
        assert!(matches!(err, PhloemError::InvalidArgument(_)));

        let err = storage
            .with_transaction(|conn| add_citation(conn, &memory_id, "f.rs", 0, 2, None, None))
            .unwrap_err();
        assert!(matches!(err, PhloemError::InvalidArgument(_)));
    }

    #[test]
    fn test_add_citation_unknown_memory() {
        let storage = Storage::open_in_memory().unwrap();
        let err = storage
            .with_transaction(|conn| {
                add_citation(conn, "0000000000000000", "f.rs", 1, 1, None, None)
            })
            .unwrap_err();
        assert!(matches!(err, PhloemError::NotFound(_)));
    }

    #[test]
    fn test_verify_matching_snapshot() {
        let (storage, memory_id) = storage_with_memory();
        let file = write_fixture("line1\nline2\nline3\nline4\nline5");
        let path = file.path().to_str().unwrap().to_string();

        let citation = storage
            .with_transaction(|conn| {
                add_citation(
                    conn,
                    &memory_id,
                    &path,
                    2,
                    4,
                    None,
                    Some("line2\nline3\nline4"),
                )
            })
            .unwrap();

        let outcome = storage
            .with_transaction(|conn| verify_citation(conn, &citation.id))
            .unwrap();
        assert!(outcome.valid);
        assert_eq!(outcome.citation.confidence, 1.0);
    }

    #[test]
    fn test_verify_changed_snapshot_uses_jaccard() {
        let (storage, memory_id) = storage_with_memory();
        let file = write_fixture("line1\nline2\nline3\nline4\nline5");
        let path = file.path().to_str().unwrap().to_string();

        let citation = storage
            .with_transaction(|conn| {
                add_citation(
                    conn,
                    &memory_id,
                    &path,
                    2,
                    4,
                    None,
                    Some("different\ncontent\nhere"),
                )
            })
            .unwrap();

        let outcome = storage
            .with_transaction(|conn| verify_citation(conn, &citation.id))
            .unwrap();
        let expected = jaccard_similarity("different\ncontent\nhere", "line2\nline3\nline4");
        assert!(!outcome.valid);
        assert!((outcome.citation.confidence - expected).abs() < 1e-6);
        assert!(outcome.citation.confidence < 1.0);
    }

    #[test]
    fn test_verify_traversal_guard() {
        let (storage, memory_id) = storage_with_memory();
        let citation = storage
            .with_transaction(|conn| {
                add_citation(conn, &memory_id, "../../etc/passwd", 1, 1, None, None)
            })
            .unwrap();

        let outcome = storage
            .with_transaction(|conn| verify_citation(conn, &citation.id))
            .unwrap();
        assert!(!outcome.valid);
        assert_eq!(outcome.citation.confidence, 0.0);
    }

    #[test]
    fn test_verify_missing_file() {
        let (storage, memory_id) = storage_with_memory();
        let citation = storage
            .with_transaction(|conn| {
                add_citation(conn, &memory_id, "/nonexistent/phloem/file.rs", 1, 1, None, None)
            })
            .unwrap();

        let outcome = storage
            .with_transaction(|conn| verify_citation(conn, &citation.id))
            .unwrap();
        assert!(!outcome.valid);
        assert_eq!(outcome.citation.confidence, 0.0);
    }

    #[test]
    fn test_verify_out_of_bounds_range() {
        let (storage, memory_id) = storage_with_memory();
        let file = write_fixture("only\ntwo");
        let path = file.path().to_str().unwrap().to_string();

        let citation = storage
            .with_transaction(|conn| add_citation(conn, &memory_id, &path, 1, 10, None, None))
            .unwrap();

        let outcome = storage
            .with_transaction(|conn| verify_citation(conn, &citation.id))
            .unwrap();
        assert!(!outcome.valid);
        assert_eq!(outcome.citation.confidence, 0.0);
    }

    #[test]
    fn test_verify_no_snapshot_in_bounds() {
        let (storage, memory_id) = storage_with_memory();
        let file = write_fixture("a\nb\nc");
        let path = file.path().to_str().unwrap().to_string();

        let citation = storage
            .with_transaction(|conn| add_citation(conn, &memory_id, &path, 1, 3, None, None))
            .unwrap();

        let outcome = storage
            .with_transaction(|conn| verify_citation(conn, &citation.id))
            .unwrap();
        assert!(outcome.valid);
        assert!((outcome.citation.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_memory_confidence_mean() {
        let (storage, memory_id) = storage_with_memory();
        storage
            .with_transaction(|conn| {
                let c1 = add_citation(conn, &memory_id, "a.rs", 1, 1, None, None)?;
                let c2 = add_citation(conn, &memory_id, "b.rs", 1, 1, None, None)?;
                conn.execute(
                    "UPDATE citations SET confidence = 0.5 WHERE id = ?",
                    params![c1.id],
                )?;
                conn.execute(
                    "UPDATE citations SET confidence = 1.0 WHERE id = ?",
                    params![c2.id],
                )?;
                Ok(())
            })
            .unwrap();

        let mean = storage
            .with_connection(|conn| memory_confidence(conn, &memory_id))
            .unwrap();
        assert!((mean - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_memory_confidence_defaults_to_one() {
        let (storage, memory_id) = storage_with_memory();
        let mean = storage
            .with_connection(|conn| memory_confidence(conn, &memory_id))
            .unwrap();
        assert_eq!(mean, 1.0);
    }

    #[test]
    fn test_decay_skips_fresh_citations() {
        let (storage, memory_id) = storage_with_memory();
        storage
            .with_transaction(|conn| add_citation(conn, &memory_id, "a.rs", 1, 1, None, None))
            .unwrap();

        let changed = storage.with_transaction(decay_citations).unwrap();
        assert_eq!(changed, 0);
    }

    #[test]
    fn test_decay_applies_after_days() {
        let (storage, memory_id) = storage_with_memory();
        let citation = storage
            .with_transaction(|conn| add_citation(conn, &memory_id, "a.rs", 1, 1, None, None))
            .unwrap();

        // Backdate the verification by 5 days
        let five_days_ago = (Utc::now() - Duration::days(5)).to_rfc3339();
        storage
            .with_transaction(|conn| {
                conn.execute(
                    "UPDATE citations SET verified_at = ? WHERE id = ?",
                    params![five_days_ago, citation.id],
                )?;
                Ok(())
            })
            .unwrap();

        let changed = storage.with_transaction(decay_citations).unwrap();
        assert_eq!(changed, 1);

        let updated = storage
            .with_connection(|conn| get_citation(conn, &citation.id))
            .unwrap();
        let expected = (1.0_f32 * 0.9_f32.powi(5)).max(DECAY_FLOOR);
        assert!((updated.confidence - expected).abs() < 1e-4);
    }

    #[test]
    fn test_dream_decay_windowed() {
        let (storage, memory_id) = storage_with_memory();
        let old = storage
            .with_transaction(|conn| add_citation(conn, &memory_id, "old.rs", 1, 1, None, None))
            .unwrap();
        let fresh = storage
            .with_transaction(|conn| add_citation(conn, &memory_id, "new.rs", 1, 1, None, None))
            .unwrap();

        let long_ago = (Utc::now() - Duration::days(30)).to_rfc3339();
        storage
            .with_transaction(|conn| {
                conn.execute(
                    "UPDATE citations SET verified_at = ? WHERE id = ?",
                    params![long_ago, old.id],
                )?;
                Ok(())
            })
            .unwrap();

        let changed = storage
            .with_transaction(|conn| dream_decay(conn, Duration::days(7), 0.5))
            .unwrap();
        assert_eq!(changed, 1);

        let old_updated = storage
            .with_connection(|conn| get_citation(conn, &old.id))
            .unwrap();
        assert!((old_updated.confidence - 0.5).abs() < 1e-6);

        let fresh_updated = storage
            .with_connection(|conn| get_citation(conn, &fresh.id))
            .unwrap();
        assert_eq!(fresh_updated.confidence, 1.0);
    }

    #[test]
    fn test_jaccard_identical_and_disjoint() {
        assert_eq!(jaccard_similarity("hello world", "Hello WORLD"), 1.0);
        assert_eq!(jaccard_similarity("apple banana", "car truck"), 0.0);
        assert_eq!(jaccard_similarity("", ""), 1.0);
    }
}
