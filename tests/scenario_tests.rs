//! End-to-end scenarios against a full engine
//!
//! Run with: cargo test --test scenario_tests

use std::io::Write;
use std::sync::Arc;

use pretty_assertions::assert_eq;

use phloem::embedding::{Embedder, HashEmbedder};
use phloem::engine::MemoryEngine;
use phloem::error::PhloemError;
use phloem::graft;
use phloem::storage::Storage;
use phloem::types::{EdgeType, Memory};

fn engine() -> MemoryEngine {
    MemoryEngine::open_in_memory(Arc::new(HashEmbedder::new())).unwrap()
}

// ============================================================================
// REMEMBER + RECALL
// ============================================================================

#[test]
fn scenario_remember_and_recall() {
    let engine = engine();
    engine
        .remember("The quick brown fox", &["animals".to_string()], None, None)
        .unwrap();
    engine
        .remember(
            "Python is a programming language",
            &["code".to_string()],
            None,
            None,
        )
        .unwrap();

    let results = engine.recall("programming language", 5, None, None).unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].content, "Python is a programming language");
}

#[test]
fn scenario_tag_filtered_recall_excludes_non_matching() {
    let engine = engine();
    engine
        .remember("memory with code tag", &["code".to_string()], None, None)
        .unwrap();
    engine
        .remember("memory with design tag", &["design".to_string()], None, None)
        .unwrap();

    let filter = vec!["code".to_string()];
    let results = engine.recall("memory", 10, Some(&filter), None).unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].tags.contains(&"code".to_string()));
}

#[test]
fn scenario_dedupe_merges_tag_sets() {
    let engine = engine();
    let first = engine
        .remember(
            "deploys run from main",
            &["ops".to_string(), "deploy".to_string()],
            None,
            Some("repo"),
        )
        .unwrap();
    let second = engine
        .remember(
            "deploys run from main",
            &["deploy".to_string(), "automation".to_string()],
            None,
            Some("repo"),
        )
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.tags, vec!["automation", "deploy", "ops"]);
    assert_eq!(engine.count().unwrap(), 1);
}

#[test]
fn scenario_forget_removes_from_every_surface() {
    let engine = engine();
    let keep = engine.remember("memory to keep around", &[], None, None).unwrap();
    let drop = engine.remember("memory to forget entirely", &[], None, None).unwrap();
    engine
        .add_citation(&drop.id, "src/lib.rs", 1, 2, None, None)
        .unwrap();

    engine.forget(&drop.id).unwrap();

    assert!(matches!(engine.get(&drop.id), Err(PhloemError::NotFound(_))));
    let results = engine.recall("memory to forget entirely", 10, None, None).unwrap();
    assert!(results.iter().all(|m| m.id != drop.id));
    assert!(results.iter().any(|m| m.id == keep.id));
    assert!(engine.get_citations(&drop.id).unwrap().is_empty());
    assert!(engine.edges_from(&drop.id, None).unwrap().is_empty());
}

// ============================================================================
// CITATIONS
// ============================================================================

fn fixture_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn scenario_citation_verify_matching_snapshot() {
    let engine = engine();
    let memory = engine.remember("lines two to four matter", &[], None, None).unwrap();

    let file = fixture_file("line1\nline2\nline3\nline4\nline5");
    let path = file.path().to_str().unwrap();

    let citation = engine
        .add_citation(&memory.id, path, 2, 4, Some(""), Some("line2\nline3\nline4"))
        .unwrap();

    let outcome = engine.verify_citation(&citation.id).unwrap();
    assert!(outcome.valid);
    assert_eq!(outcome.citation.confidence, 1.0);
}

#[test]
fn scenario_citation_verify_changed_content() {
    let engine = engine();
    let memory = engine.remember("citation drift subject", &[], None, None).unwrap();

    let file = fixture_file("line1\nline2\nline3\nline4\nline5");
    let path = file.path().to_str().unwrap();

    let citation = engine
        .add_citation(
            &memory.id,
            path,
            2,
            4,
            None,
            Some("different\ncontent\nhere"),
        )
        .unwrap();

    let outcome = engine.verify_citation(&citation.id).unwrap();
    let expected =
        phloem::citation::jaccard_similarity("different\ncontent\nhere", "line2\nline3\nline4");

    assert!(outcome.citation.confidence < 1.0);
    assert!((outcome.citation.confidence - expected).abs() < 1e-6);
    assert_eq!(outcome.valid, outcome.citation.confidence > 0.8);
}

#[test]
fn scenario_traversal_guard_beats_filesystem_state() {
    let engine = engine();
    let memory = engine.remember("guarded citation", &[], None, None).unwrap();

    let citation = engine
        .add_citation(&memory.id, "src/../src/lib.rs", 1, 1, None, None)
        .unwrap();
    let outcome = engine.verify_citation(&citation.id).unwrap();
    assert!(!outcome.valid);
    assert_eq!(outcome.citation.confidence, 0.0);
}

// ============================================================================
// SESSION CONTEXT
// ============================================================================

#[test]
fn scenario_session_context_composition() {
    let engine = engine();
    engine
        .remember(
            "decision to keep the storage single file",
            &["decision".to_string()],
            None,
            None,
        )
        .unwrap();
    engine
        .remember(
            "milestone first external release",
            &["milestone".to_string()],
            None,
            None,
        )
        .unwrap();
    engine
        .remember("plain note about snacks", &["notes".to_string()], None, None)
        .unwrap();

    let report = engine.session_context(Some("decision")).unwrap();

    assert!(report.text.contains("Relevant to: decision"));
    assert!(report.text.contains("Critical (Last 7 Days)") || report.text.contains("Recent Activity"));
    assert!(report.text.contains("Tagged: decision"));
    assert!(report.text.contains("Tagged: milestone"));
    assert!(report.text.contains("3 memories stored"));

    // Each memory appears at most once across the relevant/recent/critical blocks
    let body = report
        .text
        .split("## Tagged:")
        .next()
        .unwrap()
        .to_string();
    let occurrences = body.matches("decision to keep the storage single file").count();
    assert_eq!(occurrences, 1);
}

// ============================================================================
// GRAFT
// ============================================================================

#[test]
fn scenario_graft_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.graft");

    let source = engine();
    source
        .remember("bundled fact one about lifetimes", &["rust".to_string()], None, None)
        .unwrap();
    source
        .remember("bundled fact two about borrowing", &["rust".to_string()], None, None)
        .unwrap();

    let manifest =
        graft::export_graft(&source, &path, "Test", "round trip bundle", "tester", None).unwrap();
    assert_eq!(manifest.memory_count, 2);

    // Header bytes are exact
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[0..5], &[0x50, 0x48, 0x4C, 0x4F, 0x01]);

    // inspect returns the same manifest
    let inspected = graft::inspect(&path).unwrap();
    assert_eq!(inspected, manifest);

    // unpack returns the same memories
    let document = graft::unpack(&path).unwrap();
    assert_eq!(document.memories.len(), 2);
    let contents: Vec<&str> = document.memories.iter().map(|m| m.content.as_str()).collect();
    assert!(contents.contains(&"bundled fact one about lifetimes"));
    assert!(contents.contains(&"bundled fact two about borrowing"));

    // import into a fresh engine restores them
    let target = engine();
    let summary = graft::import_graft(&target, &path).unwrap();
    assert_eq!(summary.imported, 2);
    assert_eq!(target.count().unwrap(), 2);
}

#[test]
fn scenario_graft_magic_rejection() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bogus.graft");
    std::fs::write(&path, b"NOPE\x01rest of the file").unwrap();

    assert!(matches!(
        graft::unpack(&path),
        Err(PhloemError::InvalidFormat(_))
    ));
}

// ============================================================================
// CAUSAL GRAPH
// ============================================================================

#[test]
fn scenario_causal_traversal() {
    let engine = engine();
    let m1 = engine.remember("schema change landed", &[], None, None).unwrap();
    let m2 = engine.remember("migration scripts updated", &[], None, None).unwrap();
    let m3 = engine.remember("deploy pipeline adjusted", &[], None, None).unwrap();

    engine.add_edge(&m1.id, &m2.id, "causal", None).unwrap();
    engine.add_edge(&m2.id, &m3.id, "causal", None).unwrap();

    let affected = engine.affected_if_changed(&m1.id).unwrap();
    let mut expected = vec![m2.id.clone(), m3.id.clone()];
    expected.sort();
    assert_eq!(affected, expected);

    let leaf = engine.affected_if_changed(&m3.id).unwrap();
    assert!(leaf.is_empty());

    let neighbors = engine.causal_neighbors(&m2.id).unwrap();
    let ids: Vec<&str> = neighbors.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&m1.id.as_str()));
    assert!(ids.contains(&m3.id.as_str()));
}

// ============================================================================
// DIMENSION CHANGE
// ============================================================================

/// Tiny fixed-dimension embedder for dimension-change runs
struct MiniEmbedder;

impl Embedder for MiniEmbedder {
    fn embed(&self, text: &str) -> phloem::Result<Vec<f32>> {
        let mut v = vec![0.0_f32; 8];
        for (i, b) in text.bytes().enumerate() {
            v[i % 8] += b as f32;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn dimension(&self) -> usize {
        8
    }

    fn model_name(&self) -> &str {
        "mini"
    }
}

#[test]
fn scenario_dimension_change_keeps_rows_accessible() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("memories.db");
    let db_path = db_path.to_str().unwrap();

    let id;
    {
        let storage = Storage::open(db_path).unwrap();
        let engine = MemoryEngine::new(storage, Arc::new(HashEmbedder::new()));
        id = engine
            .remember("survives the dimension change", &[], None, None)
            .unwrap()
            .id;
    }

    // Reopen with a different embedder dimension
    let storage = Storage::open(db_path).unwrap();
    let engine = MemoryEngine::new(storage, Arc::new(MiniEmbedder));

    // Row is still accessible
    let memory = engine.get(&id).unwrap();
    assert_eq!(memory.content, "survives the dimension change");

    // The index holds no stale-dimension entries; a new write is indexed and
    // recall works against the new dimension
    engine
        .remember("fresh entry at the new dimension", &[], None, None)
        .unwrap();
    let results = engine.recall("fresh entry", 5, None, None).unwrap();
    assert!(results.iter().any(|m| m.content.contains("fresh entry")));
}

// ============================================================================
// DIRECT ADD (IMPORT PATH)
// ============================================================================

#[test]
fn scenario_add_preserves_caller_timestamps() {
    let engine = engine();
    let mut memory = Memory::new("imported with history".to_string(), vec![], None, None);
    let when = chrono::Utc::now() - chrono::Duration::days(42);
    memory.created_at = when;
    memory.updated_at = when;

    let stored = engine.add(memory).unwrap();
    let loaded = engine.get(&stored.id).unwrap();
    assert!((loaded.created_at - when).num_seconds().abs() < 1);
}

#[test]
fn scenario_temporal_chain_from_writes() {
    let engine = engine();
    let a = engine.remember("first in the chain", &[], None, None).unwrap();
    let b = engine.remember("second in the chain", &[], None, None).unwrap();
    let c = engine.remember("third in the chain", &[], None, None).unwrap();

    let to_b = engine.edges_to(&b.id, Some(EdgeType::Temporal)).unwrap();
    assert_eq!(to_b.len(), 1);
    assert_eq!(to_b[0].source_id, a.id);

    let to_c = engine.edges_to(&c.id, Some(EdgeType::Temporal)).unwrap();
    assert_eq!(to_c.len(), 1);
    assert_eq!(to_c[0].source_id, b.id);
}
