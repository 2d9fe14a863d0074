//! Graft container: portable binary memory bundles
//!
//! Layout (little-endian, byte-exact):
//!
//! | offset | bytes | meaning                          |
//! |--------|-------|----------------------------------|
//! | 0      | 4     | magic "PHLO"                     |
//! | 4      | 1     | format version (currently 1)     |
//! | 5      | ...   | gzip stream of one JSON document |
//!
//! The JSON document carries `manifest`, `memories`, and optionally
//! `citations`. Unknown top-level fields are preserved on round-trip.

use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::citation;
use crate::engine::MemoryEngine;
use crate::error::{PhloemError, Result};
use crate::types::{Citation, Memory};

/// Magic bytes "PHLO"
pub const GRAFT_MAGIC: [u8; 4] = [0x50, 0x48, 0x4C, 0x4F];

/// Current container version
pub const GRAFT_VERSION: u8 = 1;

/// Inflated payloads larger than this are rejected (untrusted input bound)
pub const MAX_PAYLOAD_BYTES: u64 = 256 * 1024 * 1024;

/// Graft manifest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraftManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub memory_count: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Forward-compatible extension fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The decompressed graft payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraftDocument {
    pub manifest: GraftManifest,
    pub memories: Vec<Memory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    /// Forward-compatible extension fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Write a graft file
pub fn package(path: &Path, document: &GraftDocument) -> Result<()> {
    let json = serde_json::to_vec(document)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder
        .finish()
        .map_err(|e| PhloemError::InvalidFormat(format!("gzip encoding failed: {}", e)))?;

    let mut bytes = Vec::with_capacity(5 + compressed.len());
    bytes.extend_from_slice(&GRAFT_MAGIC);
    bytes.push(GRAFT_VERSION);
    bytes.extend_from_slice(&compressed);

    std::fs::write(path, bytes)?;
    Ok(())
}

/// Read and fully decode a graft file
pub fn unpack(path: &Path) -> Result<GraftDocument> {
    let json = read_payload(path)?;
    let document: GraftDocument = serde_json::from_slice(&json)
        .map_err(|e| PhloemError::InvalidFormat(format!("graft payload is not valid: {}", e)))?;
    Ok(document)
}

/// Read only the manifest
///
/// v1 has no framed manifest block, so this inflates the whole payload; a
/// future v2 may carry the manifest separately for cheap header reads.
pub fn inspect(path: &Path) -> Result<GraftManifest> {
    Ok(unpack(path)?.manifest)
}

/// Validate header and inflate the payload, bounded by MAX_PAYLOAD_BYTES
fn read_payload(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() < 5 {
        return Err(PhloemError::InvalidFormat(
            "file too short for a graft header".to_string(),
        ));
    }
    if bytes[0..4] != GRAFT_MAGIC {
        return Err(PhloemError::InvalidFormat(
            "not a graft file (bad magic)".to_string(),
        ));
    }
    let version = bytes[4];
    if version != GRAFT_VERSION {
        return Err(PhloemError::UnsupportedVersion(version));
    }

    let mut decoder = GzDecoder::new(&bytes[5..]).take(MAX_PAYLOAD_BYTES + 1);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| PhloemError::InvalidFormat(format!("gzip stream is corrupt: {}", e)))?;
    if json.len() as u64 > MAX_PAYLOAD_BYTES {
        return Err(PhloemError::InvalidFormat(
            "graft payload exceeds the size bound".to_string(),
        ));
    }
    Ok(json)
}

/// Summary of a graft import
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub citations: usize,
}

/// Export matching memories (and their citations) into a graft file
pub fn export_graft(
    engine: &MemoryEngine,
    path: &Path,
    name: &str,
    description: &str,
    author: &str,
    filter_tags: Option<&[String]>,
) -> Result<GraftManifest> {
    if name.trim().is_empty() {
        return Err(PhloemError::InvalidArgument(
            "graft name must not be empty".to_string(),
        ));
    }

    let memories = engine.list(0, filter_tags)?;
    let mut citations = Vec::new();
    for memory in &memories {
        citations.extend(engine.get_citations(&memory.id)?);
    }

    let mut tags: Vec<String> = memories.iter().flat_map(|m| m.tags.clone()).collect();
    tags.sort();
    tags.dedup();

    let manifest = GraftManifest {
        name: name.to_string(),
        description: description.to_string(),
        author: author.to_string(),
        version: crate::VERSION.to_string(),
        created_at: Utc::now(),
        memory_count: memories.len() as i64,
        tags,
        extra: serde_json::Map::new(),
    };

    let document = GraftDocument {
        manifest: manifest.clone(),
        memories,
        citations: if citations.is_empty() {
            None
        } else {
            Some(citations)
        },
        extra: serde_json::Map::new(),
    };
    package(path, &document)?;
    Ok(manifest)
}

/// Import a graft file through the idempotent add path
pub fn import_graft(engine: &MemoryEngine, path: &Path) -> Result<ImportSummary> {
    let document = unpack(path)?;
    let source = format!(
        "graft:{}:{}",
        document.manifest.name, document.manifest.author
    );

    let mut summary = ImportSummary::default();
    // Ids may be remapped on dedupe; citations must follow their memory
    let mut id_map: std::collections::HashMap<String, String> = std::collections::HashMap::new();

    for mut memory in document.memories {
        let original_id = memory.id.clone();
        if memory.source.is_none() {
            memory.source = Some(source.clone());
        }
        if memory.content_hash.is_empty() {
            memory.content_hash = crate::types::content_hash(&memory.content);
        }

        let existing = engine.storage().with_connection(|conn| {
            crate::storage::queries::find_by_content_hash(
                conn,
                &memory.content_hash,
                memory.scope.as_deref(),
            )
        })?;
        match existing {
            Some(existing) => {
                summary.skipped += 1;
                id_map.insert(original_id, existing.id);
            }
            None => {
                let stored = engine.add(memory)?;
                summary.imported += 1;
                id_map.insert(original_id, stored.id);
            }
        }
    }

    if let Some(citations) = document.citations {
        for mut c in citations {
            if let Some(mapped) = id_map.get(&c.memory_id) {
                c.memory_id = mapped.clone();
            }
            let inserted = engine
                .storage()
                .with_transaction(|conn| citation::insert_citation(conn, &c))?;
            if inserted {
                summary.citations += 1;
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use std::sync::Arc;

    fn manifest(count: i64) -> GraftManifest {
        GraftManifest {
            name: "Test".to_string(),
            description: "fixture bundle".to_string(),
            author: "phloem".to_string(),
            version: "0.4.0".to_string(),
            created_at: Utc::now(),
            memory_count: count,
            tags: vec!["a".to_string()],
            extra: serde_json::Map::new(),
        }
    }

    fn document() -> GraftDocument {
        let memories = vec![
            Memory::new("first bundled memory".to_string(), vec!["a".to_string()], None, None),
            Memory::new("second bundled memory".to_string(), vec![], None, None),
        ];
        GraftDocument {
            manifest: manifest(memories.len() as i64),
            memories,
            citations: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.graft");
        let doc = document();

        package(&path, &doc).unwrap();
        let restored = unpack(&path).unwrap();

        assert_eq!(restored.manifest, doc.manifest);
        assert_eq!(restored.memories.len(), 2);
        assert_eq!(restored.memories[0].id, doc.memories[0].id);
        assert_eq!(restored.memories[0].content, doc.memories[0].content);
        assert_eq!(restored.memories[0].tags, doc.memories[0].tags);
    }

    #[test]
    fn test_header_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.graft");
        package(&path, &document()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..5], &[0x50, 0x48, 0x4C, 0x4F, 0x01]);
    }

    #[test]
    fn test_inspect_reads_manifest_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.graft");
        let doc = document();
        package(&path, &doc).unwrap();

        let manifest = inspect(&path).unwrap();
        assert_eq!(manifest, doc.manifest);
        assert_eq!(manifest.memory_count, 2);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-graft");
        std::fs::write(&path, b"GARBAGE DATA HERE").unwrap();

        assert!(matches!(
            unpack(&path),
            Err(PhloemError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.graft");
        let mut bytes = GRAFT_MAGIC.to_vec();
        bytes.push(2);
        bytes.extend_from_slice(&[0u8; 16]);
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            unpack(&path),
            Err(PhloemError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_truncated_gzip_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.graft");
        package(&path, &document()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let truncated_path = dir.path().join("truncated.graft");
        std::fs::write(&truncated_path, &bytes[..bytes.len() - 4]).unwrap();

        assert!(matches!(
            unpack(&truncated_path),
            Err(PhloemError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_unknown_fields_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.graft");
        let mut doc = document();
        doc.extra.insert(
            "license".to_string(),
            serde_json::Value::String("CC0".to_string()),
        );

        package(&path, &doc).unwrap();
        let restored = unpack(&path).unwrap();
        assert_eq!(
            restored.extra.get("license"),
            Some(&serde_json::Value::String("CC0".to_string()))
        );

        // Round-trip again keeps it
        let path2 = dir.path().join("bundle2.graft");
        package(&path2, &restored).unwrap();
        let restored2 = unpack(&path2).unwrap();
        assert!(restored2.extra.contains_key("license"));
    }

    #[test]
    fn test_export_import_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.graft");

        let source = MemoryEngine::open_in_memory(Arc::new(HashEmbedder::new())).unwrap();
        let m = source
            .remember("exported knowledge about lifetimes", &["rust".to_string()], None, None)
            .unwrap();
        source
            .add_citation(&m.id, "src/lib.rs", 1, 2, None, None)
            .unwrap();

        let manifest =
            export_graft(&source, &path, "rust-notes", "test bundle", "author", None).unwrap();
        assert_eq!(manifest.memory_count, 1);

        let target = MemoryEngine::open_in_memory(Arc::new(HashEmbedder::new())).unwrap();
        let summary = import_graft(&target, &path).unwrap();
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.citations, 1);

        let imported = target.get(&m.id).unwrap();
        assert_eq!(imported.source.as_deref(), Some("graft:rust-notes:author"));

        // Re-import is a no-op
        let summary = import_graft(&target, &path).unwrap();
        assert_eq!(summary.imported, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.citations, 0);
        assert_eq!(target.count().unwrap(), 1);
    }
}
