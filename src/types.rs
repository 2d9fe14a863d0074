//! Core types for Phloem

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a memory (16 lowercase hex chars)
pub type MemoryId = String;

/// Generate a fresh 16-hex-char identifier
pub fn new_id() -> MemoryId {
    hex::encode(rand::random::<[u8; 8]>())
}

/// Tags that mark a memory as important regardless of semantic similarity
pub const IMPORTANT_TAGS: &[&str] = &[
    "critical",
    "milestone",
    "founding",
    "permanent",
    "promise",
    "decision",
    "architecture",
];

/// High-importance subset used by blended ranking (weight 1.0)
pub const CRITICAL_TAGS: &[&str] = &["critical", "milestone", "founding", "permanent", "promise"];

/// Secondary importance subset used by blended ranking (weight 0.5)
pub const NOTABLE_TAGS: &[&str] = &["decision", "architecture"];

/// Machine-noise tags that UI surfaces drop from rendered tag lists
pub const BORING_TAGS: &[&str] = &["conversation", "auto-ingested", "assistant", "user"];

/// Check whether a tag belongs to the important set
pub fn is_important_tag(tag: &str) -> bool {
    IMPORTANT_TAGS.contains(&tag)
}

/// Check whether a tag belongs to the boring set
pub fn is_boring_tag(tag: &str) -> bool {
    BORING_TAGS.contains(&tag)
}

/// Importance factor of a tag set for blended ranking
pub fn importance_of(tags: &[String]) -> f32 {
    if tags.iter().any(|t| CRITICAL_TAGS.contains(&t.as_str())) {
        1.0
    } else if tags.iter().any(|t| NOTABLE_TAGS.contains(&t.as_str())) {
        0.5
    } else {
        0.0
    }
}

/// Remove duplicate tags preserving first-insertion order
pub fn dedup_tags(tags: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        if seen.insert(tag.to_string()) {
            out.push(tag.to_string());
        }
    }
    out
}

/// Merge two tag lists: union preserving first-insertion order, then sorted
pub fn merge_tags(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut combined = existing.to_vec();
    combined.extend_from_slice(incoming);
    let mut merged = dedup_tags(&combined);
    merged.sort();
    merged
}

/// A memory entry in the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier (16 hex chars)
    pub id: MemoryId,
    /// Main content of the memory
    pub content: String,
    /// SHA-256 hash of content, used for deduplication
    #[serde(default)]
    pub content_hash: String,
    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form context supplied at write time
    #[serde(default)]
    pub context: Option<String>,
    /// Optional namespace, typically a repository identifier
    #[serde(default)]
    pub scope: Option<String>,
    /// Embedding vector (length = embedder dimension, or empty)
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When the memory was last updated
    pub updated_at: DateTime<Utc>,
    /// Utility weight in [0, 1] applied as a ranking multiplier
    #[serde(default = "default_utility")]
    pub utility_score: f32,
    /// Attribution for imported memories (e.g. "graft:<name>:<author>")
    #[serde(default)]
    pub source: Option<String>,
}

fn default_utility() -> f32 {
    1.0
}

impl Memory {
    /// Create a new memory with generated id and current timestamps
    pub fn new(content: String, tags: Vec<String>, context: Option<String>, scope: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            content_hash: content_hash(&content),
            content,
            tags: dedup_tags(&tags),
            context,
            scope,
            embedding: Vec::new(),
            created_at: now,
            updated_at: now,
            utility_score: 1.0,
            source: None,
        }
    }
}

/// Compute the content hash used for deduplication
pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Anchor from a memory to a line range in a file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Unique identifier (16 hex chars)
    pub id: String,
    /// Memory this citation belongs to
    pub memory_id: MemoryId,
    /// Path of the cited file
    pub file_path: String,
    /// First cited line (1-indexed)
    pub start_line: u32,
    /// Last cited line (inclusive, 1-indexed)
    pub end_line: u32,
    /// Optional commit identifier the citation was taken at
    #[serde(default)]
    pub commit: Option<String>,
    /// Optional snapshot of the cited lines at creation time
    #[serde(default)]
    pub snapshot: Option<String>,
    /// Confidence in [0, 1]; decays over time, restored by verification
    pub confidence: f32,
    /// When the citation was last verified
    pub verified_at: DateTime<Utc>,
    /// When the citation was created
    pub created_at: DateTime<Utc>,
}

/// Types of edges between memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    /// Links each memory to the one written before it
    Temporal,
    /// Extracted cause-effect relation
    Causal,
    /// Similarity link added by the curation pass
    Semantic,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Temporal => "temporal",
            EdgeType::Causal => "causal",
            EdgeType::Semantic => "semantic",
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "temporal" => Ok(EdgeType::Temporal),
            "causal" => Ok(EdgeType::Causal),
            "semantic" => Ok(EdgeType::Semantic),
            _ => Err(format!("Unknown edge type: {}", s)),
        }
    }
}

/// Directed typed relation between two memories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Unique identifier (16 hex chars)
    pub id: String,
    /// Source memory
    pub source_id: MemoryId,
    /// Target memory (nullable; reserved for future self-annotations)
    pub target_id: Option<MemoryId>,
    /// Relation type
    pub edge_type: EdgeType,
    /// Optional free-form payload (e.g. the extracted causal reason)
    #[serde(default)]
    pub payload: Option<String>,
    /// When the edge was created
    pub created_at: DateTime<Utc>,
}

/// Registered scope (namespace) for memories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    /// Scope name, typically a repository URL or path
    pub name: String,
    /// Free-form kind label ("repo", "project", ...)
    #[serde(default)]
    pub scope_type: Option<String>,
    /// Arbitrary metadata as JSON
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Weights and options for blended recall
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlendOptions {
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f32,
    #[serde(default = "default_importance_weight")]
    pub importance_weight: f32,
    #[serde(default = "default_confidence_weight")]
    pub confidence_weight: f32,
    /// Half-life of the recency decay, in hours
    #[serde(default = "default_half_life_hours")]
    pub recency_half_life_hours: f32,
    /// Exclude memories created before this instant
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

fn default_semantic_weight() -> f32 {
    0.5
}

fn default_recency_weight() -> f32 {
    0.25
}

fn default_importance_weight() -> f32 {
    0.1
}

fn default_confidence_weight() -> f32 {
    0.15
}

fn default_half_life_hours() -> f32 {
    168.0
}

impl Default for BlendOptions {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            recency_weight: default_recency_weight(),
            importance_weight: default_importance_weight(),
            confidence_weight: default_confidence_weight(),
            recency_half_life_hours: default_half_life_hours(),
            since: None,
        }
    }
}

impl BlendOptions {
    /// Weights normalised to sum to 1 (semantic, recency, importance, confidence)
    pub fn normalized_weights(&self) -> (f32, f32, f32, f32) {
        let sum = self.semantic_weight
            + self.recency_weight
            + self.importance_weight
            + self.confidence_weight;
        if sum <= 0.0 {
            let opts = BlendOptions::default();
            return (
                opts.semantic_weight,
                opts.recency_weight,
                opts.importance_weight,
                opts.confidence_weight,
            );
        }
        (
            self.semantic_weight / sum,
            self.recency_weight / sum,
            self.importance_weight / sum,
            self.confidence_weight / sum,
        )
    }
}

/// Statistics about the memory store
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryStats {
    pub memory_count: i64,
    pub citation_count: i64,
    pub edge_count: i64,
    pub db_size_bytes: i64,
    pub last_activity: Option<DateTime<Utc>>,
}
