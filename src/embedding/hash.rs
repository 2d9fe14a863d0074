//! Deterministic feature-hashing embedder
//!
//! Learned-free 512-dim embedder combining hashed word n-grams, hashed
//! character trigrams, keyword-scored semantic categories, and structural
//! scalars. Byte-stable for identical input: hashing is a fixed FNV-1a, so
//! vectors survive process and toolchain changes.

use crate::embedding::Embedder;
use crate::error::Result;

/// Slot layout: 60% word n-grams, 20% char trigrams, 10% categories,
/// 10% structural scalars.
const WORD_SLOTS: usize = 307;
const CHAR_SLOTS: usize = 102;
const CATEGORY_SLOTS: usize = 51;

const CHAR_BASE: usize = WORD_SLOTS;
const CATEGORY_BASE: usize = WORD_SLOTS + CHAR_SLOTS;
const STRUCT_BASE: usize = WORD_SLOTS + CHAR_SLOTS + CATEGORY_SLOTS;

/// Unigrams in this set carry no weight on their own (still appear in n-grams)
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "if",
    "in", "is", "it", "its", "of", "on", "or", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "were", "which", "will", "with",
];

/// Keyword tables for the six semantic category slots
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "code",
        &[
            "function", "class", "struct", "method", "variable", "compile", "bug", "error",
            "test", "api", "code", "refactor", "commit", "branch", "merge", "module",
        ],
    ),
    (
        "time",
        &[
            "today", "tomorrow", "yesterday", "deadline", "schedule", "week", "month", "year",
            "hour", "minute", "later", "soon", "before", "after", "when",
        ],
    ),
    (
        "action",
        &[
            "create", "delete", "update", "build", "deploy", "run", "fix", "add", "remove",
            "implement", "write", "read", "send", "start", "stop", "finish",
        ],
    ),
    (
        "people",
        &[
            "user", "team", "client", "customer", "developer", "author", "owner", "reviewer",
            "everyone", "nobody", "someone", "we", "i", "you", "he", "she",
        ],
    ),
    (
        "status",
        &[
            "done", "pending", "blocked", "complete", "failed", "passed", "open", "closed",
            "active", "stale", "ready", "broken", "working", "resolved",
        ],
    ),
    (
        "priority",
        &[
            "urgent", "critical", "important", "asap", "must", "required", "optional", "minor",
            "major", "blocker", "high", "low", "priority",
        ],
    ),
];

/// Feature-hashing embedder, the default local model
pub struct HashEmbedder;

impl HashEmbedder {
    pub const DIMENSIONS: usize = 512;

    pub fn new() -> Self {
        Self
    }

    /// Tokenize into lowercase words, stripping punctuation at word edges
    fn tokenize(text: &str) -> Vec<String> {
        text.split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|w| !w.is_empty())
            .collect()
    }

    /// FNV-1a, fixed offset/prime so the mapping never shifts between builds
    fn fnv1a(bytes: &[u8]) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for &b in bytes {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }

    fn slot(token: &str, base: usize, region: usize) -> usize {
        base + (Self::fnv1a(token.as_bytes()) as usize) % region
    }

    /// Sign hashing reduces collision impact (same trick as signed feature
    /// hashing in linear models)
    fn sign(token: &str) -> f32 {
        let mut bytes = token.as_bytes().to_vec();
        bytes.push(b'#');
        if Self::fnv1a(&bytes) & 1 == 0 {
            1.0
        } else {
            -1.0
        }
    }

    /// Positional weight: the first and last three words carry more signal
    fn position_weight(idx: usize, len: usize) -> f32 {
        if idx < 3 || idx + 3 >= len {
            1.5
        } else {
            1.0
        }
    }

    fn add_word_features(tokens: &[String], out: &mut [f32]) {
        use std::collections::HashMap;

        // Term frequency and best positional weight per token
        let mut tf: HashMap<&str, (f32, f32)> = HashMap::new();
        for (idx, token) in tokens.iter().enumerate() {
            let pos = Self::position_weight(idx, tokens.len());
            let entry = tf.entry(token.as_str()).or_insert((0.0, 0.0));
            entry.0 += 1.0;
            entry.1 = entry.1.max(pos);
        }

        for (token, (count, pos)) in tf {
            if STOP_WORDS.contains(&token) {
                continue;
            }
            let weight = pos * (1.0 + count.ln());
            out[Self::slot(token, 0, WORD_SLOTS)] += weight * Self::sign(token);
        }

        // Bigrams and trigrams, no stop suppression
        for window in tokens.windows(2) {
            let gram = format!("{} {}", window[0], window[1]);
            out[Self::slot(&gram, 0, WORD_SLOTS)] += 0.6 * Self::sign(&gram);
        }
        for window in tokens.windows(3) {
            let gram = format!("{} {} {}", window[0], window[1], window[2]);
            out[Self::slot(&gram, 0, WORD_SLOTS)] += 0.4 * Self::sign(&gram);
        }
    }

    fn add_char_features(text: &str, out: &mut [f32]) {
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        for window in chars.windows(3) {
            let gram: String = window.iter().collect();
            out[Self::slot(&gram, CHAR_BASE, CHAR_SLOTS)] += Self::sign(&gram);
        }
    }

    fn add_category_features(tokens: &[String], out: &mut [f32]) {
        if tokens.is_empty() {
            return;
        }
        for (i, (_name, keywords)) in CATEGORY_KEYWORDS.iter().enumerate() {
            let hits = tokens
                .iter()
                .filter(|t| keywords.contains(&t.as_str()))
                .count();
            out[CATEGORY_BASE + i] = hits as f32 / tokens.len() as f32;
        }
    }

    fn add_structural_features(text: &str, tokens: &[String], out: &mut [f32]) {
        let char_count = text.chars().count() as f32;
        let word_count = tokens.len() as f32;
        let mean_word_len = if tokens.is_empty() {
            0.0
        } else {
            tokens.iter().map(|t| t.chars().count() as f32).sum::<f32>() / word_count
        };
        let sentence_count = text
            .split(|c| c == '.' || c == '!' || c == '?')
            .filter(|s| !s.trim().is_empty())
            .count() as f32;
        let has_question = if text.contains('?') { 1.0 } else { 0.0 };
        let has_code = if looks_like_code(text) { 1.0 } else { 0.0 };
        let has_list = if has_list_markers(text) { 1.0 } else { 0.0 };
        let alphabetic = text.chars().filter(|c| c.is_alphabetic()).count() as f32;
        let uppercase_ratio = if alphabetic > 0.0 {
            text.chars().filter(|c| c.is_uppercase()).count() as f32 / alphabetic
        } else {
            0.0
        };

        let features = [
            (1.0 + char_count).ln(),
            (1.0 + word_count).ln(),
            mean_word_len,
            (1.0 + sentence_count).ln(),
            has_question,
            has_code,
            has_list,
            uppercase_ratio,
        ];
        for (i, value) in features.iter().enumerate() {
            out[STRUCT_BASE + i] = *value;
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

/// Heuristic: code-looking syntax in the text
fn looks_like_code(text: &str) -> bool {
    text.contains("();")
        || text.contains("{}")
        || text.contains("=>")
        || text.contains("fn ")
        || text.contains("def ")
        || text.contains("class ")
        || text.contains("import ")
        || text.contains("::")
}

/// Heuristic: markdown-style list markers at line starts
fn has_list_markers(text: &str) -> bool {
    text.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with("- ")
            || trimmed.starts_with("* ")
            || trimmed
                .split_once(". ")
                .map(|(head, _)| !head.is_empty() && head.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or(false)
    })
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embedding = vec![0.0_f32; Self::DIMENSIONS];
        let tokens = Self::tokenize(text);

        if tokens.is_empty() && text.trim().is_empty() {
            return Ok(embedding);
        }

        Self::add_word_features(&tokens, &mut embedding);
        Self::add_char_features(text, &mut embedding);
        Self::add_category_features(&tokens, &mut embedding);
        Self::add_structural_features(text, &tokens, &mut embedding);

        // L2 normalize
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        Self::DIMENSIONS
    }

    fn model_name(&self) -> &str {
        "hash-v1"
    }
}
