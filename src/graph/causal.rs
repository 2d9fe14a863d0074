//! Lexical causal-phrase extraction
//!
//! A pure function from content to candidate (phrase, reason) pairs. The
//! engine resolves each phrase against the store and, when a distinct best
//! match exists, records a causal edge with the reason as payload.

use once_cell::sync::Lazy;
use regex::Regex;

/// A candidate cause extracted from memory content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CausalHint {
    /// Phrase naming the suspected cause, used as a recall query
    pub phrase: String,
    /// The connective that introduced it
    pub reason: String,
}

/// Most hints considered per memory; long texts repeat connectives
const MAX_HINTS: usize = 5;

/// Connective patterns, most specific first. Each captures the clause that
/// names the cause (or consequence, for forward connectives).
static CAUSAL_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    let patterns: [(&str, &str); 8] = [
        (r"(?i)\bas a result of\s+(.{4,120})", "as a result of"),
        (r"(?i)\bbecause of\s+(.{4,120})", "because of"),
        (r"(?i)\bbecause\s+(.{4,120})", "because"),
        (r"(?i)\bdue to\s+(.{4,120})", "due to"),
        (r"(?i)\bcaused by\s+(.{4,120})", "caused by"),
        (r"(?i)\bso that\s+(.{4,120})", "so that"),
        (r"(?i)\bleads? to\s+(.{4,120})", "leads to"),
        (r"(?i)\bresults? in\s+(.{4,120})", "results in"),
    ];
    patterns
        .iter()
        .map(|(pattern, reason)| (Regex::new(pattern).expect("static pattern"), *reason))
        .collect()
});

/// Extract causal hints from memory content
pub fn extract_causes(content: &str) -> Vec<CausalHint> {
    let mut hints: Vec<CausalHint> = Vec::new();
    // "because of" and "because" match at the same offset; the first
    // (more specific) pattern wins
    let mut seen_starts: std::collections::HashSet<usize> = std::collections::HashSet::new();

    for (pattern, reason) in CAUSAL_PATTERNS.iter() {
        for captures in pattern.captures_iter(content) {
            if hints.len() >= MAX_HINTS {
                return hints;
            }
            let full = captures.get(0).expect("match exists");
            if !seen_starts.insert(full.start()) {
                continue;
            }
            let Some(raw) = captures.get(1) else { continue };
            let phrase = clip_clause(raw.as_str());
            if phrase.split_whitespace().count() < 2 {
                continue;
            }
            if hints.iter().any(|h| h.phrase == phrase) {
                continue;
            }
            hints.push(CausalHint {
                phrase,
                reason: reason.to_string(),
            });
        }
    }

    hints
}

/// Trim the captured clause at the first sentence boundary
fn clip_clause(raw: &str) -> String {
    let end = raw
        .find(|c| c == '.' || c == ';' || c == '!' || c == '?' || c == '\n')
        .unwrap_or(raw.len());
    raw[..end].trim().trim_end_matches(',').to_string()
}
