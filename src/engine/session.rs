//! Session context: the composed briefing surfaced at conversation start
//!
//! Blends hint-relevant recall, recent activity, recent important items and
//! per-tag highlights into one text body, suppressing repeats across blocks.

use std::collections::HashSet;

use chrono::Duration;

use crate::error::Result;
use crate::types::{is_boring_tag, BlendOptions, Memory, MemoryId};

use super::MemoryEngine;

/// Blended score floor for the hint block
const RELEVANCE_FLOOR: f32 = 0.15;

/// Tags that get their own capped block
const HIGHLIGHT_TAGS: &[&str] = &["decision", "milestone"];

/// Composed session context
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionContextReport {
    /// Rendered text body
    pub text: String,
    /// Total memories in the store at composition time
    pub memory_count: i64,
}

impl MemoryEngine {
    /// Compose the session-start briefing
    pub fn session_context(&self, hint: Option<&str>) -> Result<SessionContextReport> {
        let mut text = String::from("# Session Context\n\n");
        let mut shown: HashSet<MemoryId> = HashSet::new();

        if let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) {
            let options = BlendOptions {
                semantic_weight: 0.6,
                recency_weight: 0.3,
                importance_weight: 0.1,
                confidence_weight: 0.0,
                recency_half_life_hours: 72.0,
                since: None,
            };
            let relevant: Vec<(Memory, f32)> = self
                .recall_blended_scored(hint, 10, &options)?
                .into_iter()
                .filter(|(_, score)| *score >= RELEVANCE_FLOOR)
                .collect();

            if !relevant.is_empty() {
                text.push_str(&format!("## Relevant to: {}\n", hint));
                for (memory, _) in &relevant {
                    text.push_str(&render_line(memory));
                    shown.insert(memory.id.clone());
                }
                text.push('\n');
            }
        }

        let recent: Vec<Memory> = self
            .list(10, None)?
            .into_iter()
            .filter(|m| !shown.contains(&m.id))
            .collect();
        if !recent.is_empty() {
            text.push_str("## Recent Activity\n");
            for memory in &recent {
                text.push_str(&render_line(memory));
                shown.insert(memory.id.clone());
            }
            text.push('\n');
        }

        let critical: Vec<Memory> = self
            .recent_important(Duration::days(7), 10)?
            .into_iter()
            .filter(|m| !shown.contains(&m.id))
            .collect();
        if !critical.is_empty() {
            text.push_str("## Critical (Last 7 Days)\n");
            for memory in &critical {
                text.push_str(&render_line(memory));
                shown.insert(memory.id.clone());
            }
            text.push('\n');
        }

        for tag in HIGHLIGHT_TAGS {
            let filter = vec![tag.to_string()];
            let tagged = self.list(3, Some(&filter))?;
            if !tagged.is_empty() {
                text.push_str(&format!("## Tagged: {}\n", tag));
                for memory in &tagged {
                    text.push_str(&render_line(memory));
                }
                text.push('\n');
            }
        }

        let stats = self.stats()?;
        let last_activity = stats
            .last_activity
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        text.push_str(&format!(
            "---\n{} memories stored, last activity {}\n",
            stats.memory_count, last_activity
        ));

        Ok(SessionContextReport {
            text,
            memory_count: stats.memory_count,
        })
    }
}

/// One briefing line: truncated content plus non-boring tags
fn render_line(memory: &Memory) -> String {
    let tags: Vec<&str> = memory
        .tags
        .iter()
        .map(|t| t.as_str())
        .filter(|t| !is_boring_tag(t))
        .collect();
    let tag_suffix = if tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", tags.join(", "))
    };
    format!("- {}{}\n", truncate_content(&memory.content, 120), tag_suffix)
}

fn truncate_content(content: &str, max_chars: usize) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let truncated: String = flat.chars().take(max_chars).collect();
    format!("{}...", truncated.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use std::sync::Arc;

    fn engine() -> MemoryEngine {
        MemoryEngine::open_in_memory(Arc::new(HashEmbedder::new())).unwrap()
    }

    #[test]
    fn test_session_context_blocks() {
        let engine = engine();
        engine
            .remember(
                "decision to adopt sqlite for the storage layer",
                &["decision".to_string()],
                None,
                None,
            )
            .unwrap();
        engine
            .remember("milestone release shipped to users", &["milestone".to_string()], None, None)
            .unwrap();
        engine
            .remember("ordinary daily note", &["notes".to_string()], None, None)
            .unwrap();

        let report = engine.session_context(Some("decision")).unwrap();
        assert!(report.text.contains("Relevant to: decision"));
        assert!(report.text.contains("Recent Activity") || report.text.contains("Critical"));
        assert!(report.text.contains("Tagged: decision"));
        assert!(report.text.contains("Tagged: milestone"));
        assert!(report.text.contains("3 memories stored"));
        assert_eq!(report.memory_count, 3);
    }

    #[test]
    fn test_session_context_without_hint() {
        let engine = engine();
        engine.remember("only memory", &[], None, None).unwrap();

        let report = engine.session_context(None).unwrap();
        assert!(!report.text.contains("Relevant to:"));
        assert!(report.text.contains("Recent Activity"));
        assert!(report.text.contains("1 memories stored"));
    }

    #[test]
    fn test_boring_tags_hidden_from_lines() {
        let engine = engine();
        engine
            .remember(
                "assistant turn worth keeping",
                &["assistant".to_string(), "keeper".to_string()],
                None,
                None,
            )
            .unwrap();

        let report = engine.session_context(None).unwrap();
        assert!(report.text.contains("[keeper]"));
        assert!(!report.text.contains("assistant,"));
    }

    #[test]
    fn test_truncate_content_flattens_whitespace() {
        let long = "word ".repeat(100);
        let out = truncate_content(&long, 20);
        assert!(out.ends_with("..."));
        assert!(out.chars().count() <= 24);

        assert_eq!(truncate_content("a\nb\tc", 100), "a b c");
    }
}
