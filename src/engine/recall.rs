//! Recall: index-first semantic retrieval with a linear-scan fallback,
//! blended ranking, and multi-query composition

use std::collections::HashMap;

use chrono::Utc;

use crate::embedding::cosine_similarity;
use crate::error::{PhloemError, Result};
use crate::storage::queries;
use crate::types::{importance_of, BlendOptions, Memory};

use super::MemoryEngine;

/// Above this store size, an index-less recall with no tag filter delegates
/// to blended recall instead of a full cosine scan
const LINEAR_SCAN_CEILING: i64 = 5000;

/// Result of a multi-query compose
#[derive(Debug, Clone, serde::Serialize)]
pub struct ComposeResult {
    pub memories: Vec<Memory>,
    pub explanation: String,
}

impl MemoryEngine {
    /// Semantic recall ranked by similarity x utility
    pub fn recall(
        &self,
        query: &str,
        k: usize,
        filter_tags: Option<&[String]>,
        scope: Option<&str>,
    ) -> Result<Vec<Memory>> {
        Ok(self
            .recall_with_scores(query, k, filter_tags, scope)?
            .into_iter()
            .map(|(m, _)| m)
            .collect())
    }

    /// Recall keeping the per-memory score (used by compose and curation)
    pub fn recall_with_scores(
        &self,
        query: &str,
        k: usize,
        filter_tags: Option<&[String]>,
        scope: Option<&str>,
    ) -> Result<Vec<(Memory, f32)>> {
        if query.trim().is_empty() {
            return Err(PhloemError::InvalidArgument(
                "recall query must not be empty".to_string(),
            ));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let q = self.embedder().embed(query)?;
        let has_filters = filter_tags.map(|t| !t.is_empty()).unwrap_or(false) || scope.is_some();

        if self.index().available() {
            let overfetch = (if has_filters { k * 5 } else { k * 3 }).max(20);
            let candidates = self.index().search(&q, overfetch)?;
            return self.rank_candidates(candidates, k, filter_tags, scope);
        }

        let no_tag_filter = filter_tags.map(|t| t.is_empty()).unwrap_or(true);
        if no_tag_filter && self.count()? > LINEAR_SCAN_CEILING {
            let scored = self.recall_blended_scored(query, k, &BlendOptions::default())?;
            return Ok(scored);
        }

        self.linear_scan(&q, k, filter_tags, scope)
    }

    /// Fetch, filter, and rank index candidates
    fn rank_candidates(
        &self,
        candidates: Vec<(String, f32)>,
        k: usize,
        filter_tags: Option<&[String]>,
        scope: Option<&str>,
    ) -> Result<Vec<(Memory, f32)>> {
        let ids: Vec<String> = candidates.iter().map(|(id, _)| id.clone()).collect();
        let distances: HashMap<String, f32> = candidates.into_iter().collect();

        let memories = self
            .storage()
            .with_connection(|conn| queries::get_memories_batch(conn, &ids))?;

        let mut scored: Vec<(Memory, f32)> = memories
            .into_iter()
            .filter(|m| scope_matches(m, scope))
            .filter(|m| tags_match(m, filter_tags))
            .map(|m| {
                let distance = distances.get(&m.id).copied().unwrap_or(2.0);
                let sim = (1.0 - distance) * m.utility_score.max(0.5);
                (m, sim)
            })
            .collect();

        sort_and_truncate(&mut scored, k);
        Ok(scored)
    }

    /// Cosine over every stored embedding (index-less path)
    fn linear_scan(
        &self,
        q: &[f32],
        k: usize,
        filter_tags: Option<&[String]>,
        scope: Option<&str>,
    ) -> Result<Vec<(Memory, f32)>> {
        let memories = self
            .storage()
            .with_connection(|conn| queries::list_memories(conn, 0, filter_tags))?;

        let mut scored: Vec<(Memory, f32)> = memories
            .into_iter()
            .filter(|m| scope_matches(m, scope))
            .filter(|m| m.embedding.len() == q.len())
            .map(|m| {
                let sim = cosine_similarity(q, &m.embedding) * m.utility_score.max(0.5);
                (m, sim)
            })
            .collect();

        sort_and_truncate(&mut scored, k);
        Ok(scored)
    }

    /// Blended recall: semantic + recency + importance + citation confidence
    pub fn recall_blended(
        &self,
        query: &str,
        k: usize,
        options: &BlendOptions,
    ) -> Result<Vec<Memory>> {
        Ok(self
            .recall_blended_scored(query, k, options)?
            .into_iter()
            .map(|(m, _)| m)
            .collect())
    }

    pub fn recall_blended_scored(
        &self,
        query: &str,
        k: usize,
        options: &BlendOptions,
    ) -> Result<Vec<(Memory, f32)>> {
        if query.trim().is_empty() {
            return Err(PhloemError::InvalidArgument(
                "recall query must not be empty".to_string(),
            ));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let q = self.embedder().embed(query)?;

        // Candidate set: index overfetch when possible, full table otherwise
        let candidates: Vec<Memory> = if self.index().available() {
            let hits = self.index().search(&q, (k * 3).max(20))?;
            let ids: Vec<String> = hits.iter().map(|(id, _)| id.clone()).collect();
            self.storage()
                .with_connection(|conn| queries::get_memories_batch(conn, &ids))?
        } else {
            self.storage()
                .with_connection(|conn| queries::list_memories(conn, 0, None))?
        };

        let (w_sem, w_rec, w_imp, w_conf) = options.normalized_weights();
        let half_life = options.recency_half_life_hours.max(f32::EPSILON);
        let now = Utc::now();

        let mut scored: Vec<(Memory, f32)> = Vec::with_capacity(candidates.len());
        for memory in candidates {
            if let Some(since) = options.since {
                if memory.created_at < since {
                    continue;
                }
            }

            let semantic = if memory.embedding.len() == q.len() {
                cosine_similarity(&q, &memory.embedding)
            } else {
                0.0
            };
            let hours = (now - memory.created_at).num_minutes() as f32 / 60.0;
            let recency = 2.0_f32.powf(-hours.max(0.0) / half_life);
            let importance = importance_of(&memory.tags);
            let confidence = self.memory_confidence(&memory.id)?;

            let blended =
                w_sem * semantic + w_rec * recency + w_imp * importance + w_conf * confidence;
            let score = blended * memory.utility_score.max(0.5);
            scored.push((memory, score));
        }

        sort_and_truncate(&mut scored, k);
        Ok(scored)
    }

    /// Multi-query recall merge
    ///
    /// Each non-empty query recalls `2k` candidates; per-memory best
    /// similarity wins; survivors are sorted globally and truncated to `k`.
    pub fn compose(&self, queries: &[String], k: usize) -> Result<ComposeResult> {
        let non_empty: Vec<&String> = queries.iter().filter(|q| !q.trim().is_empty()).collect();
        if non_empty.is_empty() {
            return Err(PhloemError::InvalidArgument(
                "compose requires at least one non-empty query".to_string(),
            ));
        }

        let mut best: HashMap<String, (Memory, f32)> = HashMap::new();
        let mut hit_counts: Vec<(String, usize)> = Vec::with_capacity(non_empty.len());

        for query in non_empty {
            let results = self.recall_with_scores(query, k * 2, None, None)?;
            hit_counts.push((query.clone(), results.len()));
            for (memory, sim) in results {
                match best.get(&memory.id) {
                    Some((_, existing)) if *existing >= sim => {}
                    _ => {
                        best.insert(memory.id.clone(), (memory, sim));
                    }
                }
            }
        }

        let mut merged: Vec<(Memory, f32)> = best.into_values().collect();
        sort_and_truncate(&mut merged, k);

        let parts: Vec<String> = hit_counts
            .iter()
            .map(|(q, n)| format!("'{}' matched {}", q, n))
            .collect();
        let explanation = format!(
            "Composed {} quer{} into {} memories: {}",
            hit_counts.len(),
            if hit_counts.len() == 1 { "y" } else { "ies" },
            merged.len(),
            parts.join("; ")
        );

        Ok(ComposeResult {
            memories: merged.into_iter().map(|(m, _)| m).collect(),
            explanation,
        })
    }

    /// Recall over a context string with the limit clamped to [1, 20]
    pub fn prefetch(&self, context: &str, limit: usize) -> Result<Vec<Memory>> {
        let limit = limit.clamp(1, 20);
        self.recall(context, limit, None, None)
    }
}

fn scope_matches(memory: &Memory, scope: Option<&str>) -> bool {
    match scope {
        Some(scope) => memory.scope.as_deref() == Some(scope),
        None => true,
    }
}

fn tags_match(memory: &Memory, filter_tags: Option<&[String]>) -> bool {
    match filter_tags {
        Some(tags) if !tags.is_empty() => memory.tags.iter().any(|t| tags.contains(t)),
        _ => true,
    }
}

/// Sort by score descending, ties broken by created_at descending
fn sort_and_truncate(scored: &mut Vec<(Memory, f32)>, k: usize) {
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.0.created_at.cmp(&a.0.created_at))
            .then_with(|| a.0.id.cmp(&b.0.id))
    });
    scored.truncate(k);
}
