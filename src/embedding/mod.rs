//! Embedding generation
//!
//! The core ships a single deterministic local embedder. Remote embedders
//! are constructed by the protocol adapter and injected through the
//! `Embedder` trait; the core never opens a network connection.

mod hash;

pub use hash::HashEmbedder;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config;
use crate::error::{PhloemError, Result};

/// Trait for embedding generators
pub trait Embedder: Send + Sync {
    /// Generate a unit-norm embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Get embedding dimensions
    fn dimension(&self) -> usize;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// Wrapper composing a primary embedder with the local fallback
///
/// The first error from the primary flips a sticky bit; every later call is
/// routed to the local embedder. Logged once.
pub struct FallbackEmbedder {
    primary: Arc<dyn Embedder>,
    local: HashEmbedder,
    tripped: AtomicBool,
}

impl FallbackEmbedder {
    pub fn new(primary: Arc<dyn Embedder>) -> Self {
        Self {
            primary,
            local: HashEmbedder::new(),
            tripped: AtomicBool::new(false),
        }
    }

    /// Whether the fallback has been engaged
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Relaxed)
    }
}

impl Embedder for FallbackEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.is_tripped() {
            return self.local.embed(text);
        }
        match self.primary.embed(text) {
            Ok(v) => Ok(v),
            Err(e) => {
                if !self.tripped.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        "embedder '{}' failed ({}); switching to local embedder for the rest of this process",
                        self.primary.model_name(),
                        e
                    );
                }
                self.local.embed(text)
            }
        }
    }

    fn dimension(&self) -> usize {
        if self.is_tripped() {
            self.local.dimension()
        } else {
            self.primary.dimension()
        }
    }

    fn model_name(&self) -> &str {
        if self.is_tripped() {
            self.local.model_name()
        } else {
            self.primary.model_name()
        }
    }
}

/// Create an embedder from a selector string
///
/// Honours PHLOEM_AIR_GAPPED (forces local). The only in-core selector is
/// "local" (aliases: "hash", "default"); anything else is rejected so a
/// misconfigured adapter fails loudly instead of silently degrading.
pub fn create_embedder(selector: Option<&str>) -> Result<Arc<dyn Embedder>> {
    if config::air_gapped() {
        return Ok(Arc::new(HashEmbedder::new()));
    }
    let selector = selector
        .map(|s| s.to_string())
        .or_else(config::embeddings_selector)
        .unwrap_or_else(|| "local".to_string());

    match selector.as_str() {
        "local" | "hash" | "default" => Ok(Arc::new(HashEmbedder::new())),
        other => Err(PhloemError::Config(format!(
            "unknown embedder selector: {}",
            other
        ))),
    }
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
