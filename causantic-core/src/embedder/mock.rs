//! Deterministic, non-semantic embedder used by tests: retrieval,
//! clustering, and MMR tests need stable vectors, not real semantics.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Embedder, LoadOptions};
use crate::error::Result;
use crate::vector_index::cosine_similarity;

/// Deterministic embedder: hashes input text into a seed and expands it
/// into a fixed-dimension pseudo-random unit vector via the same
/// multiplicative PRNG shape used elsewhere in this workspace for
/// reproducible test fixtures. Two calls with the same text always
/// produce the same vector.
pub struct MockEmbedder {
    dimension: usize,
    loaded_model: Mutex<Option<String>>,
    embed_calls: AtomicUsize,
}

impl MockEmbedder {
    /// Creates a mock embedder producing vectors of `dimension`.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            loaded_model: Mutex::new(None),
            embed_calls: AtomicUsize::new(0),
        }
    }

    /// Number of `embed` calls made so far, for retry/circuit-breaker
    /// tests that assert on call counts.
    #[must_use]
    pub fn embed_call_count(&self) -> usize {
        self.embed_calls.load(Ordering::Relaxed)
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut seed = hasher.finish();

        let mut embedding = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let value = ((seed >> 16) as f32) / 32768.0 - 1.0;
            embedding.push(value);
        }

        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn load(&self, model_id: &str, _options: LoadOptions) -> Result<()> {
        *self.loaded_model.lock() = Some(model_id.to_string());
        Ok(())
    }

    async fn embed(&self, text_batch: &[String], _is_query: bool) -> Result<Vec<Vec<f32>>> {
        self.embed_calls.fetch_add(1, Ordering::Relaxed);
        Ok(text_batch.iter().map(|t| self.generate(t)).collect())
    }

    async fn dispose(&self) -> Result<()> {
        *self.loaded_model.lock() = None;
        Ok(())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
