//! The `Embedder` trait: the external text-embedding collaborator.
//!
//! The embedding model itself and its device-selection glue live outside
//! this crate; this module only fixes the boundary the ingest
//! orchestrator and retriever call through, plus a circuit breaker shared
//! by any embedder/labeler implementation.

mod circuit_breaker;
mod mock;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitOpenError};
pub use mock::MockEmbedder;

use async_trait::async_trait;

use crate::error::Result;

/// Device selection hint passed to [`Embedder::load`]. The engine does
/// not interpret this beyond forwarding it; device glue lives outside the
/// core.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Free-form device hint, e.g. `"cpu"`, `"cuda:0"`.
    pub device: Option<String>,
}

/// External text-embedding collaborator.
///
/// The engine treats returned vectors as L2-normalizable float32 arrays of
/// a model-fixed dimension, and never inspects the model's internals.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Loads the given model, established once before any `embed` calls.
    async fn load(&self, model_id: &str, options: LoadOptions) -> Result<()>;

    /// Embeds a batch of strings in one call. `is_query` distinguishes
    /// query-side embedding (which some models prepend an instruction
    /// prefix for) from document-side embedding.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::External`] on failure; callers
    /// retry through [`crate::retry::RetryPolicy`].
    async fn embed(&self, text_batch: &[String], is_query: bool) -> Result<Vec<Vec<f32>>>;

    /// Releases any resources the loaded model holds.
    async fn dispose(&self) -> Result<()>;

    /// The fixed output dimension of the loaded model.
    fn dimension(&self) -> usize;
}
