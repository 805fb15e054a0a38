//! Ingestion checkpoints and the embedding cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resume point for one session's ingest, letting the orchestrator skip
/// unchanged files and resume partial ingests idempotently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionCheckpoint {
    /// Session this checkpoint tracks.
    pub session_id: String,
    /// Highest turn index ingested so far.
    pub last_turn_index: usize,
    /// Id of the last chunk written for this session.
    pub last_chunk_id: Option<Uuid>,
    /// Modification time of the transcript file as of the last ingest.
    pub file_mtime: DateTime<Utc>,
}

/// Outcome of attempting to ingest one session file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// The file's mtime matched the checkpoint; nothing was read.
    SkippedUnchangedFile,
    /// New turns were parsed, chunked, embedded, and stored.
    Ingested,
}

/// Cache row mapping `(content_hash, model_id)` to a previously computed
/// embedding, avoiding recomputation for unchanged chunk text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingCacheEntry {
    /// Cryptographic digest of the chunk's text.
    pub content_hash: String,
    /// Embedding model identifier this vector was produced by.
    pub model_id: String,
    /// The cached embedding vector.
    pub embedding: Vec<f32>,
    /// Number of times this entry has been served instead of recomputed.
    pub hit_count: u64,
}

impl EmbeddingCacheEntry {
    /// Computes the content hash key for a piece of chunk text, a pure
    /// function of the text alone.
    #[must_use]
    pub fn hash_content(text: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
