//! The content-addressed chunk: the engine's unit of retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A contiguous slice of a session's turns bundled as a single retrieval
/// unit. Immutable except for cluster membership, which lives in a side
/// table (see [`crate::types::ChunkCluster`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable 128-bit id derived from `(session_id, sorted turn_indices)`.
    pub id: Uuid,
    /// Owning session's identifier.
    pub session_id: String,
    /// Project slug the owning session belongs to.
    pub project_slug: String,
    /// Absolute working-directory path the slug was derived from.
    pub project_path: String,
    /// Turn indices this chunk packs, strictly increasing, non-empty.
    pub turn_indices: Vec<usize>,
    /// Timestamp of the first included turn.
    pub start_time: DateTime<Utc>,
    /// Timestamp of the last included turn.
    pub end_time: DateTime<Utc>,
    /// Packed UTF-8 text of all included turns.
    pub content: String,
    /// Whitespace/punctuation-based token estimate.
    pub approx_tokens: u32,
    /// Number of code fences across included turns.
    pub code_block_count: u32,
    /// Number of tool-use blocks across included turns.
    pub tool_use_count: u32,
    /// Sub-agent name, or `None` for the main session.
    pub agent_id: Option<String>,
    /// 0 for the main session, >=1 for sub-agents.
    pub spawn_depth: u32,
    /// Opaque per-chunk attribute with no retrieval semantics (see spec
    /// section 9). Persisted and round-tripped, never interpreted.
    #[serde(default)]
    pub vector_clock: Vec<u8>,
    /// When this chunk was first inserted into the store.
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    /// Derives the stable chunk id for `(session_id, turn_indices)`.
    ///
    /// Re-chunking identical turns of the same session always yields the
    /// same id, which is the chunk-id-stability property from spec
    /// section 8: the hash only depends on the session id and the sorted
    /// turn-index set, never on content or wall-clock time.
    #[must_use]
    pub fn derive_id(session_id: &str, turn_indices: &[usize]) -> Uuid {
        let mut sorted = turn_indices.to_vec();
        sorted.sort_unstable();

        let mut hasher = Sha256::new();
        hasher.update(session_id.as_bytes());
        hasher.update(b"\0");
        for idx in &sorted {
            hasher.update(idx.to_le_bytes());
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::from_bytes(bytes)
    }

    /// Validates the invariants from the data model: `start_time <=
    /// end_time`, non-empty strictly increasing `turn_indices`, and
    /// non-empty content.
    pub fn validate(&self) -> Result<()> {
        if self.start_time > self.end_time {
            return Err(Error::InvalidInput(format!(
                "chunk {}: start_time {} is after end_time {}",
                self.id, self.start_time, self.end_time
            )));
        }
        if self.turn_indices.is_empty() {
            return Err(Error::InvalidInput(format!(
                "chunk {}: turn_indices must not be empty",
                self.id
            )));
        }
        if !self.turn_indices.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::InvalidInput(format!(
                "chunk {}: turn_indices must be strictly increasing",
                self.id
            )));
        }
        if self.content.is_empty() {
            return Err(Error::InvalidInput(format!(
                "chunk {}: content must not be empty",
                self.id
            )));
        }
        Ok(())
    }

    /// The smallest turn index in this chunk, used as the tie-breaker for
    /// the `(session_id, min(turn_indices))` uniqueness invariant.
    #[must_use]
    pub fn min_turn_index(&self) -> usize {
        self.turn_indices.first().copied().unwrap_or(0)
    }

    /// A short preview of the chunk's content for ranked-result display.
    #[must_use]
    pub fn preview(&self, max_chars: usize) -> String {
        if self.content.len() <= max_chars {
            self.content.clone()
        } else {
            let mut end = max_chars;
            while !self.content.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}…", &self.content[..end])
        }
    }
}

/// Row in `chunk_clusters`: the at-most-one-cluster assignment for a
/// chunk, plus its cosine distance to the cluster's centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkCluster {
    /// Assigned chunk.
    pub chunk_id: Uuid,
    /// Owning cluster.
    pub cluster_id: Uuid,
    /// Cosine distance from the chunk's embedding to the cluster centroid.
    pub distance: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk(turn_indices: Vec<usize>) -> Chunk {
        let now = Utc::now();
        Chunk {
            id: Chunk::derive_id("session-1", &turn_indices),
            session_id: "session-1".to_string(),
            project_slug: "causantic".to_string(),
            project_path: "/home/user/causantic".to_string(),
            turn_indices,
            start_time: now,
            end_time: now,
            content: "hello world".to_string(),
            approx_tokens: 2,
            code_block_count: 0,
            tool_use_count: 0,
            agent_id: None,
            spawn_depth: 0,
            vector_clock: Vec::new(),
            created_at: now,
        }
    }

    #[test]
    fn chunk_id_is_stable_under_reordering_and_reingest() {
        let a = Chunk::derive_id("session-1", &[3, 1, 2]);
        let b = Chunk::derive_id("session-1", &[1, 2, 3]);
        assert_eq!(a, b);
    }

    #[test]
    fn chunk_id_differs_across_sessions() {
        let a = Chunk::derive_id("session-1", &[1, 2]);
        let b = Chunk::derive_id("session-2", &[1, 2]);
        assert_ne!(a, b);
    }

    #[test]
    fn validate_rejects_empty_turn_indices() {
        let chunk = sample_chunk(vec![]);
        assert!(chunk.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_increasing_turn_indices() {
        let mut chunk = sample_chunk(vec![1, 2, 3]);
        chunk.turn_indices = vec![2, 1, 3];
        assert!(chunk.validate().is_err());
    }

    #[test]
    fn validate_rejects_start_after_end() {
        let mut chunk = sample_chunk(vec![1]);
        chunk.start_time = chunk.end_time + chrono::Duration::seconds(1);
        assert!(chunk.validate().is_err());
    }

    #[test]
    fn validate_accepts_well_formed_chunk() {
        let chunk = sample_chunk(vec![1, 2, 3]);
        assert!(chunk.validate().is_ok());
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let mut chunk = sample_chunk(vec![1]);
        chunk.content = "héllo wörld".to_string();
        let preview = chunk.preview(3);
        assert!(preview.ends_with('…'));
    }
}
