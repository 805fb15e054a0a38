//! Fixture builders for the causantic domain types, shared by the
//! `causantic-store`, `causantic-vector-index`, and `causantic-engine`
//! test suites so each doesn't hand-roll its own sample chunks.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use causantic_core::types::{Chunk, Confidence, Edge, EdgeType, ReferenceType};

/// Builds a well-formed chunk for `session_id`/`turn_indices`, anchored
/// at `base_time` plus one second per turn so chunks from the same
/// builder call sort in a stable, predictable order.
#[must_use]
pub fn sample_chunk(session_id: &str, turn_indices: Vec<usize>, base_time: DateTime<Utc>, content: &str) -> Chunk {
    let start_time = base_time + Duration::seconds(*turn_indices.first().unwrap_or(&0) as i64);
    let end_time = base_time + Duration::seconds(*turn_indices.last().unwrap_or(&0) as i64);
    Chunk {
        id: Chunk::derive_id(session_id, &turn_indices),
        session_id: session_id.to_string(),
        project_slug: "causantic".to_string(),
        project_path: "/home/user/causantic".to_string(),
        turn_indices,
        start_time,
        end_time,
        content: content.to_string(),
        approx_tokens: content.split_whitespace().count() as u32,
        code_block_count: 0,
        tool_use_count: 0,
        agent_id: None,
        spawn_depth: 0,
        vector_clock: Vec::new(),
        created_at: Utc::now(),
    }
}

/// Builds a chunk scoped to an explicit project, otherwise identical to
/// [`sample_chunk`].
#[must_use]
pub fn sample_chunk_in_project(
    project_slug: &str,
    session_id: &str,
    turn_indices: Vec<usize>,
    base_time: DateTime<Utc>,
    content: &str,
) -> Chunk {
    let mut chunk = sample_chunk(session_id, turn_indices, base_time, content);
    chunk.project_slug = project_slug.to_string();
    chunk.project_path = format!("/home/user/{project_slug}");
    chunk
}

/// Builds a single directed edge with a fixed `created_at`, for tests
/// that don't care about the symmetric-pair construction in
/// [`causantic_core::types::Edge::symmetric_pair`].
#[must_use]
pub fn sample_edge(source: Uuid, target: Uuid, edge_type: EdgeType, reference_type: ReferenceType, weight: f32) -> Edge {
    Edge {
        source_chunk_id: source,
        target_chunk_id: target,
        edge_type,
        reference_type,
        initial_weight: weight,
        link_count: 1,
        created_at: Utc::now(),
    }
}

/// A deterministic unit-length embedding for chunk `seed`, spread evenly
/// across `dimension` axes so nearby seeds produce nearby vectors
/// without pulling in a real embedding model for tests.
#[must_use]
pub fn deterministic_embedding(seed: u64, dimension: usize) -> Vec<f32> {
    let mut vector: Vec<f32> = (0..dimension).map(|i| (seed as f32 + i as f32 * 0.37).sin()).collect();
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

/// [`Confidence::High`]'s multiplier, re-exported for tests that assert
/// against the default confidence the edge builder assigns.
#[must_use]
pub fn default_confidence() -> Confidence {
    Confidence::High
}
