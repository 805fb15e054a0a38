//! Detects causal transitions between chunks and emits symmetric
//! forward/backward edge pairs.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::extractors::{
    confidence_for_match_len, extract_declared_identifiers, extract_error_fragments,
    extract_file_paths, extract_tool_output_lines, references_identifier,
};
use super::lexicon::contains_backref;
use crate::types::{Chunk, Edge, ReferenceType};

/// Weight assigned to a cross-session structural edge.
pub const CROSS_SESSION_WEIGHT: f32 = 0.7;

/// Base weight a brief/debrief edge decays from per additional
/// `spawn_depth`.
pub const BRIEF_DEBRIEF_BASE_WEIGHT: f32 = 0.9;

/// Per-depth decay multiplier applied to brief/debrief weight.
pub const BRIEF_DEBRIEF_DEPTH_DECAY: f32 = 0.9;

/// One detected transition between an earlier and a later chunk, before
/// it is expanded into a symmetric edge pair.
#[derive(Debug, Clone)]
struct Transition {
    reference_type: ReferenceType,
    weight: f32,
}

/// Runs pass-one category detectors over one adjacent `(earlier, later)`
/// chunk pair, keeping at most one transition per reference type.
fn detect_transitions(earlier: &Chunk, later: &Chunk) -> Vec<Transition> {
    let mut transitions = Vec::new();

    let earlier_paths = extract_file_paths(&earlier.content);
    let later_paths = extract_file_paths(&later.content);
    if let Some(shared) = earlier_paths.intersection(&later_paths).next() {
        transitions.push(Transition {
            reference_type: ReferenceType::FilePath,
            weight: ReferenceType::FilePath.base_weight()
                * confidence_for_match_len(shared.len()).multiplier(),
        });
    }

    let declared = extract_declared_identifiers(&earlier.content);
    if let Some(entity) = declared
        .iter()
        .find(|id| references_identifier(&later.content, id))
    {
        transitions.push(Transition {
            reference_type: ReferenceType::CodeEntity,
            weight: ReferenceType::CodeEntity.base_weight()
                * confidence_for_match_len(entity.len()).multiplier(),
        });
    }

    if contains_backref(&later.content.to_lowercase()) {
        transitions.push(Transition {
            reference_type: ReferenceType::ExplicitBackref,
            weight: ReferenceType::ExplicitBackref.base_weight()
                * confidence_for_match_len(30).multiplier(),
        });
    }

    let earlier_errors = extract_error_fragments(&earlier.content);
    let later_errors = extract_error_fragments(&later.content);
    if let Some(fragment) = earlier_errors
        .iter()
        .find(|f| later_errors.iter().any(|g| g.contains(f.as_str()) || f.contains(g.as_str())))
    {
        transitions.push(Transition {
            reference_type: ReferenceType::ErrorFragment,
            weight: ReferenceType::ErrorFragment.base_weight()
                * confidence_for_match_len(fragment.len()).multiplier(),
        });
    }

    let earlier_tool_lines = extract_tool_output_lines(earlier);
    if earlier_tool_lines
        .iter()
        .any(|line| later.content.contains(line.as_str()))
    {
        transitions.push(Transition {
            reference_type: ReferenceType::ToolOutput,
            weight: ReferenceType::ToolOutput.base_weight()
                * confidence_for_match_len(30).multiplier(),
        });
    }

    if transitions.is_empty() {
        transitions.push(Transition {
            reference_type: ReferenceType::Adjacent,
            weight: ReferenceType::Adjacent.base_weight(),
        });
    }

    transitions
}

/// Runs pass one over a session's chunks, already sorted in ascending
/// `(start_time, min(turn_indices))` order, emitting a symmetric
/// forward/backward edge pair for every detected transition between each
/// consecutive pair.
#[must_use]
pub fn build_adjacency_edges(chunks: &[Chunk], now: DateTime<Utc>) -> Vec<Edge> {
    let mut edges = Vec::with_capacity(chunks.len() * 2);
    for window in chunks.windows(2) {
        let (earlier, later) = (&window[0], &window[1]);
        for transition in detect_transitions(earlier, later) {
            let (fwd, bwd) = Edge::symmetric_pair(
                earlier.id,
                later.id,
                transition.reference_type,
                transition.weight,
                now,
            );
            edges.push(fwd);
            edges.push(bwd);
        }
    }
    edges
}

/// Emits the structural `cross-session` edge pair linking the last
/// chunk(s) of the most recent prior session in a project to the first
/// chunk of a new session.
#[must_use]
pub fn build_cross_session_edges(
    previous_session_last_chunks: &[Chunk],
    new_session_first_chunk: &Chunk,
    now: DateTime<Utc>,
) -> Vec<Edge> {
    let mut edges = Vec::new();
    for earlier in previous_session_last_chunks {
        let (fwd, bwd) = Edge::symmetric_pair(
            earlier.id,
            new_session_first_chunk.id,
            ReferenceType::CrossSession,
            CROSS_SESSION_WEIGHT,
            now,
        );
        edges.push(fwd);
        edges.push(bwd);
    }
    edges
}

/// Computes the weight for a brief or debrief edge at the given
/// `spawn_depth`: `0.9 * 0.9^spawn_depth`.
#[must_use]
pub fn brief_debrief_weight(spawn_depth: u32) -> f32 {
    BRIEF_DEBRIEF_BASE_WEIGHT * BRIEF_DEBRIEF_DEPTH_DECAY.powi(spawn_depth as i32)
}

/// Emits the `brief` edge pair: parent chunk at a sub-agent spawn point
/// to the sub-agent's first chunk.
#[must_use]
pub fn build_brief_edge(parent_chunk_id: Uuid, sub_agent_first_chunk_id: Uuid, spawn_depth: u32, now: DateTime<Utc>) -> (Edge, Edge) {
    Edge::symmetric_pair(
        parent_chunk_id,
        sub_agent_first_chunk_id,
        ReferenceType::Brief,
        brief_debrief_weight(spawn_depth),
        now,
    )
}

/// Emits the `debrief` edge pair: sub-agent's last chunk back to the
/// parent's next chunk after the sub-agent returns.
#[must_use]
pub fn build_debrief_edge(sub_agent_last_chunk_id: Uuid, parent_next_chunk_id: Uuid, spawn_depth: u32, now: DateTime<Utc>) -> (Edge, Edge) {
    Edge::symmetric_pair(
        sub_agent_last_chunk_id,
        parent_next_chunk_id,
        ReferenceType::Debrief,
        brief_debrief_weight(spawn_depth),
        now,
    )
}
