//! Directed, typed, weighted edges between chunks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a causal edge relative to chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// Points from a later chunk back to an earlier one.
    Backward,
    /// Points from an earlier chunk forward to a later one.
    Forward,
}

impl EdgeType {
    /// The edge type pointing the opposite direction.
    #[must_use]
    pub fn reverse(self) -> Self {
        match self {
            EdgeType::Backward => EdgeType::Forward,
            EdgeType::Forward => EdgeType::Backward,
        }
    }
}

/// The kind of evidence that produced a causal transition between two
/// chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceType {
    /// A file-like token with a known extension appears in both chunks.
    FilePath,
    /// A declared identifier is referenced verbatim in the next chunk.
    CodeEntity,
    /// A closed-lexicon backreference phrase appears in the later chunk.
    ExplicitBackref,
    /// A 20-50 char error-message fragment appears in both chunks.
    ErrorFragment,
    /// A tool-result line from the earlier chunk recurs in the later
    /// chunk's user text.
    ToolOutput,
    /// Fallback transition between chronologically adjacent chunks.
    Adjacent,
    /// Structural link between the end of one session and the start of
    /// the next session in the same project.
    CrossSession,
    /// Parent chunk at a sub-agent spawn point to the sub-agent's first
    /// chunk.
    Brief,
    /// Sub-agent's last chunk back to the parent's next chunk.
    Debrief,
}

impl ReferenceType {
    /// The base weight assigned before the confidence multiplier, per the
    /// edge-builder pass-one table.
    #[must_use]
    pub fn base_weight(self) -> f32 {
        match self {
            ReferenceType::FilePath => 1.0,
            ReferenceType::CodeEntity => 0.8,
            ReferenceType::ExplicitBackref => 0.9,
            ReferenceType::ErrorFragment => 0.9,
            ReferenceType::ToolOutput => 0.8,
            ReferenceType::Adjacent => 0.5,
            ReferenceType::CrossSession => 0.7,
            ReferenceType::Brief | ReferenceType::Debrief => 0.9,
        }
    }
}

/// Confidence multiplier applied to a reference type's base weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    /// Unambiguous match.
    High,
    /// Plausible but not certain match.
    Medium,
    /// Weak match, kept to avoid losing all signal.
    Low,
}

impl Confidence {
    /// The multiplier this confidence level contributes to an edge's
    /// weight.
    #[must_use]
    pub fn multiplier(self) -> f32 {
        match self {
            Confidence::High => 1.0,
            Confidence::Medium => 0.85,
            Confidence::Low => 0.7,
        }
    }
}

/// A directed, typed, weighted causal link between two chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Chunk this edge originates from.
    pub source_chunk_id: Uuid,
    /// Chunk this edge points to.
    pub target_chunk_id: Uuid,
    /// Direction relative to chronological order.
    pub edge_type: EdgeType,
    /// Kind of evidence that produced this edge.
    pub reference_type: ReferenceType,
    /// Weight in `(0, 1]`.
    pub initial_weight: f32,
    /// Number of times identical evidence has been observed and folded
    /// into this edge via boosting.
    pub link_count: u32,
    /// When this edge was first created.
    pub created_at: DateTime<Utc>,
}

/// Fixed diminishing-returns constant used by
/// `create_or_boost_edges`: `weight = min(1, weight + (1 - weight) *
/// BOOST_FACTOR)`.
pub const BOOST_FACTOR: f32 = 0.2;

impl Edge {
    /// Applies the store's boost formula to an existing edge, incrementing
    /// `link_count` and raising `initial_weight` toward 1 with diminishing
    /// returns.
    pub fn boost(&mut self) {
        self.link_count += 1;
        self.initial_weight =
            (self.initial_weight + (1.0 - self.initial_weight) * BOOST_FACTOR).min(1.0);
    }

    /// Builds the symmetric forward/backward pair for one detected
    /// transition between `earlier` and `later`, both carrying identical
    /// weight as required by the edge-symmetry invariant.
    #[must_use]
    pub fn symmetric_pair(
        earlier: Uuid,
        later: Uuid,
        reference_type: ReferenceType,
        weight: f32,
        now: DateTime<Utc>,
    ) -> (Edge, Edge) {
        let forward = Edge {
            source_chunk_id: earlier,
            target_chunk_id: later,
            edge_type: EdgeType::Forward,
            reference_type,
            initial_weight: weight,
            link_count: 1,
            created_at: now,
        };
        let backward = Edge {
            source_chunk_id: later,
            target_chunk_id: earlier,
            edge_type: EdgeType::Backward,
            reference_type,
            initial_weight: weight,
            link_count: 1,
            created_at: now,
        };
        (forward, backward)
    }
}
