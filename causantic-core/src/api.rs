//! Query-API-facing types: the shapes `search`/`recall`/`predict`/
//! `list_projects`/`list_sessions`/`reconstruct`/`forget` speak. The
//! engine itself is transport-agnostic; this module fixes the semantics
//! only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Summary row for one project, as returned by `list_projects`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    /// Project slug.
    pub slug: String,
    /// Absolute working-directory path the slug was derived from.
    pub project_path: String,
    /// Total chunks stored for this project.
    pub chunk_count: u64,
    /// Earliest chunk `start_time` for this project.
    pub first_seen: DateTime<Utc>,
    /// Latest chunk `end_time` for this project.
    pub last_seen: DateTime<Utc>,
}

/// Summary row for one session, as returned by `list_sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier.
    pub session_id: String,
    /// Owning project slug.
    pub project_slug: String,
    /// Total chunks stored for this session.
    pub chunk_count: u64,
    /// Earliest chunk `start_time` in this session.
    pub start_time: DateTime<Utc>,
    /// Latest chunk `end_time` in this session.
    pub end_time: DateTime<Utc>,
}

/// Inclusive time range filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Range start, inclusive.
    pub from: DateTime<Utc>,
    /// Range end, inclusive.
    pub to: DateTime<Utc>,
}

/// Filters shared by `search`/`recall`/`predict`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryFilters {
    /// Restrict results to one project slug.
    pub project: Option<String>,
    /// Skip cluster expansion (retrieval stage 3).
    #[serde(default)]
    pub skip_clusters: bool,
}

/// Which stage surfaced a ranked hit, carried through fusion for
/// diagnostics and UI grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    /// Surfaced by dense vector KNN.
    Vector,
    /// Surfaced by lexical (BM25) search.
    Keyword,
    /// Surfaced by cluster-centroid expansion.
    Cluster,
    /// Surfaced by causal-chain walk.
    Chain,
}

/// One ranked retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedHit {
    /// The matched chunk.
    pub chunk_id: Uuid,
    /// Final fused/reranked/decayed score.
    pub final_score: f32,
    /// Which stage(s) surfaced this chunk; the first stage to surface it
    /// if more than one did.
    pub source: HitSource,
    /// Short preview text for display.
    pub preview: String,
}

/// Causal-chain walk direction used by `recall` (backward, recall mode)
/// and `predict` (forward, predict mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainDirection {
    /// Walk backward edges; hop decay is linear, dying at hop 10.
    Backward,
    /// Walk forward edges; hop decay is flat for 5 hops then linear to
    /// zero by hop 20.
    Forward,
}

/// A ranked hit augmented with the causal chain walked from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedHitWithChain {
    /// The seed hit this chain was walked from.
    pub hit: RankedHit,
    /// Chunks reached by the walk, in visitation order, each with its
    /// hop-decayed contribution to the seed's score.
    pub chain: Vec<ChainLink>,
}

/// One chunk reached during a causal-chain walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainLink {
    /// The reached chunk.
    pub chunk_id: Uuid,
    /// Hop distance from the seed chunk.
    pub hop: u32,
    /// Edge weight of the link traversed to reach this chunk.
    pub edge_weight: f32,
    /// Hop-decayed score contribution.
    pub decayed_score: f32,
}

/// Filters for `forget`; a `dry_run` never mutates the store and always
/// returns a preview.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgetFilters {
    /// Restrict to one project slug.
    pub project: Option<String>,
    /// Only chunks with `start_time` at or after this instant.
    pub after: Option<DateTime<Utc>>,
    /// Only chunks with `end_time` at or before this instant.
    pub before: Option<DateTime<Utc>>,
    /// Restrict to one session.
    pub session_id: Option<String>,
    /// Only chunks matching this query above `threshold` cosine
    /// similarity.
    pub query: Option<String>,
    /// Similarity threshold paired with `query`.
    pub threshold: Option<f32>,
    /// When true, compute but do not apply the deletion.
    pub dry_run: bool,
}

/// Preview or applied-deletion report for `forget`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgetReport {
    /// Chunk ids that matched (or were deleted).
    pub chunk_ids: Vec<Uuid>,
    /// Number of edges that were (or would be) removed.
    pub edges_removed: usize,
    /// Number of cluster assignments that were (or would be) removed.
    pub cluster_assignments_removed: usize,
    /// Whether this report describes a dry run (no mutation occurred).
    pub dry_run: bool,
}

/// Token budget accounting used by `recall`/`reconstruct` to bound how
/// much text is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    /// Maximum approximate tokens the caller wants back.
    pub max_tokens: u32,
}

impl TokenBudget {
    /// Whether `spent` tokens have exhausted this budget.
    #[must_use]
    pub fn is_exhausted(&self, spent: u32) -> bool {
        spent >= self.max_tokens
    }
}

/// Selector for `reconstruct`: which chunks to assemble chronologically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconstructSelector {
    /// All chunks of one session.
    Session(String),
    /// The session immediately preceding `session_id` in the same
    /// project.
    PreviousSession { project: String, session_id: String },
    /// All chunks within a project whose `start_time` falls in range.
    Range { project: String, range: TimeRange },
}
