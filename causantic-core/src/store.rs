//! The `Store` trait: the sole owner of persistent state. Every other
//! component reads through typed query functions and writes through
//! transactional command functions on this trait, per the ownership rule
//! in the data model.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::api::{ProjectInfo, SessionInfo};
use crate::error::Result;
use crate::types::{Chunk, Cluster, ChunkCluster, Edge, EdgeType, EmbeddingCacheEntry, IngestionCheckpoint};

/// Options narrowing a time-range chunk query.
#[derive(Debug, Clone, Default)]
pub struct TimeRangeOptions {
    /// Restrict to one session within the project.
    pub session_id: Option<String>,
    /// Maximum rows to return.
    pub limit: Option<usize>,
}

/// Record of one maintenance task run, for the scheduler's bookkeeping.
#[derive(Debug, Clone)]
pub struct MaintenanceRun {
    /// Task name, e.g. `"prune-graph"`.
    pub task: String,
    /// When the task started.
    pub started_at: DateTime<Utc>,
    /// When the task finished, `None` while still running.
    pub finished_at: Option<DateTime<Utc>>,
    /// Whether the task completed successfully.
    pub success: bool,
    /// Error message if `success` is false.
    pub error: Option<String>,
}

/// Embedded SQL store: chunks, edges, clusters, checkpoints, and the
/// embedding cache, all behind one transactional, typed interface.
///
/// Implementations MUST serialize writes (one writer at a time) while
/// allowing concurrent readers under snapshot isolation, per the
/// concurrency and resource model.
#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts a batch of chunks atomically, returning their ids in
    /// insertion order. Invalidates the process-wide projects-list cache.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::Corruption`] if any chunk fails its
    /// own invariants, or a storage error if the transaction fails.
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Uuid>>;

    /// Fetches chunks by id, in no particular order; ids with no match
    /// are silently omitted.
    async fn get_chunks_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Chunk>>;

    /// Fetches every chunk belonging to one session, ordered by
    /// `(start_time, min(turn_indices))`.
    async fn get_chunks_by_session(&self, session_id: &str) -> Result<Vec<Chunk>>;

    /// Fetches chunks in a project whose `start_time` falls within
    /// `[from, to]`, using the `(session_slug, start_time)` composite
    /// index.
    async fn get_chunks_by_time_range(
        &self,
        project: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        opts: &TimeRangeOptions,
    ) -> Result<Vec<Chunk>>;

    /// Finds the session immediately preceding `current_session` within
    /// the same project, used by the edge builder's cross-session pass.
    async fn get_previous_session(
        &self,
        project: &str,
        current_session: &str,
    ) -> Result<Option<String>>;

    /// Deletes a set of chunks and cascades to their embeddings, edges,
    /// cluster assignments, and FTS rows in one transaction.
    async fn delete_chunks(&self, ids: &[Uuid]) -> Result<usize>;

    /// For each edge, boosts an existing edge with the same
    /// `(source, target, edge_type, reference_type)` or inserts a new
    /// one. Returns the number of edges touched (created or boosted).
    async fn create_or_boost_edges(&self, edges: &[Edge]) -> Result<usize>;

    /// Fetches edges touching a chunk, optionally filtered by direction.
    async fn get_edges_for_chunk(
        &self,
        chunk_id: Uuid,
        edge_type: Option<EdgeType>,
    ) -> Result<Vec<Edge>>;

    /// Deletes every edge touching any chunk in `chunk_ids`, returning the
    /// count removed.
    async fn delete_edges_for_session(&self, chunk_ids: &[Uuid]) -> Result<usize>;

    /// Removes edges whose endpoints no longer exist, part of
    /// `prune-graph`.
    async fn prune_dangling_edges(&self) -> Result<usize>;

    /// Removes chunks whose session has no checkpoint (the checkpoint is
    /// the only durable record that a session is still tracked, so its
    /// absence means the session was deleted), cascading through the
    /// same path as [`Store::delete_chunks`]. Returns the removed chunk
    /// ids so callers can also evict them from the `VectorIndex`. Part
    /// of `prune-graph`.
    async fn prune_orphaned_chunks(&self) -> Result<Vec<Uuid>>;

    /// Full-text search over `chunks.content`, returning
    /// `(chunk_id, bm25_score)` ascending by score (lower is more
    /// relevant, matching SQLite FTS5's convention). Returns an empty
    /// result if FTS is unavailable rather than erroring.
    async fn fts_search(
        &self,
        query: &str,
        limit: usize,
        project: Option<&str>,
    ) -> Result<Vec<(Uuid, f32)>>;

    /// Reads the ingestion checkpoint for a session, if any.
    async fn get_checkpoint(&self, session_id: &str) -> Result<Option<IngestionCheckpoint>>;

    /// Writes (overwriting) the ingestion checkpoint for a session.
    async fn put_checkpoint(&self, checkpoint: &IngestionCheckpoint) -> Result<()>;

    /// Looks up a cached embedding by `(content_hash, model_id)`,
    /// incrementing `hit_count` on a hit.
    async fn cache_get(&self, content_hash: &str, model_id: &str) -> Result<Option<Vec<f32>>>;

    /// Inserts (or overwrites) an embedding-cache entry.
    async fn cache_put(&self, entry: &EmbeddingCacheEntry) -> Result<()>;

    /// Evicts cache entries whose chunks have all been removed, part of
    /// `prune-graph`.
    async fn cache_prune_orphans(&self) -> Result<usize>;

    /// Replaces all clusters and `chunk_clusters` assignments in one
    /// transaction, used by the offline clusterer rebuild.
    async fn replace_clusters(
        &self,
        clusters: &[Cluster],
        assignments: &[ChunkCluster],
    ) -> Result<()>;

    /// Fetches a cluster by id.
    async fn get_cluster(&self, cluster_id: Uuid) -> Result<Option<Cluster>>;

    /// Fetches every cluster, for the retriever's cluster-expansion stage
    /// and the labeler-refresh task.
    async fn get_all_clusters(&self) -> Result<Vec<Cluster>>;

    /// Fetches the cluster assignment for a chunk, if any.
    async fn get_chunk_cluster(&self, chunk_id: Uuid) -> Result<Option<ChunkCluster>>;

    /// Assigns one chunk to a cluster incrementally (used during ingest,
    /// between offline rebuilds), overwriting any prior assignment.
    async fn assign_chunk_to_cluster(&self, assignment: &ChunkCluster) -> Result<()>;

    /// Updates a cluster's stored name/description, used by
    /// `refresh-labels`.
    async fn update_cluster_label(
        &self,
        cluster_id: Uuid,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<()>;

    /// Lists every project with aggregate chunk counts and time bounds.
    /// Implementations may serve this from the process-wide projects
    /// cache, invalidated on every chunk insert/delete.
    async fn list_projects(&self) -> Result<Vec<ProjectInfo>>;

    /// Lists sessions within a project, optionally bounded by time range.
    async fn list_sessions(
        &self,
        project: &str,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<SessionInfo>>;

    /// Records the start/end/outcome of one maintenance task run.
    async fn record_maintenance_run(&self, run: &MaintenanceRun) -> Result<()>;

    /// Compacts the store (`vacuum`).
    async fn vacuum(&self) -> Result<()>;
}
