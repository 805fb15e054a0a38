//! DDL for the embedded store: chunks, edges, clusters, chunk
//! assignments, ingestion checkpoints, the embedding cache, and
//! maintenance-run bookkeeping. Kept as plain `const` strings, the same
//! shape the teacher crate used to keep schema text out of the query
//! path.

pub const CREATE_SCHEMA_VERSION_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
)";

pub const CREATE_CHUNKS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    id BLOB PRIMARY KEY,
    session_id TEXT NOT NULL,
    project_slug TEXT NOT NULL,
    project_path TEXT NOT NULL,
    turn_indices TEXT NOT NULL,
    min_turn_index INTEGER NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT NOT NULL,
    content TEXT NOT NULL,
    approx_tokens INTEGER NOT NULL,
    code_block_count INTEGER NOT NULL,
    tool_use_count INTEGER NOT NULL,
    agent_id TEXT,
    spawn_depth INTEGER NOT NULL DEFAULT 0,
    vector_clock BLOB,
    created_at TEXT NOT NULL
)";

pub const CREATE_CHUNKS_SESSION_INDEX: &str = "
CREATE INDEX IF NOT EXISTS idx_chunks_session_id ON chunks (session_id)";

pub const CREATE_CHUNKS_PROJECT_TIME_INDEX: &str = "
CREATE INDEX IF NOT EXISTS idx_chunks_project_start_time ON chunks (project_slug, start_time)";

/// Enforces the data model's `(session_id, min(turn_indices))`
/// uniqueness invariant and doubles as the ordering index for
/// `(start_time, min(turn_indices))` scans.
pub const CREATE_CHUNKS_SESSION_MIN_TURN_UNIQUE: &str = "
CREATE UNIQUE INDEX IF NOT EXISTS idx_chunks_session_min_turn ON chunks (session_id, min_turn_index)";

pub const CREATE_EDGES_TABLE: &str = "
CREATE TABLE IF NOT EXISTS edges (
    source_chunk_id BLOB NOT NULL,
    target_chunk_id BLOB NOT NULL,
    edge_type TEXT NOT NULL,
    reference_type TEXT NOT NULL,
    initial_weight REAL NOT NULL,
    link_count INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    PRIMARY KEY (source_chunk_id, target_chunk_id, edge_type, reference_type)
)";

pub const CREATE_EDGES_SOURCE_INDEX: &str = "
CREATE INDEX IF NOT EXISTS idx_edges_source ON edges (source_chunk_id)";

pub const CREATE_EDGES_TARGET_INDEX: &str = "
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges (target_chunk_id)";

pub const CREATE_CLUSTERS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS clusters (
    id BLOB PRIMARY KEY,
    name TEXT,
    description TEXT,
    centroid BLOB,
    exemplar_ids TEXT NOT NULL,
    membership_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    refreshed_at TEXT NOT NULL
)";

pub const CREATE_CHUNK_CLUSTERS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS chunk_clusters (
    chunk_id BLOB PRIMARY KEY,
    cluster_id BLOB NOT NULL,
    distance REAL NOT NULL
)";

pub const CREATE_CHUNK_CLUSTERS_CLUSTER_INDEX: &str = "
CREATE INDEX IF NOT EXISTS idx_chunk_clusters_cluster_id ON chunk_clusters (cluster_id)";

pub const CREATE_CHECKPOINTS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS checkpoints (
    session_id TEXT PRIMARY KEY,
    last_turn_index INTEGER NOT NULL,
    last_chunk_id BLOB,
    file_mtime TEXT NOT NULL
)";

pub const CREATE_EMBEDDING_CACHE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS embedding_cache (
    content_hash TEXT NOT NULL,
    model_id TEXT NOT NULL,
    embedding BLOB NOT NULL,
    hit_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (content_hash, model_id)
)";

pub const CREATE_MAINTENANCE_RUNS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS maintenance_runs (
    task TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    success INTEGER,
    error TEXT
)";

pub const CREATE_MAINTENANCE_RUNS_TASK_INDEX: &str = "
CREATE INDEX IF NOT EXISTS idx_maintenance_runs_task ON maintenance_runs (task, started_at)";

/// Every table/index statement run for a fresh database, in dependency
/// order. [`crate::migrations`] runs these once at version 0 and then
/// applies incremental bumps on top.
pub const BASE_SCHEMA: &[&str] = &[
    CREATE_CHUNKS_TABLE,
    CREATE_CHUNKS_SESSION_INDEX,
    CREATE_CHUNKS_PROJECT_TIME_INDEX,
    CREATE_CHUNKS_SESSION_MIN_TURN_UNIQUE,
    CREATE_EDGES_TABLE,
    CREATE_EDGES_SOURCE_INDEX,
    CREATE_EDGES_TARGET_INDEX,
    CREATE_CLUSTERS_TABLE,
    CREATE_CHUNK_CLUSTERS_TABLE,
    CREATE_CHUNK_CLUSTERS_CLUSTER_INDEX,
    CREATE_CHECKPOINTS_TABLE,
    CREATE_EMBEDDING_CACHE_TABLE,
    CREATE_MAINTENANCE_RUNS_TABLE,
    CREATE_MAINTENANCE_RUNS_TASK_INDEX,
];
