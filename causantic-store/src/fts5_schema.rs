//! FTS5 virtual table mirroring `chunks.content`, kept in sync by
//! triggers on insert/update/delete. [`crate::migrations`] creates this
//! lazily so a libsql build without the FTS5 extension can still open
//! the database; [`crate::CausanticStore::fts_search`] degrades to an
//! empty result when the table is absent.

pub const CREATE_CHUNKS_FTS_TABLE: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    content,
    content='chunks',
    content_rowid='rowid'
)";

pub const CREATE_CHUNKS_FTS_INSERT_TRIGGER: &str = "
CREATE TRIGGER IF NOT EXISTS chunks_fts_insert AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, content) VALUES (new.rowid, new.content);
END";

pub const CREATE_CHUNKS_FTS_DELETE_TRIGGER: &str = "
CREATE TRIGGER IF NOT EXISTS chunks_fts_delete AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
END";

pub const CREATE_CHUNKS_FTS_UPDATE_TRIGGER: &str = "
CREATE TRIGGER IF NOT EXISTS chunks_fts_update AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
    INSERT INTO chunks_fts(rowid, content) VALUES (new.rowid, new.content);
END";

pub const FTS_STATEMENTS: &[&str] = &[
    CREATE_CHUNKS_FTS_TABLE,
    CREATE_CHUNKS_FTS_INSERT_TRIGGER,
    CREATE_CHUNKS_FTS_DELETE_TRIGGER,
    CREATE_CHUNKS_FTS_UPDATE_TRIGGER,
];

/// The BM25-ranked search query, ascending by score (lower is more
/// relevant per SQLite FTS5's convention), optionally scoped to one
/// project via a join back to `chunks`.
pub const SEARCH_ALL_PROJECTS: &str = "
SELECT c.id, bm25(chunks_fts) AS score
FROM chunks_fts
JOIN chunks c ON c.rowid = chunks_fts.rowid
WHERE chunks_fts MATCH ?1
ORDER BY score ASC
LIMIT ?2";

pub const SEARCH_ONE_PROJECT: &str = "
SELECT c.id, bm25(chunks_fts) AS score
FROM chunks_fts
JOIN chunks c ON c.rowid = chunks_fts.rowid
WHERE chunks_fts MATCH ?1 AND c.project_slug = ?2
ORDER BY score ASC
LIMIT ?3";
