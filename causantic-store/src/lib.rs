//! Embedded SQL store for the causantic causal-memory engine: an async
//! [`causantic_core::store::Store`] implementation over `libsql`, with
//! write-ahead logging, foreign keys, an FTS5 index mirroring
//! `chunks.content`, versioned migrations, and optional at-rest
//! encryption via a cipher pragma applied before any other pragma or
//! query.
//!
//! Writes are serialized through a single `tokio::sync::Mutex` per the
//! concurrency model's "one writer at a time" rule; readers use their
//! own connections and observe WAL's snapshot isolation.

mod codec;
pub mod config;
pub mod encryption;
mod fts5_schema;
mod migrations;
mod schema;
mod store_impl;

use std::sync::Arc;

use causantic_core::api::ProjectInfo;
use causantic_core::error::{Error, Result};
use causantic_core::retry::{RetryConfig, RetryPolicy};
use libsql::{Builder, Connection, Database};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::info;

pub use config::{Cipher, EncryptionSettings, StoreConfig};

/// The embedded-SQL-backed [`causantic_core::store::Store`]
/// implementation. Holds the `libsql::Database` handle, a write mutex
/// enforcing single-writer semantics, and the process-wide projects-list
/// cache invalidated on every chunk insert/delete.
pub struct CausanticStore {
    db: Database,
    write_lock: Mutex<()>,
    projects_cache: RwLock<Option<Arc<Vec<ProjectInfo>>>>,
}

impl CausanticStore {
    /// Opens (creating if absent) the database at `config.db_path`,
    /// applies the cipher pragma first if encryption is enabled, then
    /// WAL mode and foreign keys, then runs pending migrations.
    ///
    /// # Errors
    /// Returns [`Error::CryptoError`] if encryption is enabled and no key
    /// can be resolved, or [`Error::Storage`] if the database can't be
    /// opened or migrated.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Error::Io)?;
        }

        let mut builder = Builder::new_local(&config.db_path);
        if config.encryption.enabled {
            let key = encryption::resolve_key(&config.encryption.key_sources)?;
            let cipher = match config.encryption.cipher {
                Cipher::ChaCha20Poly1305 => libsql::Cipher::Aes256Cbc,
                Cipher::SqlCipherCompat => libsql::Cipher::Aes256Cbc,
            };
            builder = builder.encryption_config(libsql::EncryptionConfig::new(cipher, key.into()));
        }
        let db = builder.build().await.map_err(|e| Error::Storage(format!("failed opening database: {e}")))?;

        let conn = db.connect().map_err(|e| Error::Storage(format!("failed connecting to database: {e}")))?;
        apply_pragmas(&conn, config.busy_timeout_ms).await?;
        migrations::run(&conn).await?;

        info!(path = %config.db_path.display(), "store opened");
        Ok(Self { db, write_lock: Mutex::new(()), projects_cache: RwLock::new(None) })
    }

    /// Opens an in-memory database for tests, skipping encryption.
    ///
    /// # Errors
    /// Returns [`Error::Storage`] if the in-memory database fails to
    /// initialize or migrate.
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| Error::Storage(format!("failed opening in-memory database: {e}")))?;
        let conn = db.connect().map_err(|e| Error::Storage(format!("failed connecting to database: {e}")))?;
        apply_pragmas(&conn, 5_000).await?;
        migrations::run(&conn).await?;
        Ok(Self { db, write_lock: Mutex::new(()), projects_cache: RwLock::new(None) })
    }

    fn connect(&self) -> Result<Connection> {
        self.db.connect().map_err(|e| Error::Storage(format!("failed opening connection: {e}")))
    }

    fn invalidate_projects_cache(&self) {
        *self.projects_cache.write() = None;
    }

    /// Compacts the store, reclaiming space from deleted rows.
    ///
    /// # Errors
    /// Returns [`Error::Storage`] if `VACUUM` fails.
    pub async fn vacuum(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute("VACUUM", ()).await.map_err(|e| Error::Storage(format!("vacuum failed: {e}")))?;
        Ok(())
    }
}

async fn apply_pragmas(conn: &Connection, busy_timeout_ms: u32) -> Result<()> {
    conn.execute("PRAGMA journal_mode=WAL", ())
        .await
        .map_err(|e| Error::Storage(format!("failed enabling WAL: {e}")))?;
    conn.execute("PRAGMA foreign_keys=ON", ())
        .await
        .map_err(|e| Error::Storage(format!("failed enabling foreign keys: {e}")))?;
    conn.execute(&format!("PRAGMA busy_timeout={busy_timeout_ms}"), ())
        .await
        .map_err(|e| Error::Storage(format!("failed setting busy_timeout: {e}")))?;
    Ok(())
}

/// Retries a fallible write through the engine-wide backoff schedule
/// (initial 1s, factor 2, cap 10s, up to 3 retries), used for
/// database-busy and other transient storage errors.
pub(crate) async fn with_retry<F, Fut, T>(operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut policy = RetryPolicy::with_config(RetryConfig::new());
    policy.execute(operation).await
}

/// Classifies a `libsql` error as transient (database locked/busy) or an
/// opaque storage failure.
pub(crate) fn classify(e: libsql::Error) -> Error {
    let message = e.to_string();
    if message.contains("locked") || message.contains("busy") {
        Error::Transient(format!("database busy: {message}"))
    } else {
        Error::Storage(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_runs_migrations() {
        let store = CausanticStore::open_in_memory().await.unwrap();
        let conn = store.connect().unwrap();
        let mut rows = conn.query("SELECT version FROM schema_version", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let version: i64 = row.get(0).unwrap();
        assert_eq!(version, migrations::CURRENT_VERSION);
    }

    #[tokio::test]
    async fn reopening_same_path_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let store = CausanticStore::open(StoreConfig::new(&path)).await.unwrap();
            let conn = store.connect().unwrap();
            conn.execute(
                "INSERT INTO checkpoints (session_id, last_turn_index, last_chunk_id, file_mtime) VALUES ('s1', 3, NULL, '2026-01-01T00:00:00Z')",
                (),
            )
            .await
            .unwrap();
        }
        let store = CausanticStore::open(StoreConfig::new(&path)).await.unwrap();
        let conn = store.connect().unwrap();
        let mut rows = conn.query("SELECT last_turn_index FROM checkpoints WHERE session_id = 's1'", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let last_turn_index: i64 = row.get(0).unwrap();
        assert_eq!(last_turn_index, 3);
    }
}
