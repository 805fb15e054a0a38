//! Versioned, idempotent schema migrations. Each bump is check-before-
//! change so re-running an already-applied migration is a no-op, per
//! the store's migration contract: "Upgrade steps are transactional and
//! check-before-change so they can be re-run safely."

use causantic_core::error::{Error, Result};
use libsql::Connection;
use tracing::info;

use crate::schema;

/// Current schema version this build knows how to produce. Bumped every
/// time a new migration step is added below.
pub const CURRENT_VERSION: i64 = 3;

async fn execute(conn: &Connection, sql: &str) -> Result<()> {
    conn.execute(sql, ()).await.map_err(|e| Error::Storage(format!("migration statement failed: {e}")))?;
    Ok(())
}

async fn current_version(conn: &Connection) -> Result<i64> {
    conn.execute(schema::CREATE_SCHEMA_VERSION_TABLE, ())
        .await
        .map_err(|e| Error::Storage(format!("failed creating schema_version table: {e}")))?;
    let mut rows = conn
        .query("SELECT version FROM schema_version LIMIT 1", ())
        .await
        .map_err(|e| Error::Storage(format!("failed reading schema_version: {e}")))?;
    match rows.next().await.map_err(|e| Error::Storage(format!("failed reading schema_version row: {e}")))? {
        Some(row) => row.get::<i64>(0).map_err(|e| Error::Storage(format!("malformed schema_version row: {e}"))),
        None => {
            conn.execute("INSERT INTO schema_version (version) VALUES (0)", ())
                .await
                .map_err(|e| Error::Storage(format!("failed seeding schema_version: {e}")))?;
            Ok(0)
        }
    }
}

async fn set_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute("UPDATE schema_version SET version = ?1", libsql::params![version])
        .await
        .map_err(|e| Error::Storage(format!("failed bumping schema_version: {e}")))?;
    Ok(())
}

/// Migration 1: base tables and indices for chunks/edges/clusters/
/// checkpoints/embedding cache/maintenance runs.
async fn migrate_to_1(conn: &Connection) -> Result<()> {
    for statement in schema::BASE_SCHEMA {
        execute(conn, statement).await?;
    }
    Ok(())
}

/// Migration 2: FTS5 virtual table over `chunks.content` plus the
/// triggers that mirror insert/update/delete. Failing to create the
/// virtual table (e.g. an FTS5-less libsql build) is tolerated: later
/// reads through `fts_search` degrade to an empty result, per spec
/// section 4.1's documented degradation.
async fn migrate_to_2(conn: &Connection) -> Result<()> {
    for statement in crate::fts5_schema::FTS_STATEMENTS {
        if let Err(e) = execute(conn, statement).await {
            tracing::warn!("FTS5 schema statement failed, lexical search will degrade: {e}");
            return Ok(());
        }
    }
    Ok(())
}

/// Migration 3: backfill sessions ingested before project slugs were
/// mandatory. Check-before-change: only touches rows that are still
/// empty, so re-running it is harmless.
async fn migrate_to_3(conn: &Connection) -> Result<()> {
    execute(
        conn,
        "UPDATE chunks SET project_slug = 'unknown' WHERE project_slug = ''",
    )
    .await
}

/// Runs every migration between the database's current version and
/// [`CURRENT_VERSION`], each in its own transaction.
///
/// # Errors
/// Returns [`Error::Storage`] if a statement fails, or
/// [`Error::Corruption`] if the stored version is newer than this build
/// knows how to handle.
pub async fn run(conn: &Connection) -> Result<()> {
    let version = current_version(conn).await?;
    if version > CURRENT_VERSION {
        return Err(Error::Corruption(format!(
            "database schema version {version} is newer than this build supports ({CURRENT_VERSION})"
        )));
    }

    if version < 1 {
        run_step(conn, 1, migrate_to_1).await?;
    }
    if version < 2 {
        run_step(conn, 2, migrate_to_2).await?;
    }
    if version < 3 {
        run_step(conn, 3, migrate_to_3).await?;
    }
    Ok(())
}

async fn run_step<F>(conn: &Connection, target: i64, step: impl FnOnce(&Connection) -> F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    info!("applying schema migration to version {target}");
    execute(conn, "BEGIN").await?;
    if let Err(e) = step(conn).await {
        let _ = execute(conn, "ROLLBACK").await;
        return Err(e);
    }
    if let Err(e) = set_version(conn, target).await {
        let _ = execute(conn, "ROLLBACK").await;
        return Err(e);
    }
    execute(conn, "COMMIT").await
}
