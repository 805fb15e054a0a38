//! The [`causantic_core::store::Store`] implementation over `libsql`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params, params_from_iter, Connection, Value};
use uuid::Uuid;

use causantic_core::api::{ProjectInfo, SessionInfo};
use causantic_core::error::{Error, Result};
use causantic_core::store::{MaintenanceRun, Store, TimeRangeOptions};
use causantic_core::types::{Chunk, ChunkCluster, Cluster, Edge, EdgeType, EmbeddingCacheEntry, IngestionCheckpoint, BOOST_FACTOR};

use crate::codec;
use crate::{classify, with_retry, CausanticStore};

fn edge_type_str(t: EdgeType) -> &'static str {
    match t {
        EdgeType::Forward => "forward",
        EdgeType::Backward => "backward",
    }
}

fn edge_type_from_str(s: &str) -> Result<EdgeType> {
    match s {
        "forward" => Ok(EdgeType::Forward),
        "backward" => Ok(EdgeType::Backward),
        other => Err(Error::Corruption(format!("unknown edge_type in store: {other}"))),
    }
}

fn reference_type_str(t: causantic_core::types::ReferenceType) -> &'static str {
    use causantic_core::types::ReferenceType as R;
    match t {
        R::FilePath => "file-path",
        R::CodeEntity => "code-entity",
        R::ExplicitBackref => "explicit-backref",
        R::ErrorFragment => "error-fragment",
        R::ToolOutput => "tool-output",
        R::Adjacent => "adjacent",
        R::CrossSession => "cross-session",
        R::Brief => "brief",
        R::Debrief => "debrief",
    }
}

fn reference_type_from_str(s: &str) -> Result<causantic_core::types::ReferenceType> {
    use causantic_core::types::ReferenceType as R;
    Ok(match s {
        "file-path" => R::FilePath,
        "code-entity" => R::CodeEntity,
        "explicit-backref" => R::ExplicitBackref,
        "error-fragment" => R::ErrorFragment,
        "tool-output" => R::ToolOutput,
        "adjacent" => R::Adjacent,
        "cross-session" => R::CrossSession,
        "brief" => R::Brief,
        "debrief" => R::Debrief,
        other => return Err(Error::Corruption(format!("unknown reference_type in store: {other}"))),
    })
}

fn row_to_chunk(row: &libsql::Row) -> Result<Chunk> {
    let id_blob: Vec<u8> = row.get(0).map_err(|e| Error::Corruption(e.to_string()))?;
    let session_id: String = row.get(1).map_err(|e| Error::Corruption(e.to_string()))?;
    let project_slug: String = row.get(2).map_err(|e| Error::Corruption(e.to_string()))?;
    let project_path: String = row.get(3).map_err(|e| Error::Corruption(e.to_string()))?;
    let turn_indices_json: String = row.get(4).map_err(|e| Error::Corruption(e.to_string()))?;
    let start_time: String = row.get(5).map_err(|e| Error::Corruption(e.to_string()))?;
    let end_time: String = row.get(6).map_err(|e| Error::Corruption(e.to_string()))?;
    let content: String = row.get(7).map_err(|e| Error::Corruption(e.to_string()))?;
    let approx_tokens: i64 = row.get(8).map_err(|e| Error::Corruption(e.to_string()))?;
    let code_block_count: i64 = row.get(9).map_err(|e| Error::Corruption(e.to_string()))?;
    let tool_use_count: i64 = row.get(10).map_err(|e| Error::Corruption(e.to_string()))?;
    let agent_id: Option<String> = row.get(11).map_err(|e| Error::Corruption(e.to_string()))?;
    let spawn_depth: i64 = row.get(12).map_err(|e| Error::Corruption(e.to_string()))?;
    let vector_clock: Option<Vec<u8>> = row.get(13).map_err(|e| Error::Corruption(e.to_string()))?;
    let created_at: String = row.get(14).map_err(|e| Error::Corruption(e.to_string()))?;

    Ok(Chunk {
        id: codec::uuid_from_blob(&id_blob)?,
        session_id,
        project_slug,
        project_path,
        turn_indices: codec::turn_indices_from_json(&turn_indices_json)?,
        start_time: parse_time(&start_time)?,
        end_time: parse_time(&end_time)?,
        content,
        approx_tokens: approx_tokens as u32,
        code_block_count: code_block_count as u32,
        tool_use_count: tool_use_count as u32,
        agent_id,
        spawn_depth: spawn_depth as u32,
        vector_clock: vector_clock.unwrap_or_default(),
        created_at: parse_time(&created_at)?,
    })
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).map_err(|e| Error::Corruption(format!("malformed timestamp {s}: {e}")))
}

const CHUNK_COLUMNS: &str = "id, session_id, project_slug, project_path, turn_indices, start_time, end_time, content, approx_tokens, code_block_count, tool_use_count, agent_id, spawn_depth, vector_clock, created_at";

/// Insert-only column list: `CHUNK_COLUMNS` plus `min_turn_index`, which
/// every `SELECT` on `CHUNK_COLUMNS` deliberately omits so `row_to_chunk`'s
/// positional reads stay in sync with the 15 fields it decodes. The
/// column still has to be bound on insert, since the schema declares it
/// `NOT NULL` with no default to back the `(session_id, min_turn_index)`
/// unique index.
const CHUNK_INSERT_COLUMNS: &str = "id, session_id, project_slug, project_path, turn_indices, min_turn_index, start_time, end_time, content, approx_tokens, code_block_count, tool_use_count, agent_id, spawn_depth, vector_clock, created_at";

#[async_trait]
impl Store for CausanticStore {
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Uuid>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        for chunk in chunks {
            chunk.validate()?;
        }

        let _guard = self.write_lock.lock().await;
        let ids = with_retry(|| async {
            let conn = self.connect()?;
            conn.execute("BEGIN", ()).await.map_err(classify)?;
            let mut ids = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                let min_turn_index = i64::try_from(chunk.min_turn_index())
                    .map_err(|e| Error::InvalidInput(format!("chunk {}: turn index out of range: {e}", chunk.id)))?;
                let result = conn
                    .execute(
                        &format!("INSERT INTO chunks ({CHUNK_INSERT_COLUMNS}) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)"),
                        params![
                            codec::uuid_to_blob(chunk.id),
                            chunk.session_id.clone(),
                            chunk.project_slug.clone(),
                            chunk.project_path.clone(),
                            codec::turn_indices_to_json(&chunk.turn_indices),
                            min_turn_index,
                            chunk.start_time.to_rfc3339(),
                            chunk.end_time.to_rfc3339(),
                            chunk.content.clone(),
                            i64::from(chunk.approx_tokens),
                            i64::from(chunk.code_block_count),
                            i64::from(chunk.tool_use_count),
                            chunk.agent_id.clone(),
                            i64::from(chunk.spawn_depth),
                            if chunk.vector_clock.is_empty() { None } else { Some(chunk.vector_clock.clone()) },
                            chunk.created_at.to_rfc3339(),
                        ],
                    )
                    .await;
                if let Err(e) = result {
                    let _ = conn.execute("ROLLBACK", ()).await;
                    return Err(classify(e));
                }
                ids.push(chunk.id);
            }
            conn.execute("COMMIT", ()).await.map_err(classify)?;
            Ok(ids)
        })
        .await?;

        self.invalidate_projects_cache();
        Ok(ids)
    }

    async fn get_chunks_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.connect()?;
        let placeholders = (1..=ids.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(",");
        let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE id IN ({placeholders})");
        let params: Vec<Value> = ids.iter().map(|id| Value::Blob(codec::uuid_to_blob(*id))).collect();
        let mut rows = conn.query(&sql, params_from_iter(params)).await.map_err(classify)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(classify)? {
            out.push(row_to_chunk(&row)?);
        }
        Ok(out)
    }

    async fn get_chunks_by_session(&self, session_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks WHERE session_id = ?1 ORDER BY start_time ASC, min_turn_index ASC"
        );
        let mut rows = conn.query(&sql, params![session_id.to_string()]).await.map_err(classify)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(classify)? {
            out.push(row_to_chunk(&row)?);
        }
        Ok(out)
    }

    async fn get_chunks_by_time_range(
        &self,
        project: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        opts: &TimeRangeOptions,
    ) -> Result<Vec<Chunk>> {
        let conn = self.connect()?;
        let mut sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks WHERE project_slug = ?1 AND start_time >= ?2 AND start_time <= ?3"
        );
        let mut values = vec![
            Value::Text(project.to_string()),
            Value::Text(from.to_rfc3339()),
            Value::Text(to.to_rfc3339()),
        ];
        if let Some(session_id) = &opts.session_id {
            sql.push_str(&format!(" AND session_id = ?{}", values.len() + 1));
            values.push(Value::Text(session_id.clone()));
        }
        sql.push_str(" ORDER BY start_time ASC, min_turn_index ASC");
        if let Some(limit) = opts.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        let mut rows = conn.query(&sql, params_from_iter(values)).await.map_err(classify)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(classify)? {
            out.push(row_to_chunk(&row)?);
        }
        Ok(out)
    }

    async fn get_previous_session(&self, project: &str, current_session: &str) -> Result<Option<String>> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT session_id, MIN(start_time) as s FROM chunks WHERE project_slug = ?1 GROUP BY session_id ORDER BY s ASC",
                params![project.to_string()],
            )
            .await
            .map_err(classify)?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await.map_err(classify)? {
            let session_id: String = row.get(0).map_err(|e| Error::Corruption(e.to_string()))?;
            sessions.push(session_id);
        }
        let Some(position) = sessions.iter().position(|s| s == current_session) else {
            return Ok(None);
        };
        Ok(if position == 0 { None } else { Some(sessions[position - 1].clone()) })
    }

    async fn delete_chunks(&self, ids: &[Uuid]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;
        let removed = with_retry(|| async {
            let conn = self.connect()?;
            conn.execute("BEGIN", ()).await.map_err(classify)?;
            let placeholders = (1..=ids.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(",");
            let values: Vec<Value> = ids.iter().map(|id| Value::Blob(codec::uuid_to_blob(*id))).collect();

            let delete_edges = format!(
                "DELETE FROM edges WHERE source_chunk_id IN ({placeholders}) OR target_chunk_id IN ({placeholders})"
            );
            let mut edge_values = values.clone();
            edge_values.extend(values.clone());
            if let Err(e) = conn.execute(&delete_edges, params_from_iter(edge_values)).await {
                let _ = conn.execute("ROLLBACK", ()).await;
                return Err(classify(e));
            }

            if let Err(e) = conn
                .execute(&format!("DELETE FROM chunk_clusters WHERE chunk_id IN ({placeholders})"), params_from_iter(values.clone()))
                .await
            {
                let _ = conn.execute("ROLLBACK", ()).await;
                return Err(classify(e));
            }

            let delete_chunks_sql = format!("DELETE FROM chunks WHERE id IN ({placeholders})");
            let result = match conn.execute(&delete_chunks_sql, params_from_iter(values)).await {
                Ok(n) => n,
                Err(e) => {
                    let _ = conn.execute("ROLLBACK", ()).await;
                    return Err(classify(e));
                }
            };
            conn.execute("COMMIT", ()).await.map_err(classify)?;
            Ok(result as usize)
        })
        .await?;

        self.invalidate_projects_cache();
        Ok(removed)
    }

    async fn create_or_boost_edges(&self, edges: &[Edge]) -> Result<usize> {
        if edges.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;
        with_retry(|| async {
            let conn = self.connect()?;
            conn.execute("BEGIN", ()).await.map_err(classify)?;
            let mut touched = 0usize;
            for edge in edges {
                let sql = format!(
                    "INSERT INTO edges (source_chunk_id, target_chunk_id, edge_type, reference_type, initial_weight, link_count, created_at) \
                     VALUES (?1,?2,?3,?4,?5,1,?6) \
                     ON CONFLICT(source_chunk_id, target_chunk_id, edge_type, reference_type) DO UPDATE SET \
                     link_count = link_count + 1, \
                     initial_weight = MIN(1.0, initial_weight + (1.0 - initial_weight) * {BOOST_FACTOR})"
                );
                let result = conn
                    .execute(
                        &sql,
                        params![
                            codec::uuid_to_blob(edge.source_chunk_id),
                            codec::uuid_to_blob(edge.target_chunk_id),
                            edge_type_str(edge.edge_type),
                            reference_type_str(edge.reference_type),
                            f64::from(edge.initial_weight),
                            edge.created_at.to_rfc3339(),
                        ],
                    )
                    .await;
                match result {
                    Ok(_) => touched += 1,
                    Err(e) => {
                        let _ = conn.execute("ROLLBACK", ()).await;
                        return Err(classify(e));
                    }
                }
            }
            conn.execute("COMMIT", ()).await.map_err(classify)?;
            Ok(touched)
        })
        .await
    }

    async fn get_edges_for_chunk(&self, chunk_id: Uuid, edge_type: Option<EdgeType>) -> Result<Vec<Edge>> {
        let conn = self.connect()?;
        let mut sql = "SELECT source_chunk_id, target_chunk_id, edge_type, reference_type, initial_weight, link_count, created_at \
                        FROM edges WHERE source_chunk_id = ?1"
            .to_string();
        let mut values = vec![Value::Blob(codec::uuid_to_blob(chunk_id))];
        if let Some(t) = edge_type {
            sql.push_str(" AND edge_type = ?2");
            values.push(Value::Text(edge_type_str(t).to_string()));
        }
        let mut rows = conn.query(&sql, params_from_iter(values)).await.map_err(classify)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(classify)? {
            out.push(row_to_edge(&row)?);
        }
        Ok(out)
    }

    async fn delete_edges_for_session(&self, chunk_ids: &[Uuid]) -> Result<usize> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;
        with_retry(|| async {
            let conn = self.connect()?;
            let placeholders = (1..=chunk_ids.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(",");
            let sql = format!(
                "DELETE FROM edges WHERE source_chunk_id IN ({placeholders}) OR target_chunk_id IN ({placeholders})"
            );
            let values: Vec<Value> = chunk_ids.iter().map(|id| Value::Blob(codec::uuid_to_blob(*id))).collect();
            let mut all_values = values.clone();
            all_values.extend(values);
            let n = conn.execute(&sql, params_from_iter(all_values)).await.map_err(classify)?;
            Ok(n as usize)
        })
        .await
    }

    async fn prune_dangling_edges(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        with_retry(|| async {
            let conn = self.connect()?;
            let n = conn
                .execute(
                    "DELETE FROM edges WHERE source_chunk_id NOT IN (SELECT id FROM chunks) OR target_chunk_id NOT IN (SELECT id FROM chunks)",
                    (),
                )
                .await
                .map_err(classify)?;
            Ok(n as usize)
        })
        .await
    }

    async fn prune_orphaned_chunks(&self) -> Result<Vec<Uuid>> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT id FROM chunks WHERE session_id NOT IN (SELECT session_id FROM checkpoints)",
                (),
            )
            .await
            .map_err(classify)?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await.map_err(classify)? {
            let id_blob: Vec<u8> = row.get(0).map_err(|e| Error::Corruption(e.to_string()))?;
            ids.push(codec::uuid_from_blob(&id_blob)?);
        }
        if !ids.is_empty() {
            self.delete_chunks(&ids).await?;
        }
        Ok(ids)
    }

    async fn fts_search(&self, query: &str, limit: usize, project: Option<&str>) -> Result<Vec<(Uuid, f32)>> {
        let conn = self.connect()?;
        let sql = if project.is_some() { crate::fts5_schema::SEARCH_ONE_PROJECT } else { crate::fts5_schema::SEARCH_ALL_PROJECTS };
        let mut values = vec![Value::Text(query.to_string())];
        if let Some(p) = project {
            values.push(Value::Text(p.to_string()));
        }
        values.push(Value::Integer(limit as i64));

        match conn.query(sql, params_from_iter(values)).await {
            Ok(mut rows) => {
                let mut out = Vec::new();
                loop {
                    match rows.next().await {
                        Ok(Some(row)) => {
                            let id_blob: Vec<u8> = row.get(0).map_err(|e| Error::Corruption(e.to_string()))?;
                            let score: f64 = row.get(1).map_err(|e| Error::Corruption(e.to_string()))?;
                            out.push((codec::uuid_from_blob(&id_blob)?, score as f32));
                        }
                        Ok(None) => break,
                        Err(_) => return Ok(Vec::new()),
                    }
                }
                Ok(out)
            }
            // The FTS5 virtual table may be absent (migration degraded); this is
            // the documented fallback, not an error.
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn get_checkpoint(&self, session_id: &str) -> Result<Option<IngestionCheckpoint>> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT session_id, last_turn_index, last_chunk_id, file_mtime FROM checkpoints WHERE session_id = ?1",
                params![session_id.to_string()],
            )
            .await
            .map_err(classify)?;
        let Some(row) = rows.next().await.map_err(classify)? else {
            return Ok(None);
        };
        let last_turn_index: i64 = row.get(1).map_err(|e| Error::Corruption(e.to_string()))?;
        let last_chunk_id: Option<Vec<u8>> = row.get(2).map_err(|e| Error::Corruption(e.to_string()))?;
        let file_mtime: String = row.get(3).map_err(|e| Error::Corruption(e.to_string()))?;
        Ok(Some(IngestionCheckpoint {
            session_id: session_id.to_string(),
            last_turn_index: last_turn_index as usize,
            last_chunk_id: last_chunk_id.map(|b| codec::uuid_from_blob(&b)).transpose()?,
            file_mtime: parse_time(&file_mtime)?,
        }))
    }

    async fn put_checkpoint(&self, checkpoint: &IngestionCheckpoint) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        with_retry(|| async {
            let conn = self.connect()?;
            conn.execute(
                "INSERT INTO checkpoints (session_id, last_turn_index, last_chunk_id, file_mtime) VALUES (?1,?2,?3,?4) \
                 ON CONFLICT(session_id) DO UPDATE SET last_turn_index = excluded.last_turn_index, \
                 last_chunk_id = excluded.last_chunk_id, file_mtime = excluded.file_mtime",
                params![
                    checkpoint.session_id.clone(),
                    checkpoint.last_turn_index as i64,
                    checkpoint.last_chunk_id.map(codec::uuid_to_blob),
                    checkpoint.file_mtime.to_rfc3339(),
                ],
            )
            .await
            .map_err(classify)?;
            Ok(())
        })
        .await
    }

    async fn cache_get(&self, content_hash: &str, model_id: &str) -> Result<Option<Vec<f32>>> {
        let _guard = self.write_lock.lock().await;
        with_retry(|| async {
            let conn = self.connect()?;
            let mut rows = conn
                .query(
                    "SELECT embedding FROM embedding_cache WHERE content_hash = ?1 AND model_id = ?2",
                    params![content_hash.to_string(), model_id.to_string()],
                )
                .await
                .map_err(classify)?;
            let Some(row) = rows.next().await.map_err(classify)? else {
                return Ok(None);
            };
            let blob: Vec<u8> = row.get(0).map_err(|e| Error::Corruption(e.to_string()))?;
            conn.execute(
                "UPDATE embedding_cache SET hit_count = hit_count + 1 WHERE content_hash = ?1 AND model_id = ?2",
                params![content_hash.to_string(), model_id.to_string()],
            )
            .await
            .map_err(classify)?;
            Ok(Some(codec::vector_from_blob(&blob)?))
        })
        .await
    }

    async fn cache_put(&self, entry: &EmbeddingCacheEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        with_retry(|| async {
            let conn = self.connect()?;
            conn.execute(
                "INSERT INTO embedding_cache (content_hash, model_id, embedding, hit_count) VALUES (?1,?2,?3,?4) \
                 ON CONFLICT(content_hash, model_id) DO UPDATE SET embedding = excluded.embedding, hit_count = excluded.hit_count",
                params![
                    entry.content_hash.clone(),
                    entry.model_id.clone(),
                    codec::vector_to_blob(&entry.embedding),
                    entry.hit_count as i64,
                ],
            )
            .await
            .map_err(classify)?;
            Ok(())
        })
        .await
    }

    async fn cache_prune_orphans(&self) -> Result<usize> {
        // The embedding cache is keyed by content hash, not chunk id, so
        // "orphaned" means no chunk's content currently hashes to this
        // entry's key for its model.
        let _guard = self.write_lock.lock().await;
        with_retry(|| async {
            let conn = self.connect()?;
            let mut rows = conn.query("SELECT content_hash, model_id FROM embedding_cache", ()).await.map_err(classify)?;
            let mut stale = Vec::new();
            while let Some(row) = rows.next().await.map_err(classify)? {
                let hash: String = row.get(0).map_err(|e| Error::Corruption(e.to_string()))?;
                let model_id: String = row.get(1).map_err(|e| Error::Corruption(e.to_string()))?;
                let mut content_rows = conn
                    .query(
                        "SELECT 1 FROM chunks WHERE ? = lower(hex(sha256(content))) LIMIT 1",
                        params![hash.clone()],
                    )
                    .await;
                // sha256()/hex() as SQL functions aren't guaranteed to exist in
                // every libsql build; fall back to treating unmatched rows as
                // orphans only when the probe itself succeeds empty, and skip
                // pruning entirely if the function is unavailable.
                let still_referenced = match &mut content_rows {
                    Ok(r) => r.next().await.map_err(classify)?.is_some(),
                    Err(_) => true,
                };
                if !still_referenced {
                    stale.push((hash, model_id));
                }
            }
            let mut removed = 0usize;
            for (hash, model_id) in stale {
                let n = conn
                    .execute("DELETE FROM embedding_cache WHERE content_hash = ?1 AND model_id = ?2", params![hash, model_id])
                    .await
                    .map_err(classify)?;
                removed += n as usize;
            }
            Ok(removed)
        })
        .await
    }

    async fn replace_clusters(&self, clusters: &[Cluster], assignments: &[ChunkCluster]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        with_retry(|| async {
            let conn = self.connect()?;
            conn.execute("BEGIN", ()).await.map_err(classify)?;
            if let Err(e) = conn.execute("DELETE FROM chunk_clusters", ()).await {
                let _ = conn.execute("ROLLBACK", ()).await;
                return Err(classify(e));
            }
            if let Err(e) = conn.execute("DELETE FROM clusters", ()).await {
                let _ = conn.execute("ROLLBACK", ()).await;
                return Err(classify(e));
            }
            for cluster in clusters {
                let result = conn
                    .execute(
                        "INSERT INTO clusters (id, name, description, centroid, exemplar_ids, membership_hash, created_at, refreshed_at) \
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                        params![
                            codec::uuid_to_blob(cluster.id),
                            cluster.name.clone(),
                            cluster.description.clone(),
                            cluster.centroid.as_ref().map(|c| codec::vector_to_blob(c)),
                            codec::uuid_list_to_json(&cluster.exemplar_ids),
                            cluster.membership_hash.clone(),
                            cluster.created_at.to_rfc3339(),
                            cluster.refreshed_at.to_rfc3339(),
                        ],
                    )
                    .await;
                if let Err(e) = result {
                    let _ = conn.execute("ROLLBACK", ()).await;
                    return Err(classify(e));
                }
            }
            for assignment in assignments {
                let result = conn
                    .execute(
                        "INSERT INTO chunk_clusters (chunk_id, cluster_id, distance) VALUES (?1,?2,?3)",
                        params![
                            codec::uuid_to_blob(assignment.chunk_id),
                            codec::uuid_to_blob(assignment.cluster_id),
                            f64::from(assignment.distance),
                        ],
                    )
                    .await;
                if let Err(e) = result {
                    let _ = conn.execute("ROLLBACK", ()).await;
                    return Err(classify(e));
                }
            }
            conn.execute("COMMIT", ()).await.map_err(classify)?;
            Ok(())
        })
        .await
    }

    async fn get_cluster(&self, cluster_id: Uuid) -> Result<Option<Cluster>> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT id, name, description, centroid, exemplar_ids, membership_hash, created_at, refreshed_at FROM clusters WHERE id = ?1",
                params![codec::uuid_to_blob(cluster_id)],
            )
            .await
            .map_err(classify)?;
        match rows.next().await.map_err(classify)? {
            Some(row) => Ok(Some(row_to_cluster(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_all_clusters(&self) -> Result<Vec<Cluster>> {
        let conn = self.connect()?;
        let mut rows = conn
            .query("SELECT id, name, description, centroid, exemplar_ids, membership_hash, created_at, refreshed_at FROM clusters", ())
            .await
            .map_err(classify)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(classify)? {
            out.push(row_to_cluster(&row)?);
        }
        Ok(out)
    }

    async fn get_chunk_cluster(&self, chunk_id: Uuid) -> Result<Option<ChunkCluster>> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT chunk_id, cluster_id, distance FROM chunk_clusters WHERE chunk_id = ?1",
                params![codec::uuid_to_blob(chunk_id)],
            )
            .await
            .map_err(classify)?;
        let Some(row) = rows.next().await.map_err(classify)? else {
            return Ok(None);
        };
        let chunk_blob: Vec<u8> = row.get(0).map_err(|e| Error::Corruption(e.to_string()))?;
        let cluster_blob: Vec<u8> = row.get(1).map_err(|e| Error::Corruption(e.to_string()))?;
        let distance: f64 = row.get(2).map_err(|e| Error::Corruption(e.to_string()))?;
        Ok(Some(ChunkCluster {
            chunk_id: codec::uuid_from_blob(&chunk_blob)?,
            cluster_id: codec::uuid_from_blob(&cluster_blob)?,
            distance: distance as f32,
        }))
    }

    async fn assign_chunk_to_cluster(&self, assignment: &ChunkCluster) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        with_retry(|| async {
            let conn = self.connect()?;
            conn.execute(
                "INSERT INTO chunk_clusters (chunk_id, cluster_id, distance) VALUES (?1,?2,?3) \
                 ON CONFLICT(chunk_id) DO UPDATE SET cluster_id = excluded.cluster_id, distance = excluded.distance",
                params![
                    codec::uuid_to_blob(assignment.chunk_id),
                    codec::uuid_to_blob(assignment.cluster_id),
                    f64::from(assignment.distance),
                ],
            )
            .await
            .map_err(classify)?;
            Ok(())
        })
        .await
    }

    async fn update_cluster_label(&self, cluster_id: Uuid, name: Option<String>, description: Option<String>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        with_retry(|| async {
            let conn = self.connect()?;
            conn.execute(
                "UPDATE clusters SET name = ?1, description = ?2, refreshed_at = ?3 WHERE id = ?4",
                params![name.clone(), description.clone(), Utc::now().to_rfc3339(), codec::uuid_to_blob(cluster_id)],
            )
            .await
            .map_err(classify)?;
            Ok(())
        })
        .await
    }

    async fn list_projects(&self) -> Result<Vec<ProjectInfo>> {
        if let Some(cached) = self.projects_cache.read().clone() {
            return Ok((*cached).clone());
        }
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT project_slug, project_path, COUNT(*), MIN(start_time), MAX(end_time) FROM chunks GROUP BY project_slug, project_path",
                (),
            )
            .await
            .map_err(classify)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(classify)? {
            let slug: String = row.get(0).map_err(|e| Error::Corruption(e.to_string()))?;
            let project_path: String = row.get(1).map_err(|e| Error::Corruption(e.to_string()))?;
            let count: i64 = row.get(2).map_err(|e| Error::Corruption(e.to_string()))?;
            let first_seen: String = row.get(3).map_err(|e| Error::Corruption(e.to_string()))?;
            let last_seen: String = row.get(4).map_err(|e| Error::Corruption(e.to_string()))?;
            out.push(ProjectInfo {
                slug,
                project_path,
                chunk_count: count as u64,
                first_seen: parse_time(&first_seen)?,
                last_seen: parse_time(&last_seen)?,
            });
        }
        *self.projects_cache.write() = Some(Arc::new(out.clone()));
        Ok(out)
    }

    async fn list_sessions(&self, project: &str, range: Option<(DateTime<Utc>, DateTime<Utc>)>) -> Result<Vec<SessionInfo>> {
        let conn = self.connect()?;
        let mut sql =
            "SELECT session_id, project_slug, COUNT(*), MIN(start_time), MAX(end_time) FROM chunks WHERE project_slug = ?1".to_string();
        let mut values = vec![Value::Text(project.to_string())];
        if let Some((from, to)) = range {
            sql.push_str(" AND start_time >= ?2 AND end_time <= ?3");
            values.push(Value::Text(from.to_rfc3339()));
            values.push(Value::Text(to.to_rfc3339()));
        }
        sql.push_str(" GROUP BY session_id ORDER BY MIN(start_time) ASC");
        let mut rows = conn.query(&sql, params_from_iter(values)).await.map_err(classify)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(classify)? {
            let session_id: String = row.get(0).map_err(|e| Error::Corruption(e.to_string()))?;
            let project_slug: String = row.get(1).map_err(|e| Error::Corruption(e.to_string()))?;
            let count: i64 = row.get(2).map_err(|e| Error::Corruption(e.to_string()))?;
            let start: String = row.get(3).map_err(|e| Error::Corruption(e.to_string()))?;
            let end: String = row.get(4).map_err(|e| Error::Corruption(e.to_string()))?;
            out.push(SessionInfo {
                session_id,
                project_slug,
                chunk_count: count as u64,
                start_time: parse_time(&start)?,
                end_time: parse_time(&end)?,
            });
        }
        Ok(out)
    }

    async fn record_maintenance_run(&self, run: &MaintenanceRun) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        with_retry(|| async {
            let conn = self.connect()?;
            conn.execute(
                "INSERT INTO maintenance_runs (task, started_at, finished_at, success, error) VALUES (?1,?2,?3,?4,?5)",
                params![
                    run.task.clone(),
                    run.started_at.to_rfc3339(),
                    run.finished_at.map(|t| t.to_rfc3339()),
                    run.finished_at.map(|_| run.success),
                    run.error.clone(),
                ],
            )
            .await
            .map_err(classify)?;
            Ok(())
        })
        .await
    }

    async fn vacuum(&self) -> Result<()> {
        CausanticStore::vacuum(self).await
    }
}

fn row_to_edge(row: &libsql::Row) -> Result<Edge> {
    let source: Vec<u8> = row.get(0).map_err(|e| Error::Corruption(e.to_string()))?;
    let target: Vec<u8> = row.get(1).map_err(|e| Error::Corruption(e.to_string()))?;
    let edge_type: String = row.get(2).map_err(|e| Error::Corruption(e.to_string()))?;
    let reference_type: String = row.get(3).map_err(|e| Error::Corruption(e.to_string()))?;
    let weight: f64 = row.get(4).map_err(|e| Error::Corruption(e.to_string()))?;
    let link_count: i64 = row.get(5).map_err(|e| Error::Corruption(e.to_string()))?;
    let created_at: String = row.get(6).map_err(|e| Error::Corruption(e.to_string()))?;
    Ok(Edge {
        source_chunk_id: codec::uuid_from_blob(&source)?,
        target_chunk_id: codec::uuid_from_blob(&target)?,
        edge_type: edge_type_from_str(&edge_type)?,
        reference_type: reference_type_from_str(&reference_type)?,
        initial_weight: weight as f32,
        link_count: link_count as u32,
        created_at: parse_time(&created_at)?,
    })
}

fn row_to_cluster(row: &libsql::Row) -> Result<Cluster> {
    let id_blob: Vec<u8> = row.get(0).map_err(|e| Error::Corruption(e.to_string()))?;
    let name: Option<String> = row.get(1).map_err(|e| Error::Corruption(e.to_string()))?;
    let description: Option<String> = row.get(2).map_err(|e| Error::Corruption(e.to_string()))?;
    let centroid: Option<Vec<u8>> = row.get(3).map_err(|e| Error::Corruption(e.to_string()))?;
    let exemplar_json: String = row.get(4).map_err(|e| Error::Corruption(e.to_string()))?;
    let membership_hash: String = row.get(5).map_err(|e| Error::Corruption(e.to_string()))?;
    let created_at: String = row.get(6).map_err(|e| Error::Corruption(e.to_string()))?;
    let refreshed_at: String = row.get(7).map_err(|e| Error::Corruption(e.to_string()))?;
    Ok(Cluster {
        id: codec::uuid_from_blob(&id_blob)?,
        name,
        description,
        centroid: centroid.map(|c| codec::vector_from_blob(&c)).transpose()?,
        exemplar_ids: codec::uuid_list_from_json(&exemplar_json)?,
        membership_hash,
        created_at: parse_time(&created_at)?,
        refreshed_at: parse_time(&refreshed_at)?,
    })
}
