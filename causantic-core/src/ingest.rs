//! Drives parser -> chunker -> store/vector-index -> edge builder for one
//! session, using checkpoints to resume incrementally.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;
use uuid::Uuid;

use crate::chunker::{self, ChunkerConfig};
use crate::edges;
use crate::embedder::Embedder;
use crate::error::Result;
use crate::parser::{self, ParsedSession};
use crate::store::Store;
use crate::types::{Chunk, EmbeddingCacheEntry, IngestOutcome, IngestionCheckpoint};
use crate::vector_index::VectorIndex;

/// Model identifier recorded alongside embedding-cache entries. Fixed per
/// orchestrator instance; callers configure the embedder with the same
/// model id.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Root directory transcripts are discovered and read from.
    pub transcripts_root: PathBuf,
    /// Embedder model identifier, used as the embedding-cache key.
    pub model_id: String,
    /// Chunker configuration.
    pub chunker: ChunkerConfig,
}

/// Outcome of ingesting one session file, including sub-agents processed
/// depth-first before it.
#[derive(Debug, Clone)]
pub struct IngestReport {
    /// Session this report covers.
    pub session_id: String,
    /// Whether the file was skipped or newly ingested.
    pub outcome: IngestOutcome,
    /// Chunks newly inserted for this session.
    pub chunks_inserted: usize,
    /// Embedding-cache hits served instead of recomputation.
    pub cache_hits: usize,
    /// New embeddings computed via the external embedder.
    pub cache_misses: usize,
    /// Edges created or boosted for this session.
    pub edges_touched: usize,
    /// Reports for sub-agent transcripts processed depth-first before
    /// this session's own chunks.
    pub sub_agent_reports: Vec<IngestReport>,
}

/// Drives the full ingest pipeline for a project root.
pub struct IngestOrchestrator {
    store: Arc<dyn Store>,
    vector_index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    config: IngestConfig,
}

impl IngestOrchestrator {
    /// Builds an orchestrator over the given store, vector index,
    /// embedder, and ingest configuration.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, vector_index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>, config: IngestConfig) -> Self {
        Self {
            store,
            vector_index,
            embedder,
            config,
        }
    }

    /// Ingests one session transcript file: parse, slice unseen turns from
    /// the checkpoint, recurse into sub-agent transcripts, chunk, embed
    /// with cache, insert, build edges, and write the checkpoint.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn ingest_session_file(&self, path: &Path) -> Result<IngestReport> {
        let metadata = tokio::fs::metadata(path).await?;
        let mtime: chrono::DateTime<Utc> = metadata.modified().map_or_else(|_| Utc::now(), Into::into);

        let parsed = parser::parse_file(path).await?;

        let checkpoint = self.store.get_checkpoint(&parsed.session_id).await?;
        if let Some(cp) = &checkpoint {
            if cp.file_mtime == mtime {
                return Ok(IngestReport {
                    session_id: parsed.session_id.clone(),
                    outcome: IngestOutcome::SkippedUnchangedFile,
                    chunks_inserted: 0,
                    cache_hits: 0,
                    cache_misses: 0,
                    edges_touched: 0,
                    sub_agent_reports: Vec::new(),
                });
            }
        }

        let from_index = checkpoint.as_ref().map_or(0, |cp| cp.last_turn_index + 1);
        let new_turns = parser::turns_from(&parsed, from_index);

        // Step 3: discover and recursively process sub-agent files
        // depth-first, before this session's own chunks, so brief/debrief
        // edges never reference an absent sub-agent chunk.
        let mut sub_agent_reports = Vec::new();
        for (sub_agent_ref, _spawn_turn) in &parsed.sub_agent_refs {
            let sub_path = self.config.transcripts_root.join(sub_agent_ref);
            if tokio::fs::metadata(&sub_path).await.is_ok() {
                let report = Box::pin(self.ingest_session_file(&sub_path)).await?;
                sub_agent_reports.push(report);
            }
        }

        if new_turns.is_empty() {
            self.write_checkpoint(&parsed.session_id, from_index.saturating_sub(1), None, mtime).await?;
            return Ok(IngestReport {
                session_id: parsed.session_id.clone(),
                outcome: IngestOutcome::Ingested,
                chunks_inserted: 0,
                cache_hits: 0,
                cache_misses: 0,
                edges_touched: 0,
                sub_agent_reports,
            });
        }

        let new_chunks = chunker::pack_chunks(
            &parsed.session_id,
            &parsed.project_slug,
            &parsed.project_path,
            &new_turns,
            &self.config.chunker,
        );

        let (cache_hits, cache_misses) = self.embed_chunks(&new_chunks).await?;

        // Step 5: insert chunks and vectors in one transaction, then run
        // edge builder pass one over the session's full chunk set.
        self.store.insert_chunks(&new_chunks).await?;

        let all_chunks = self.store.get_chunks_by_session(&parsed.session_id).await?;
        let adjacency_edges = edges::build_adjacency_edges(&all_chunks, Utc::now());
        let mut edges_touched = self.store.create_or_boost_edges(&adjacency_edges).await?;

        // Step 6: brief/debrief edges for spawn/return points detected in
        // this session.
        edges_touched += self.emit_brief_debrief_edges(&parsed, &new_chunks, &sub_agent_reports).await?;

        // Step 7: cross-session edges to the previous session in the
        // same project.
        edges_touched += self.emit_cross_session_edges(&parsed, &new_chunks).await?;

        // Step 8: write the new checkpoint.
        let last_chunk_id = new_chunks.last().map(|c| c.id);
        let last_turn_index = new_turns.last().map_or(from_index.saturating_sub(1), |t| t.index);
        self.write_checkpoint(&parsed.session_id, last_turn_index, last_chunk_id, mtime).await?;

        Ok(IngestReport {
            session_id: parsed.session_id,
            outcome: IngestOutcome::Ingested,
            chunks_inserted: new_chunks.len(),
            cache_hits,
            cache_misses,
            edges_touched,
            sub_agent_reports,
        })
    }

    /// Step 4: for each new chunk, check the embedding cache, batch-embed
    /// cache misses in one call, and write new cache entries. Inserts the
    /// resulting vectors into the vector index.
    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<(usize, usize)> {
        let mut hits = 0usize;
        let mut vectors_by_id: HashMap<Uuid, Vec<f32>> = HashMap::new();
        let mut miss_ids = Vec::new();
        let mut miss_texts = Vec::new();

        for chunk in chunks {
            let hash = EmbeddingCacheEntry::hash_content(&chunk.content);
            match self.store.cache_get(&hash, &self.config.model_id).await? {
                Some(vec) => {
                    hits += 1;
                    vectors_by_id.insert(chunk.id, vec);
                }
                None => {
                    miss_ids.push(chunk.id);
                    miss_texts.push(chunk.content.clone());
                }
            }
        }

        let misses = miss_texts.len();
        if !miss_texts.is_empty() {
            let vectors = self.embedder.embed(&miss_texts, false).await?;
            for (id, vector) in miss_ids.iter().zip(vectors.into_iter()) {
                if let Some(chunk) = chunks.iter().find(|c| c.id == *id) {
                    let hash = EmbeddingCacheEntry::hash_content(&chunk.content);
                    self.store
                        .cache_put(&EmbeddingCacheEntry {
                            content_hash: hash,
                            model_id: self.config.model_id.clone(),
                            embedding: vector.clone(),
                            hit_count: 0,
                        })
                        .await?;
                }
                vectors_by_id.insert(*id, vector);
            }
        }

        // Every chunk gets a vector-index row, whether its embedding came
        // from the cache or was just computed.
        let pairs: Vec<(Uuid, Vec<f32>)> = chunks
            .iter()
            .filter_map(|c| vectors_by_id.get(&c.id).map(|v| (c.id, v.clone())))
            .collect();
        if !pairs.is_empty() {
            self.vector_index.insert_batch(&pairs).await?;
        }

        Ok((hits, misses))
    }

    async fn emit_brief_debrief_edges(
        &self,
        parsed: &ParsedSession,
        new_chunks: &[Chunk],
        sub_agent_reports: &[IngestReport],
    ) -> Result<usize> {
        let mut count = 0;
        for ((_sub_ref, spawn_turn), report) in parsed.sub_agent_refs.iter().zip(sub_agent_reports.iter()) {
            let Some(parent_chunk) = new_chunks
                .iter()
                .find(|c| c.turn_indices.contains(spawn_turn))
            else {
                continue;
            };
            let Some(sub_session_chunks) = self.sub_session_first_last(report).await? else {
                continue;
            };
            let (first_sub_chunk, last_sub_chunk) = sub_session_chunks;
            let spawn_depth = first_sub_chunk.spawn_depth;

            let (fwd, bwd) = edges::build_brief_edge(parent_chunk.id, first_sub_chunk.id, spawn_depth, Utc::now());
            count += self.store.create_or_boost_edges(&[fwd, bwd]).await?;

            if let Some(parent_next) = new_chunks
                .iter()
                .filter(|c| c.min_turn_index() > parent_chunk.min_turn_index())
                .min_by_key(Chunk::min_turn_index)
            {
                let (fwd, bwd) = edges::build_debrief_edge(last_sub_chunk.id, parent_next.id, spawn_depth, Utc::now());
                count += self.store.create_or_boost_edges(&[fwd, bwd]).await?;
            }
        }
        Ok(count)
    }

    async fn sub_session_first_last(&self, report: &IngestReport) -> Result<Option<(Chunk, Chunk)>> {
        let chunks = self.store.get_chunks_by_session(&report.session_id).await?;
        Ok(match (chunks.first(), chunks.last()) {
            (Some(first), Some(last)) => Some((first.clone(), last.clone())),
            _ => None,
        })
    }

    async fn emit_cross_session_edges(&self, parsed: &ParsedSession, new_chunks: &[Chunk]) -> Result<usize> {
        let Some(previous_session_id) = self
            .store
            .get_previous_session(&parsed.project_slug, &parsed.session_id)
            .await?
        else {
            return Ok(0);
        };
        let previous_chunks = self.store.get_chunks_by_session(&previous_session_id).await?;
        let Some(last_previous) = previous_chunks.last() else {
            return Ok(0);
        };
        let Some(first_new) = new_chunks.first() else {
            return Ok(0);
        };

        let edges = edges::build_cross_session_edges(std::slice::from_ref(last_previous), first_new, Utc::now());
        self.store.create_or_boost_edges(&edges).await
    }

    async fn write_checkpoint(&self, session_id: &str, last_turn_index: usize, last_chunk_id: Option<Uuid>, mtime: chrono::DateTime<Utc>) -> Result<()> {
        self.store
            .put_checkpoint(&IngestionCheckpoint {
                session_id: session_id.to_string(),
                last_turn_index,
                last_chunk_id,
                file_mtime: mtime,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_config_carries_model_id() {
        let config = IngestConfig {
            transcripts_root: PathBuf::from("/tmp/transcripts"),
            model_id: "test-model".to_string(),
            chunker: ChunkerConfig::default(),
        };
        assert_eq!(config.model_id, "test-model");
    }
}
