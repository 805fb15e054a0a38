//! The `Engine` facade: wires a `Store` + `VectorIndex` + `Embedder` +
//! optional `Labeler` into the seven query-API operations, plus ingest
//! and maintenance entry points. This is the one type the `causantic`
//! binary (and any other caller embedding the engine directly) talks to.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use causantic_core::api::{
    ForgetFilters, ForgetReport, ProjectInfo, QueryFilters, RankedHit, RankedHitWithChain, ReconstructSelector,
    SessionInfo, TimeRange, TokenBudget,
};
use causantic_core::embedder::Embedder;
use causantic_core::error::{Error, Result};
use causantic_core::ingest::{IngestConfig, IngestOrchestrator, IngestReport};
use causantic_core::labeler::Labeler;
use causantic_core::retriever::{RetrievalConfig, Retriever};
use causantic_core::scheduler::{CancellationToken, MaintenanceScheduler, TaskName};
use causantic_core::store::{Store, TimeRangeOptions};
use causantic_core::types::Chunk;
use causantic_core::vector_index::VectorIndex;

use crate::config::CausanticConfig;

/// Default similarity threshold for `forget`'s `query` filter, matching
/// the worked example in spec section 8.
pub const DEFAULT_FORGET_THRESHOLD: f32 = 0.6;

/// The causal-memory engine: one store, one vector index, one embedder,
/// and an optional labeler, bound together with the tunables a config
/// supplies.
pub struct Engine {
    store: Arc<dyn Store>,
    vector_index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    labeler: Option<Arc<dyn Labeler>>,
    retriever: Retriever,
    scheduler: MaintenanceScheduler,
    retrieval_config: RetrievalConfig,
    model_id: String,
}

impl Engine {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        vector_index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        labeler: Option<Arc<dyn Labeler>>,
        config: &CausanticConfig,
    ) -> Self {
        let retriever = Retriever::new(store.clone(), vector_index.clone(), embedder.clone());
        let scheduler = MaintenanceScheduler::new(store.clone(), vector_index.clone(), labeler.clone());
        let retrieval_config = RetrievalConfig {
            k: config.retrieval.k,
            mmr_lambda: config.retrieval.mmr_lambda,
            max_chain_depth: config.retrieval.max_chain_depth,
        };
        Self { store, vector_index, embedder, labeler, retriever, scheduler, retrieval_config, model_id: config.model_id.clone() }
    }

    /// `search(query, filters, k)`. `k` overrides the configured default
    /// for this call only.
    pub async fn search(&self, query: &str, filters: &QueryFilters, k: Option<usize>) -> Result<Vec<RankedHit>> {
        let config = self.config_with_k(k);
        self.retriever.search(query, filters, &config).await
    }

    /// `recall(query, filters, budget)`.
    pub async fn recall(&self, query: &str, filters: &QueryFilters, budget: TokenBudget) -> Result<Vec<RankedHitWithChain>> {
        self.retriever.recall(query, filters, budget, &self.retrieval_config).await
    }

    /// `predict(context, filters)`.
    pub async fn predict(&self, context: &str, filters: &QueryFilters) -> Result<Vec<RankedHitWithChain>> {
        self.retriever.predict(context, filters, &self.retrieval_config).await
    }

    fn config_with_k(&self, k: Option<usize>) -> RetrievalConfig {
        match k {
            Some(k) => RetrievalConfig { k, ..self.retrieval_config.clone() },
            None => self.retrieval_config.clone(),
        }
    }

    /// `list_projects() -> [{slug, chunk_count, first_seen, last_seen}]`.
    pub async fn list_projects(&self) -> Result<Vec<ProjectInfo>> {
        self.store.list_projects().await
    }

    /// `list_sessions(project, range)`.
    pub async fn list_sessions(&self, project: &str, range: Option<TimeRange>) -> Result<Vec<SessionInfo>> {
        self.store.list_sessions(project, range.map(|r| (r.from, r.to))).await
    }

    /// `reconstruct(project, selector, token_budget, keep_newest) ->
    /// chronological_chunks`.
    ///
    /// Resolves `selector` to its matching chunks, sorts them
    /// chronologically by `(start_time, min(turn_indices))`, and, if
    /// their combined `approx_tokens` exceeds `token_budget`, trims from
    /// the older end when `keep_newest` is set and from the newer end
    /// otherwise — the surviving chunks are always returned in
    /// chronological order.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if a `PreviousSession` selector names a
    /// session with no predecessor in the project.
    pub async fn reconstruct(
        &self,
        selector: &ReconstructSelector,
        token_budget: TokenBudget,
        keep_newest: bool,
    ) -> Result<Vec<Chunk>> {
        let mut chunks = self.resolve_selector(selector).await?;
        chunks.sort_by(|a, b| (a.start_time, a.turn_indices.iter().min()).cmp(&(b.start_time, b.turn_indices.iter().min())));
        Ok(trim_to_budget(chunks, token_budget, keep_newest))
    }

    async fn resolve_selector(&self, selector: &ReconstructSelector) -> Result<Vec<Chunk>> {
        match selector {
            ReconstructSelector::Session(session_id) => self.store.get_chunks_by_session(session_id).await,
            ReconstructSelector::PreviousSession { project, session_id } => {
                let previous = self.store.get_previous_session(project, session_id).await?;
                match previous {
                    Some(previous_session) => self.store.get_chunks_by_session(&previous_session).await,
                    None => Err(Error::NotFound(format!("no session precedes {session_id} in project {project}"))),
                }
            }
            ReconstructSelector::Range { project, range } => {
                self.store.get_chunks_by_time_range(project, range.from, range.to, &TimeRangeOptions::default()).await
            }
        }
    }

    /// `forget(filters) -> preview_or_deletion_report`. A `dry_run`
    /// filter computes the same report a live call would but never calls
    /// [`Store::delete_chunks`] or [`VectorIndex::delete`], satisfying
    /// the forget-preview law from spec section 8. A live call removes
    /// the candidate chunks' vectors from the vector index in the same
    /// call, so no embedding outlives its chunk (spec section 3).
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if neither `project` nor
    /// `session_id` is set (an unscoped forget has no candidate set to
    /// compute).
    pub async fn forget(&self, filters: &ForgetFilters) -> Result<ForgetReport> {
        let mut candidates = self.forget_candidates(filters).await?;

        if let Some(query) = &filters.query {
            candidates = self.filter_by_similarity(query, candidates, filters.threshold.unwrap_or(DEFAULT_FORGET_THRESHOLD)).await?;
        }

        let chunk_ids: Vec<Uuid> = candidates.iter().map(|c| c.id).collect();
        let edges_removed = self.count_touching_edges(&chunk_ids).await?;
        let cluster_assignments_removed = self.count_cluster_assignments(&chunk_ids).await?;

        if !filters.dry_run {
            self.store.delete_chunks(&chunk_ids).await?;
            self.vector_index.delete(&chunk_ids).await?;
        }

        Ok(ForgetReport { chunk_ids, edges_removed, cluster_assignments_removed, dry_run: filters.dry_run })
    }

    async fn forget_candidates(&self, filters: &ForgetFilters) -> Result<Vec<Chunk>> {
        if let Some(session_id) = &filters.session_id {
            return self.store.get_chunks_by_session(session_id).await;
        }
        let Some(project) = &filters.project else {
            return Err(Error::InvalidInput("forget requires a project or session_id filter".to_string()));
        };
        let from = filters.after.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let to = filters.before.unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.store.get_chunks_by_time_range(project, from, to, &TimeRangeOptions::default()).await
    }

    async fn filter_by_similarity(&self, query: &str, candidates: Vec<Chunk>, threshold: f32) -> Result<Vec<Chunk>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }
        let query_vectors = self.embedder.embed(&[query.to_string()], true).await?;
        let query_vector = query_vectors.into_iter().next().unwrap_or_default();
        let candidate_ids: Vec<Uuid> = candidates.iter().map(|c| c.id).collect();
        let scored = self.vector_index.knn(&query_vector, candidate_ids.len(), Some(&candidate_ids)).await?;
        let kept: HashSet<Uuid> = scored.into_iter().filter(|(_, score)| *score >= threshold).map(|(id, _)| id).collect();
        Ok(candidates.into_iter().filter(|c| kept.contains(&c.id)).collect())
    }

    async fn count_touching_edges(&self, chunk_ids: &[Uuid]) -> Result<usize> {
        let mut seen = HashSet::new();
        for &id in chunk_ids {
            for edge in self.store.get_edges_for_chunk(id, None).await? {
                let is_forward = edge.edge_type == causantic_core::types::EdgeType::Forward;
                seen.insert((edge.source_chunk_id, edge.target_chunk_id, is_forward, edge.reference_type));
            }
        }
        Ok(seen.len())
    }

    async fn count_cluster_assignments(&self, chunk_ids: &[Uuid]) -> Result<usize> {
        let mut count = 0usize;
        for &id in chunk_ids {
            if self.store.get_chunk_cluster(id).await?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Ingests one session transcript file, delegating to
    /// [`IngestOrchestrator`] with the engine's configured chunker
    /// settings.
    pub async fn ingest_session_file(&self, path: &Path, chunker: causantic_core::chunker::ChunkerConfig) -> Result<IngestReport> {
        let orchestrator = IngestOrchestrator::new(
            self.store.clone(),
            self.vector_index.clone(),
            self.embedder.clone(),
            IngestConfig { transcripts_root: path.parent().map(Path::to_path_buf).unwrap_or_default(), model_id: self.model_id.clone(), chunker },
        );
        orchestrator.ingest_session_file(path).await
    }

    /// Runs one named maintenance task to completion, returning the
    /// number of items it touched (always `0` for `vacuum`, which
    /// returns no count of its own).
    pub async fn run_maintenance(&self, task: TaskName, cancel: &CancellationToken) -> Result<usize> {
        match task {
            TaskName::PruneGraph => self.scheduler.prune_graph(cancel).await,
            TaskName::UpdateClusters => self.scheduler.update_clusters(cancel).await,
            TaskName::RefreshLabels => self.scheduler.refresh_labels(cancel).await,
            TaskName::Vacuum => self.scheduler.vacuum().await.map(|()| 0),
            TaskName::ScanProjects => Err(Error::InvalidInput(
                "scan-projects requires a transcripts root; use the ingest subcommand directly".to_string(),
            )),
        }
    }

    #[must_use]
    pub fn labeler(&self) -> Option<&Arc<dyn Labeler>> {
        self.labeler.as_ref()
    }
}

/// Drops chunks from the older end (`keep_newest`) or the newer end
/// (otherwise) of a chronologically sorted slice until the remainder's
/// combined `approx_tokens` fits within `budget`.
fn trim_to_budget(chunks: Vec<Chunk>, budget: TokenBudget, keep_newest: bool) -> Vec<Chunk> {
    let total: u32 = chunks.iter().map(|c| c.approx_tokens).sum();
    if total <= budget.max_tokens {
        return chunks;
    }

    let mut kept = Vec::with_capacity(chunks.len());
    let mut spent = 0u32;
    let iter: Box<dyn Iterator<Item = Chunk>> = if keep_newest { Box::new(chunks.into_iter().rev()) } else { Box::new(chunks.into_iter()) };
    for chunk in iter {
        if spent.saturating_add(chunk.approx_tokens) > budget.max_tokens && !kept.is_empty() {
            break;
        }
        spent += chunk.approx_tokens;
        kept.push(chunk);
    }
    if keep_newest {
        kept.reverse();
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid as UuidGen;

    fn chunk_at(turn: usize, tokens: u32, base: DateTime<Utc>) -> Chunk {
        Chunk {
            id: UuidGen::new_v4(),
            session_id: "s".to_string(),
            project_slug: "p".to_string(),
            project_path: "/p".to_string(),
            turn_indices: vec![turn],
            start_time: base + Duration::seconds(turn as i64),
            end_time: base + Duration::seconds(turn as i64),
            content: "x".to_string(),
            approx_tokens: tokens,
            code_block_count: 0,
            tool_use_count: 0,
            agent_id: None,
            spawn_depth: 0,
            vector_clock: Vec::new(),
            created_at: base,
        }
    }

    #[test]
    fn trim_keeps_everything_within_budget() {
        let base = Utc::now();
        let chunks = vec![chunk_at(0, 10, base), chunk_at(1, 10, base)];
        let trimmed = trim_to_budget(chunks, TokenBudget { max_tokens: 100 }, true);
        assert_eq!(trimmed.len(), 2);
    }

    #[test]
    fn trim_keep_newest_drops_oldest_first() {
        let base = Utc::now();
        let chunks = vec![chunk_at(0, 10, base), chunk_at(1, 10, base), chunk_at(2, 10, base)];
        let trimmed = trim_to_budget(chunks, TokenBudget { max_tokens: 15 }, true);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].turn_indices, vec![2]);
    }

    #[test]
    fn trim_keep_oldest_drops_newest_first() {
        let base = Utc::now();
        let chunks = vec![chunk_at(0, 10, base), chunk_at(1, 10, base), chunk_at(2, 10, base)];
        let trimmed = trim_to_budget(chunks, TokenBudget { max_tokens: 15 }, false);
        assert_eq!(trimmed.len(), 1);
        assert_eq!(trimmed[0].turn_indices, vec![0]);
    }

    #[test]
    fn trim_always_keeps_at_least_one_chunk() {
        let base = Utc::now();
        let chunks = vec![chunk_at(0, 500, base)];
        let trimmed = trim_to_budget(chunks, TokenBudget { max_tokens: 1 }, true);
        assert_eq!(trimmed.len(), 1);
    }
}
