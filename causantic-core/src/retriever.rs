//! The hybrid retrieval pipeline: dense + BM25 + cluster expansion, RRF
//! fusion, MMR rerank, and optional causal-chain expansion.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::api::{ChainDirection, ChainLink, HitSource, QueryFilters, RankedHit, RankedHitWithChain, TokenBudget};
use crate::embedder::Embedder;
use crate::error::Result;
use crate::store::Store;
use crate::types::{Chunk, EdgeType};
use crate::vector_index::{cosine_similarity, VectorIndex};

/// RRF's rank-offset constant.
pub const RRF_K: f32 = 60.0;

/// Default result budget when the caller doesn't specify one.
pub const DEFAULT_K: usize = 10;

/// Default MMR trade-off between relevance and diversity.
pub const DEFAULT_MMR_LAMBA: f32 = 0.7;

/// Default maximum causal-chain walk depth (spec allows 15-50; the
/// engine uses the lower bound as a predictable default).
pub const DEFAULT_MAX_CHAIN_DEPTH: u32 = 15;

/// Hop at which backward-walk (recall mode) decay reaches zero.
const BACKWARD_DECAY_DEATH_HOP: u32 = 10;

/// Hops for which forward-walk (predict mode) decay stays flat before
/// beginning its linear decline.
const FORWARD_DECAY_FLAT_HOPS: u32 = 5;

/// Hop at which forward-walk decay reaches zero.
const FORWARD_DECAY_DEATH_HOP: u32 = 20;

/// Tunable weights for one retrieval call.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Number of final results requested.
    pub k: usize,
    /// MMR relevance/diversity trade-off.
    pub mmr_lambda: f32,
    /// Maximum causal-chain walk depth.
    pub max_chain_depth: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            mmr_lambda: DEFAULT_MMR_LAMBA,
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
        }
    }
}

/// Orchestrates vector search, lexical search, cluster expansion, fusion,
/// MMR rerank, and causal-chain walk against a [`Store`] + [`VectorIndex`]
/// + [`Embedder`].
pub struct Retriever {
    store: Arc<dyn Store>,
    vector_index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
}

struct RankedList {
    source: HitSource,
    // chunk_id -> (1-based rank, raw score)
    entries: Vec<(Uuid, f32)>,
}

impl Retriever {
    /// Builds a retriever over the given store, vector index, and
    /// embedder.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, vector_index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            vector_index,
            embedder,
        }
    }

    /// Stage 1: dense vector KNN over `k_v = 3k` neighbors, optionally
    /// filtered to one project's chunk ids.
    async fn vector_search(&self, query_vector: &[f32], filters: &QueryFilters, k: usize) -> Result<RankedList> {
        let filter_ids = match &filters.project {
            Some(project) => Some(self.project_chunk_ids(project).await?),
            None => None,
        };
        let hits = self.vector_index.knn(query_vector, 3 * k, filter_ids.as_deref()).await?;
        Ok(RankedList {
            source: HitSource::Vector,
            entries: hits,
        })
    }

    /// Collects every chunk id belonging to `project`, used to scope
    /// vector KNN when a project filter is set.
    async fn project_chunk_ids(&self, project: &str) -> Result<Vec<Uuid>> {
        let sessions = self.store.list_sessions(project, None).await?;
        let mut ids = Vec::new();
        for session in sessions {
            let chunks = self.store.get_chunks_by_session(&session.session_id).await?;
            ids.extend(chunks.into_iter().map(|c| c.id));
        }
        Ok(ids)
    }

    /// Stage 2: lexical FTS search over `k_l = 3k`. BM25 scores are
    /// ascending (lower is better); we keep them as-is for ranking and
    /// invert only when computing a similarity-like score for MMR.
    async fn lexical_search(&self, query: &str, filters: &QueryFilters, k: usize) -> Result<RankedList> {
        let hits = self
            .store
            .fts_search(query, 3 * k, filters.project.as_deref())
            .await
            .unwrap_or_default();
        Ok(RankedList {
            source: HitSource::Keyword,
            entries: hits,
        })
    }

    /// Stage 3: cluster expansion. For each of the top vector hits, looks
    /// up its cluster, scores the cluster's centroid against the query,
    /// and surfaces up to `k` representative chunks not already present
    /// in the vector/keyword lists.
    async fn cluster_expansion(
        &self,
        query_vector: &[f32],
        vector_hits: &[Uuid],
        already_present: &HashSet<Uuid>,
        filters: &QueryFilters,
        k: usize,
    ) -> Result<RankedList> {
        let mut cluster_ids = HashSet::new();
        for chunk_id in vector_hits {
            if let Some(assignment) = self.store.get_chunk_cluster(*chunk_id).await? {
                cluster_ids.insert(assignment.cluster_id);
            }
        }

        let mut scored_clusters: Vec<(Uuid, f32)> = Vec::new();
        for cluster_id in cluster_ids {
            if let Some(cluster) = self.store.get_cluster(cluster_id).await? {
                if let Some(centroid) = &cluster.centroid {
                    scored_clusters.push((cluster_id, cosine_similarity(query_vector, centroid)));
                }
            }
        }
        scored_clusters.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut entries = Vec::new();
        'outer: for (cluster_id, cluster_sim) in scored_clusters {
            let Some(cluster) = self.store.get_cluster(cluster_id).await? else {
                continue;
            };
            for exemplar_id in &cluster.exemplar_ids {
                if already_present.contains(exemplar_id) {
                    continue;
                }
                if let Some(project) = &filters.project {
                    let chunks = self.store.get_chunks_by_ids(&[*exemplar_id]).await?;
                    if chunks.first().is_none_or(|c| &c.project_slug != project) {
                        continue;
                    }
                }
                entries.push((*exemplar_id, cluster_sim));
                if entries.len() >= k {
                    break 'outer;
                }
            }
        }

        Ok(RankedList {
            source: HitSource::Cluster,
            entries,
        })
    }

    /// Stage 4: reciprocal-rank fusion across the three candidate lists.
    /// `RRF(d) = sum_i 1 / (RRF_K + rank_i(d))`, ranks 1-based, absent
    /// lists contribute zero. Ties are broken by ascending `start_time`
    /// per the tie-policy testable property.
    async fn fuse(&self, lists: &[RankedList]) -> Result<Vec<(Uuid, f32, HitSource)>> {
        let mut rrf_scores: HashMap<Uuid, f32> = HashMap::new();
        let mut first_source: HashMap<Uuid, HitSource> = HashMap::new();

        for list in lists {
            for (rank0, (chunk_id, _score)) in list.entries.iter().enumerate() {
                let rank = (rank0 + 1) as f32;
                *rrf_scores.entry(*chunk_id).or_insert(0.0) += 1.0 / (RRF_K + rank);
                first_source.entry(*chunk_id).or_insert(list.source);
            }
        }

        let ids: Vec<Uuid> = rrf_scores.keys().copied().collect();
        let chunks = self.store.get_chunks_by_ids(&ids).await?;
        let start_times: HashMap<Uuid, chrono::DateTime<chrono::Utc>> =
            chunks.iter().map(|c| (c.id, c.start_time)).collect();

        let mut fused: Vec<(Uuid, f32, HitSource)> = rrf_scores
            .into_iter()
            .map(|(id, score)| (id, score, first_source.get(&id).copied().unwrap_or(HitSource::Vector)))
            .collect();
        fused.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ta = start_times.get(&a.0);
                    let tb = start_times.get(&b.0);
                    ta.cmp(&tb)
                })
        });
        Ok(fused)
    }

    /// Stage 5: greedy MMR rerank from the fused top `3k`, picking `k`
    /// items maximizing `lambda * sim(query, d) - (1 - lambda) *
    /// max_{d' in picked} sim(d, d')`.
    async fn mmr_rerank(
        &self,
        query_vector: &[f32],
        candidates: &[(Uuid, f32, HitSource)],
        k: usize,
        lambda: f32,
    ) -> Result<Vec<(Uuid, f32, HitSource)>> {
        let top: Vec<&(Uuid, f32, HitSource)> = candidates.iter().take(3 * k).collect();
        let ids: Vec<Uuid> = top.iter().map(|(id, ..)| *id).collect();

        let mut embeddings = HashMap::new();
        for id in &ids {
            if let Some(vec) = self.vector_index.get(*id).await? {
                embeddings.insert(*id, vec);
            }
        }

        let relevance: HashMap<Uuid, f32> = ids
            .iter()
            .filter_map(|id| embeddings.get(id).map(|v| (*id, cosine_similarity(query_vector, v))))
            .collect();

        let mut remaining: Vec<&(Uuid, f32, HitSource)> = top;
        let mut picked: Vec<(Uuid, f32, HitSource)> = Vec::with_capacity(k);

        while picked.len() < k && !remaining.is_empty() {
            let mut best_idx = 0;
            let mut best_score = f32::MIN;
            for (idx, candidate) in remaining.iter().enumerate() {
                let rel = relevance.get(&candidate.0).copied().unwrap_or(0.0);
                let max_sim_to_picked = picked
                    .iter()
                    .filter_map(|(pid, ..)| {
                        let a = embeddings.get(&candidate.0)?;
                        let b = embeddings.get(pid)?;
                        Some(cosine_similarity(a, b))
                    })
                    .fold(0.0f32, f32::max);
                let mmr = lambda * rel - (1.0 - lambda) * max_sim_to_picked;
                if mmr > best_score {
                    best_score = mmr;
                    best_idx = idx;
                }
            }
            let chosen = remaining.remove(best_idx);
            picked.push((chosen.0, best_score.max(chosen.1), chosen.2));
        }

        Ok(picked)
    }

    /// Builds ranked hits with previews, looking chunks up by id.
    async fn to_ranked_hits(&self, scored: &[(Uuid, f32, HitSource)]) -> Result<Vec<RankedHit>> {
        let ids: Vec<Uuid> = scored.iter().map(|(id, ..)| *id).collect();
        let chunks = self.store.get_chunks_by_ids(&ids).await?;
        let by_id: HashMap<Uuid, &Chunk> = chunks.iter().map(|c| (c.id, c)).collect();

        Ok(scored
            .iter()
            .filter_map(|(id, score, source)| {
                by_id.get(id).map(|chunk| RankedHit {
                    chunk_id: *id,
                    final_score: *score,
                    source: *source,
                    preview: chunk.preview(160),
                })
            })
            .collect())
    }

    /// `search(query, filters, k)`: stages 1-5, no causal expansion.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, filters: &QueryFilters, config: &RetrievalConfig) -> Result<Vec<RankedHit>> {
        let query_vectors = self.embedder.embed(&[query.to_string()], true).await?;
        let query_vector = query_vectors.into_iter().next().unwrap_or_default();

        let vector_list = self.vector_search(&query_vector, filters, config.k).await?;
        let lexical_list = self.lexical_search(query, filters, config.k).await?;

        let mut already_present: HashSet<Uuid> = vector_list.entries.iter().map(|(id, _)| *id).collect();
        already_present.extend(lexical_list.entries.iter().map(|(id, _)| *id));

        let vector_ids: Vec<Uuid> = vector_list.entries.iter().map(|(id, _)| *id).collect();

        let mut lists = vec![vector_list, lexical_list];
        if !filters.skip_clusters {
            if let Ok(cluster_list) = self
                .cluster_expansion(&query_vector, &vector_ids, &already_present, filters, config.k)
                .await
            {
                lists.push(cluster_list);
            }
        }

        let fused = self.fuse(&lists).await?;
        let reranked = self.mmr_rerank(&query_vector, &fused, config.k, config.mmr_lambda).await?;
        self.to_ranked_hits(&reranked).await
    }

    /// `recall(query, filters, budget)`: `search` followed by a bounded
    /// backward causal-chain walk with linear hop decay dying at
    /// [`BACKWARD_DECAY_DEATH_HOP`].
    #[instrument(skip(self))]
    pub async fn recall(&self, query: &str, filters: &QueryFilters, budget: TokenBudget, config: &RetrievalConfig) -> Result<Vec<RankedHitWithChain>> {
        let hits = self.search(query, filters, config).await?;
        let mut out = Vec::with_capacity(hits.len());
        let mut spent = 0u32;

        for hit in hits {
            let chain = if spent < budget.max_tokens {
                self.walk_chain(hit.chunk_id, ChainDirection::Backward, config.max_chain_depth, &mut spent, budget)
                    .await
                    .unwrap_or_default()
            } else {
                Vec::new()
            };
            out.push(RankedHitWithChain { hit, chain });
        }
        Ok(out)
    }

    /// `predict(context, filters)`: same fusion pipeline seeded by
    /// `context`, followed by a forward causal-chain walk with
    /// delayed-linear decay (flat for [`FORWARD_DECAY_FLAT_HOPS`], then
    /// linear to zero by [`FORWARD_DECAY_DEATH_HOP`]).
    #[instrument(skip(self))]
    pub async fn predict(&self, context: &str, filters: &QueryFilters, config: &RetrievalConfig) -> Result<Vec<RankedHitWithChain>> {
        let hits = self.search(context, filters, config).await?;
        let mut out = Vec::with_capacity(hits.len());
        let mut spent = 0u32;

        for hit in hits {
            let chain = self
                .walk_chain(hit.chunk_id, ChainDirection::Forward, config.max_chain_depth, &mut spent, TokenBudget { max_tokens: u32::MAX })
                .await
                .unwrap_or_default();
            out.push(RankedHitWithChain { hit, chain });
        }
        Ok(out)
    }

    /// Stage 6: breadth-first causal-chain walk from `seed_id`, applying
    /// hop decay per [`ChainDirection`] and stopping at `max_depth` or
    /// when the token budget is exhausted. Tie-break among equally-ranked
    /// candidates is higher weight, then higher score, then earlier
    /// `start_time`.
    async fn walk_chain(
        &self,
        seed_id: Uuid,
        direction: ChainDirection,
        max_depth: u32,
        spent_tokens: &mut u32,
        budget: TokenBudget,
    ) -> Result<Vec<ChainLink>> {
        let edge_type = match direction {
            ChainDirection::Backward => EdgeType::Backward,
            ChainDirection::Forward => EdgeType::Forward,
        };

        let mut visited = HashSet::from([seed_id]);
        let mut queue = VecDeque::from([(seed_id, 0u32)]);
        let mut links = Vec::new();

        while let Some((current_id, hop)) = queue.pop_front() {
            if hop >= max_depth {
                continue;
            }
            if budget.is_exhausted(*spent_tokens) {
                break;
            }

            let edges = self.store.get_edges_for_chunk(current_id, Some(edge_type)).await?;
            let mut candidates: Vec<_> = edges
                .into_iter()
                .filter(|e| !visited.contains(&e.target_chunk_id))
                .collect();
            candidates.sort_by(|a, b| {
                b.initial_weight
                    .partial_cmp(&a.initial_weight)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            for edge in candidates {
                if visited.contains(&edge.target_chunk_id) {
                    continue;
                }
                visited.insert(edge.target_chunk_id);
                let next_hop = hop + 1;
                let decay = hop_decay(direction, next_hop);
                if decay <= 0.0 {
                    continue;
                }
                let decayed_score = edge.initial_weight * decay;

                if let Some(chunk) = self.store.get_chunks_by_ids(&[edge.target_chunk_id]).await?.into_iter().next() {
                    *spent_tokens += chunk.approx_tokens;
                }

                links.push(ChainLink {
                    chunk_id: edge.target_chunk_id,
                    hop: next_hop,
                    edge_weight: edge.initial_weight,
                    decayed_score,
                });
                queue.push_back((edge.target_chunk_id, next_hop));

                if budget.is_exhausted(*spent_tokens) {
                    break;
                }
            }
        }

        Ok(links)
    }
}

/// Hop-decay multiplier for a walked chunk at `hop` distance from the
/// seed, per direction:
/// - backward (recall mode): linear, dying at [`BACKWARD_DECAY_DEATH_HOP`].
/// - forward (predict mode): flat for [`FORWARD_DECAY_FLAT_HOPS`] hops,
///   then linear to zero by [`FORWARD_DECAY_DEATH_HOP`].
#[must_use]
pub fn hop_decay(direction: ChainDirection, hop: u32) -> f32 {
    match direction {
        ChainDirection::Backward => {
            if hop >= BACKWARD_DECAY_DEATH_HOP {
                0.0
            } else {
                1.0 - (hop as f32 / BACKWARD_DECAY_DEATH_HOP as f32)
            }
        }
        ChainDirection::Forward => {
            if hop <= FORWARD_DECAY_FLAT_HOPS {
                1.0
            } else if hop >= FORWARD_DECAY_DEATH_HOP {
                0.0
            } else {
                let span = (FORWARD_DECAY_DEATH_HOP - FORWARD_DECAY_FLAT_HOPS) as f32;
                1.0 - ((hop - FORWARD_DECAY_FLAT_HOPS) as f32 / span)
            }
        }
    }
}
