//! Maintenance scheduler: five named background tasks, each serialized,
//! cancellable between safe points, and recorded via
//! [`crate::store::MaintenanceRun`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

use crate::clusterer::{self, ClustererConfig};
use crate::error::Result;
use crate::labeler::{Labeler, RateLimiter};
use crate::store::{MaintenanceRun, Store};
use crate::vector_index::VectorIndex;

/// One of the five named maintenance tasks, run on a cron-style schedule
/// or on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskName {
    /// Discover new transcripts and enqueue them for ingest.
    ScanProjects,
    /// Remove dangling edges, orphaned chunks, and orphaned embeddings.
    PruneGraph,
    /// Rerun the offline clusterer over the full corpus.
    UpdateClusters,
    /// Re-label clusters whose membership changed or lack a description.
    RefreshLabels,
    /// Compact the store.
    Vacuum,
}

impl TaskName {
    /// The task's name as recorded in [`MaintenanceRun::task`].
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScanProjects => "scan-projects",
            Self::PruneGraph => "prune-graph",
            Self::UpdateClusters => "update-clusters",
            Self::RefreshLabels => "refresh-labels",
            Self::Vacuum => "vacuum",
        }
    }
}

/// A cooperative cancellation flag, checked between chunks, between
/// batches, or between cluster selections.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Builds a fresh, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Requests cancellation of the task holding this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Discovers candidate transcript files under a root, for the
/// `scan-projects` task. The scheduler does not itself walk the
/// filesystem or drive ingest; callers supply this and an ingest
/// callback so the scheduler stays storage-agnostic.
pub trait ProjectScanner: Send + Sync {
    /// Returns paths to transcript files not yet known to the store.
    fn discover(&self) -> Result<Vec<std::path::PathBuf>>;
}

/// Drives the five named maintenance tasks. Each task is serialized via
/// its own mutex so concurrent callers queue rather than race.
pub struct MaintenanceScheduler {
    store: Arc<dyn Store>,
    vector_index: Arc<dyn VectorIndex>,
    labeler: Option<Arc<dyn Labeler>>,
    rate_limiter: RateLimiter,
    clusterer_config: ClustererConfig,
    locks: HashMap<&'static str, Mutex<()>>,
}

impl MaintenanceScheduler {
    /// Builds a scheduler over the given store, vector index, and
    /// optional labeler (absent if no labeler is configured, in which
    /// case `refresh-labels` is a no-op).
    #[must_use]
    pub fn new(store: Arc<dyn Store>, vector_index: Arc<dyn VectorIndex>, labeler: Option<Arc<dyn Labeler>>) -> Self {
        let mut locks = HashMap::new();
        for task in [
            TaskName::ScanProjects,
            TaskName::PruneGraph,
            TaskName::UpdateClusters,
            TaskName::RefreshLabels,
            TaskName::Vacuum,
        ] {
            locks.insert(task.as_str(), Mutex::new(()));
        }
        Self {
            store,
            vector_index,
            labeler,
            rate_limiter: RateLimiter::default_refresh_labels_limit(),
            clusterer_config: ClustererConfig::default(),
            locks,
        }
    }

    async fn run_recorded<F, Fut>(&self, task: TaskName, body: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let _guard = self.locks[task.as_str()].lock().await;
        let started_at = Utc::now();
        let result = body().await;
        let finished_at = Utc::now();
        let run = MaintenanceRun {
            task: task.as_str().to_string(),
            started_at,
            finished_at: Some(finished_at),
            success: result.is_ok(),
            error: result.as_ref().err().map(ToString::to_string),
        };
        self.store.record_maintenance_run(&run).await?;
        result
    }

    /// Runs `prune-graph`: dangling edges, chunks whose session was
    /// deleted, vectors with no remaining chunk, then orphaned cache
    /// entries. Each step is a safe point the cancellation token is
    /// checked at.
    #[instrument(skip(self))]
    pub async fn prune_graph(&self, cancel: &CancellationToken) -> Result<usize> {
        let mut removed = 0usize;
        self.run_recorded(TaskName::PruneGraph, || async {
            removed += self.store.prune_dangling_edges().await?;
            if cancel.is_cancelled() {
                return Ok(());
            }

            let orphaned_chunk_ids = self.store.prune_orphaned_chunks().await?;
            removed += orphaned_chunk_ids.len();
            if !orphaned_chunk_ids.is_empty() {
                self.vector_index.delete(&orphaned_chunk_ids).await?;
            }
            if cancel.is_cancelled() {
                return Ok(());
            }

            removed += self.prune_orphaned_vectors().await?;
            if cancel.is_cancelled() {
                return Ok(());
            }

            removed += self.store.cache_prune_orphans().await?;
            Ok(())
        })
        .await?;
        Ok(removed)
    }

    /// Sweeps the vector index for ids with no corresponding chunk row,
    /// which arise whenever a chunk is deleted through a path that
    /// doesn't also call `VectorIndex::delete` for it, and removes them.
    /// Returns the number of vectors removed.
    async fn prune_orphaned_vectors(&self) -> Result<usize> {
        let vector_ids: Vec<Uuid> = self.vector_index.get_all().await?.into_iter().map(|(id, _)| id).collect();
        if vector_ids.is_empty() {
            return Ok(0);
        }
        let existing: std::collections::HashSet<Uuid> =
            self.store.get_chunks_by_ids(&vector_ids).await?.into_iter().map(|c| c.id).collect();
        let dangling: Vec<Uuid> = vector_ids.into_iter().filter(|id| !existing.contains(id)).collect();
        if dangling.is_empty() {
            return Ok(0);
        }
        self.vector_index.delete(&dangling).await
    }

    /// Runs `update-clusters`: rebuilds clusters over every embedding
    /// currently in the vector index and replaces the store's cluster
    /// tables in one transaction.
    #[instrument(skip(self))]
    pub async fn update_clusters(&self, cancel: &CancellationToken) -> Result<usize> {
        let mut cluster_count = 0usize;
        self.run_recorded(TaskName::UpdateClusters, || async {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let points = self.vector_index.get_all().await?;
            let ids: Vec<Uuid> = points.iter().map(|(id, _)| *id).collect();
            let chunks = self.store.get_chunks_by_ids(&ids).await?;
            let chunks_by_id: HashMap<Uuid, &crate::types::Chunk> = chunks.iter().map(|c| (c.id, c)).collect();

            let (clusters, assignments) = clusterer::rebuild(&points, &chunks_by_id, &self.clusterer_config);
            cluster_count = clusters.len();
            self.store.replace_clusters(&clusters, &assignments).await?;
            Ok(())
        })
        .await?;
        Ok(cluster_count)
    }

    /// Runs `refresh-labels`: re-labels every cluster missing a
    /// description, subject to the configured rate limit. Absent a
    /// configured labeler, this is a no-op.
    #[instrument(skip(self))]
    pub async fn refresh_labels(&self, cancel: &CancellationToken) -> Result<usize> {
        let Some(labeler) = self.labeler.clone() else {
            return Ok(0);
        };
        let mut refreshed = 0usize;
        self.run_recorded(TaskName::RefreshLabels, || async {
            let clusters = self.store.get_all_clusters().await?;
            for cluster in clusters {
                if cancel.is_cancelled() {
                    break;
                }
                if !cluster.needs_label_refresh(&cluster.membership_hash) {
                    continue;
                }
                if !self.rate_limiter.try_acquire() {
                    break;
                }
                let exemplar_chunks = self.store.get_chunks_by_ids(&cluster.exemplar_ids).await?;
                let exemplar_texts: Vec<String> = exemplar_chunks.into_iter().map(|c| c.content).collect();
                if exemplar_texts.is_empty() {
                    continue;
                }
                match labeler.label(cluster.id, &exemplar_texts, 512).await {
                    Ok(label) => {
                        self.store
                            .update_cluster_label(cluster.id, Some(label.name), Some(label.description))
                            .await?;
                        refreshed += 1;
                    }
                    Err(_) => continue,
                }
            }
            Ok(())
        })
        .await?;
        Ok(refreshed)
    }

    /// Runs `vacuum`: compacts the store.
    #[instrument(skip(self))]
    pub async fn vacuum(&self) -> Result<()> {
        self.run_recorded(TaskName::Vacuum, || async { self.store.vacuum().await }).await
    }

    /// Runs `scan-projects` using the given scanner, returning discovered
    /// paths for the caller's ingest orchestrator to process. The
    /// scheduler itself does not drive ingest; it only records the scan.
    #[instrument(skip(self, scanner))]
    pub async fn scan_projects(&self, scanner: &dyn ProjectScanner) -> Result<Vec<std::path::PathBuf>> {
        let mut discovered = Vec::new();
        self.run_recorded(TaskName::ScanProjects, || async {
            discovered = scanner.discover()?;
            Ok(())
        })
        .await?;
        Ok(discovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_names_match_spec_identifiers() {
        assert_eq!(TaskName::ScanProjects.as_str(), "scan-projects");
        assert_eq!(TaskName::PruneGraph.as_str(), "prune-graph");
        assert_eq!(TaskName::UpdateClusters.as_str(), "update-clusters");
        assert_eq!(TaskName::RefreshLabels.as_str(), "refresh-labels");
        assert_eq!(TaskName::Vacuum.as_str(), "vacuum");
    }

    #[test]
    fn cancellation_token_reflects_cancel_call() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancellation_token_clone_shares_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
