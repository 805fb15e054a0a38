//! [`PackedVectorIndex`]: the concrete [`VectorIndex`] backing the
//! engine. State lives entirely in memory behind a `parking_lot::RwLock`
//! and is mirrored to a single packed file on disk; blocking file I/O is
//! pushed onto `spawn_blocking` and bounded by a timeout, the same shape
//! the teacher used to keep its redb calls off the async runtime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use causantic_core::error::{Error, Result};
use causantic_core::vector_index::{cosine_similarity, VectorIndex};

use crate::format;
use crate::persistence::{PersistenceConfig, PersistenceManager};

const IO_TIMEOUT: Duration = Duration::from_secs(10);

struct IndexState {
    dimension: Option<usize>,
    ids: Vec<Uuid>,
    vectors: Vec<f32>,
    positions: HashMap<Uuid, usize>,
}

impl IndexState {
    fn empty() -> Self {
        Self {
            dimension: None,
            ids: Vec::new(),
            vectors: Vec::new(),
            positions: HashMap::new(),
        }
    }

    fn from_decoded(decoded: format::Decoded) -> Self {
        let dimension = if decoded.ids.is_empty() { None } else { Some(decoded.dimension) };
        let positions = decoded.ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        Self {
            dimension,
            ids: decoded.ids,
            vectors: decoded.vectors,
            positions,
        }
    }

    fn row(&self, position: usize) -> &[f32] {
        let dim = self.dimension.unwrap_or(0);
        &self.vectors[position * dim..(position + 1) * dim]
    }

    fn upsert(&mut self, id: Uuid, vector: Vec<f32>) -> Result<()> {
        let dim = *self.dimension.get_or_insert(vector.len());
        if vector.len() != dim {
            return Err(Error::Corruption(format!(
                "embedding dimension {} does not match index dimension {dim}",
                vector.len()
            )));
        }
        if let Some(&position) = self.positions.get(&id) {
            self.vectors[position * dim..(position + 1) * dim].copy_from_slice(&vector);
        } else {
            let position = self.ids.len();
            self.ids.push(id);
            self.vectors.extend_from_slice(&vector);
            self.positions.insert(id, position);
        }
        Ok(())
    }

    fn remove(&mut self, id: Uuid) -> bool {
        let Some(position) = self.positions.remove(&id) else {
            return false;
        };
        let dim = self.dimension.unwrap_or(0);
        let last = self.ids.len() - 1;
        if position != last {
            self.ids.swap(position, last);
            let moved_id = self.ids[position];
            self.positions.insert(moved_id, position);
            let (head, tail) = self.vectors.split_at_mut(last * dim);
            head[position * dim..(position + 1) * dim].copy_from_slice(&tail[..dim]);
        }
        self.ids.pop();
        self.vectors.truncate(self.ids.len() * dim);
        true
    }
}

/// A persistent, file-backed dense-vector store keyed by chunk id. Exact
/// brute-force cosine KNN over an in-memory packed matrix, flushed to a
/// single file on a background interval and on explicit [`Self::flush`].
pub struct PackedVectorIndex {
    state: Arc<RwLock<IndexState>>,
    dirty: Arc<AtomicBool>,
    persistence: PersistenceManager,
}

impl PackedVectorIndex {
    /// Opens (or creates) the packed vector file at `path`, loading any
    /// existing contents synchronously before returning, and starts the
    /// background persistence task.
    ///
    /// # Errors
    /// Returns [`Error::Corruption`] if an existing file fails to parse,
    /// or [`Error::Io`] if the file can't be read.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if tokio::fs::try_exists(&path).await? {
            let bytes = Self::read_file(&path).await?;
            IndexState::from_decoded(format::decode(&bytes)?)
        } else {
            IndexState::empty()
        };

        let index = Self {
            state: Arc::new(RwLock::new(state)),
            dirty: Arc::new(AtomicBool::new(false)),
            persistence: PersistenceManager::new(PersistenceConfig::with_path(path)),
        };
        index.start_background_persistence();
        Ok(index)
    }

    fn start_background_persistence(&self) {
        let state = Arc::clone(&self.state);
        let dirty = Arc::clone(&self.dirty);
        let path = self.persistence.path().to_path_buf();
        self.persistence.start_background_task(
            move || {
                let guard = state.read();
                let bytes = Self::encode_locked(&guard);
                drop(guard);
                std::fs::write(&path, bytes)
            },
            move || dirty.swap(false, Ordering::SeqCst),
        );
    }

    fn encode_locked(state: &IndexState) -> Vec<u8> {
        format::encode(state.dimension.unwrap_or(0), &state.ids, &state.vectors)
    }

    async fn read_file(path: &Path) -> Result<Vec<u8>> {
        let path = path.to_path_buf();
        tokio::time::timeout(IO_TIMEOUT, tokio::task::spawn_blocking(move || std::fs::read(&path)))
            .await
            .map_err(|_| Error::Transient("timed out reading vector index file".into()))?
            .map_err(|e| Error::Storage(format!("task join error: {e}")))?
            .map_err(Error::Io)
    }

    /// Writes the current in-memory state to disk immediately, bypassing
    /// the background interval.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the write fails, or [`Error::Transient`]
    /// if it times out.
    pub async fn flush(&self) -> Result<()> {
        let bytes = Self::encode_locked(&self.state.read());
        let path = self.persistence.path().to_path_buf();
        tokio::time::timeout(IO_TIMEOUT, tokio::task::spawn_blocking(move || std::fs::write(&path, bytes)))
            .await
            .map_err(|_| Error::Transient("timed out writing vector index file".into()))?
            .map_err(|e| Error::Storage(format!("task join error: {e}")))?
            .map_err(Error::Io)?;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Flushes a final time and stops the background task; callers invoke
    /// this on graceful shutdown.
    ///
    /// # Errors
    /// Returns whatever [`Self::flush`] returns.
    pub async fn close(&self) -> Result<()> {
        self.flush().await?;
        self.persistence.stop_background_task();
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for PackedVectorIndex {
    #[instrument(skip(self, pairs), fields(count = pairs.len()))]
    async fn insert_batch(&self, pairs: &[(Uuid, Vec<f32>)]) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        {
            let mut state = self.state.write();
            for (id, vector) in pairs {
                state.upsert(*id, vector.clone())?;
            }
        }
        self.dirty.store(true, Ordering::SeqCst);
        debug!("upserted {} vectors", pairs.len());
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<(Uuid, Vec<f32>)>> {
        let state = self.state.read();
        Ok(state.ids.iter().enumerate().map(|(i, id)| (*id, state.row(i).to_vec())).collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Vec<f32>>> {
        let state = self.state.read();
        Ok(state.positions.get(&id).map(|&position| state.row(position).to_vec()))
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn delete(&self, ids: &[Uuid]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let removed = {
            let mut state = self.state.write();
            ids.iter().filter(|id| state.remove(**id)).count()
        };
        if removed > 0 {
            self.dirty.store(true, Ordering::SeqCst);
        }
        Ok(removed)
    }

    async fn knn(&self, query_vector: &[f32], k: usize, filter_ids: Option<&[Uuid]>) -> Result<Vec<(Uuid, f32)>> {
        let state = self.state.read();
        let allowed: Option<std::collections::HashSet<Uuid>> = filter_ids.map(|ids| ids.iter().copied().collect());

        let mut scored: Vec<(Uuid, f32)> = state
            .ids
            .iter()
            .enumerate()
            .filter(|(_, id)| allowed.as_ref().is_none_or(|set| set.contains(id)))
            .map(|(position, id)| (*id, cosine_similarity(query_vector, state.row(position))))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        Ok(scored)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.read().ids.len())
    }
}

impl Drop for PackedVectorIndex {
    fn drop(&mut self) {
        if self.dirty.load(Ordering::SeqCst) {
            info!("vector index dropped with unsaved changes; call close() before shutdown to persist them");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(values: &[f32]) -> Vec<f32> {
        values.to_vec()
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let index = PackedVectorIndex::open(dir.path().join("index.cavi")).await.unwrap();
        let id = Uuid::new_v4();
        index.insert_batch(&[(id, vector(&[1.0, 0.0, 0.0]))]).await.unwrap();
        assert_eq!(index.get(id).await.unwrap(), Some(vec![1.0, 0.0, 0.0]));
        assert_eq!(index.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_vector() {
        let dir = tempfile::tempdir().unwrap();
        let index = PackedVectorIndex::open(dir.path().join("index.cavi")).await.unwrap();
        let id = Uuid::new_v4();
        index.insert_batch(&[(id, vector(&[1.0, 0.0]))]).await.unwrap();
        index.insert_batch(&[(id, vector(&[0.0, 1.0]))]).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);
        assert_eq!(index.get(id).await.unwrap(), Some(vec![0.0, 1.0]));
    }

    #[tokio::test]
    async fn mismatched_dimension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let index = PackedVectorIndex::open(dir.path().join("index.cavi")).await.unwrap();
        index.insert_batch(&[(Uuid::new_v4(), vector(&[1.0, 0.0]))]).await.unwrap();
        let result = index.insert_batch(&[(Uuid::new_v4(), vector(&[1.0, 0.0, 0.0]))]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn delete_removes_and_compacts() {
        let dir = tempfile::tempdir().unwrap();
        let index = PackedVectorIndex::open(dir.path().join("index.cavi")).await.unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index.insert_batch(&[(a, vector(&[1.0, 0.0])), (b, vector(&[0.0, 1.0]))]).await.unwrap();
        let removed = index.delete(&[a]).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.len().await.unwrap(), 1);
        assert_eq!(index.get(b).await.unwrap(), Some(vec![0.0, 1.0]));
        assert_eq!(index.get(a).await.unwrap(), None);
    }

    #[tokio::test]
    async fn knn_ranks_by_cosine_similarity_descending() {
        let dir = tempfile::tempdir().unwrap();
        let index = PackedVectorIndex::open(dir.path().join("index.cavi")).await.unwrap();
        let close = Uuid::new_v4();
        let far = Uuid::new_v4();
        index
            .insert_batch(&[(close, vector(&[1.0, 0.0])), (far, vector(&[0.0, 1.0]))])
            .await
            .unwrap();
        let hits = index.knn(&[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(hits[0].0, close);
    }

    #[tokio::test]
    async fn knn_respects_filter_ids() {
        let dir = tempfile::tempdir().unwrap();
        let index = PackedVectorIndex::open(dir.path().join("index.cavi")).await.unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index.insert_batch(&[(a, vector(&[1.0, 0.0])), (b, vector(&[1.0, 0.0]))]).await.unwrap();
        let hits = index.knn(&[1.0, 0.0], 10, Some(&[b])).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, b);
    }

    #[tokio::test]
    async fn flush_then_reopen_recovers_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.cavi");
        let id = Uuid::new_v4();
        {
            let index = PackedVectorIndex::open(&path).await.unwrap();
            index.insert_batch(&[(id, vector(&[1.0, 2.0, 3.0]))]).await.unwrap();
            index.close().await.unwrap();
        }
        let reopened = PackedVectorIndex::open(&path).await.unwrap();
        assert_eq!(reopened.get(id).await.unwrap(), Some(vec![1.0, 2.0, 3.0]));
    }

    #[tokio::test]
    async fn empty_index_reports_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = PackedVectorIndex::open(dir.path().join("index.cavi")).await.unwrap();
        assert!(index.is_empty().await.unwrap());
    }
}
