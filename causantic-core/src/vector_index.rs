//! The `VectorIndex` trait: a persistent dense-vector store keyed by
//! chunk id, with exact cosine KNN and optional id-set filtering.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

/// Persistent dense-vector store keyed by chunk id.
///
/// For corpora below a few hundred thousand chunks an exact brute-force
/// cosine scan over a packed matrix is sufficient and predictable (see
/// [`causantic_vector_index`] for the reference implementation); an
/// approximate index may be substituted as long as it returns the same
/// shape and obeys `filter_ids`.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts or overwrites a batch of `(chunk_id, embedding)` pairs.
    /// All vectors must share the index's fixed dimension.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::Corruption`] if a vector's
    /// dimension does not match the index's established dimension.
    async fn insert_batch(&self, pairs: &[(Uuid, Vec<f32>)]) -> Result<()>;

    /// Returns every stored `(chunk_id, embedding)` pair, used by the
    /// offline clusterer.
    async fn get_all(&self) -> Result<Vec<(Uuid, Vec<f32>)>>;

    /// Fetches one embedding by chunk id.
    async fn get(&self, id: Uuid) -> Result<Option<Vec<f32>>>;

    /// Removes a batch of chunk ids, returning the number actually
    /// present and removed.
    async fn delete(&self, ids: &[Uuid]) -> Result<usize>;

    /// Exact or approximate `k` nearest neighbors to `query_vector` by
    /// cosine similarity, descending. When `filter_ids` is `Some`, only
    /// vectors whose id is in the set are considered.
    async fn knn(
        &self,
        query_vector: &[f32],
        k: usize,
        filter_ids: Option<&[Uuid]>,
    ) -> Result<Vec<(Uuid, f32)>>;

    /// Number of vectors currently stored.
    async fn len(&self) -> Result<usize>;

    /// Whether the index holds no vectors.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Computes cosine similarity between two equal-length vectors. Returns
/// `0.0` if either vector has zero magnitude.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_has_similarity_zero() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
