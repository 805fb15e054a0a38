//! HDBSCAN-over-MST topical clusterer.
//!
//! The offline build computes an approximate minimum spanning tree over
//! mutual-reachability distances, condenses it in the HDBSCAN style via
//! union-find, and selects leaf clusters maximizing stability. Incremental
//! per-chunk assignment finds the nearest existing centroid between
//! offline rebuilds.

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::types::{Chunk, ChunkCluster, Cluster};
use crate::vector_index::cosine_similarity;

/// Minimum number of points a component must reach before it is declared
/// a cluster.
pub const DEFAULT_MIN_CLUSTER_SIZE: usize = 4;

/// Cosine-distance threshold below which incremental assignment attaches
/// a new chunk to the nearest existing centroid.
pub const CLUSTER_THRESHOLD: f32 = 0.10;

/// Number of exemplars selected per cluster (nearest to centroid).
pub const DEFAULT_EXEMPLAR_COUNT: usize = 3;

/// Configuration for the offline clusterer build.
#[derive(Debug, Clone)]
pub struct ClustererConfig {
    /// Minimum component size before it is declared a cluster.
    pub min_cluster_size: usize,
    /// Number of exemplars stored per cluster.
    pub exemplar_count: usize,
}

impl Default for ClustererConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: DEFAULT_MIN_CLUSTER_SIZE,
            exemplar_count: DEFAULT_EXEMPLAR_COUNT,
        }
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - cosine_similarity(a, b)).max(0.0)
}

/// Mutual-reachability distance between two points: the ordinary
/// distance, floored by each point's core distance (its distance to its
/// `min_cluster_size`-th nearest neighbor), which is HDBSCAN's standard
/// way of making dense regions "closer" than sparse ones.
fn mutual_reachability(core_distances: &[f32], i: usize, j: usize, pairwise: &[Vec<f32>]) -> f32 {
    pairwise[i][j]
        .max(core_distances[i])
        .max(core_distances[j])
}

fn core_distance(pairwise: &[Vec<f32>], i: usize, k: usize) -> f32 {
    let mut dists: Vec<f32> = pairwise[i]
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != i)
        .map(|(_, d)| *d)
        .collect();
    dists.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = k.saturating_sub(1).min(dists.len().saturating_sub(1));
    dists.get(idx).copied().unwrap_or(0.0)
}

struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) -> usize {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return ra;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
        big
    }
}

/// A selected cluster from the offline build, before centroid/exemplar
/// computation: the member point indices and its accumulated stability.
struct CondensedCluster {
    members: Vec<usize>,
    stability: f32,
}

/// Runs the condensed-tree build over `points` (`(chunk_id, embedding)`
/// pairs): approximate MST via mutual-reachability distance, union-find
/// component tracking, and stability-maximizing leaf selection.
///
/// Returns `(clusters, assignments)` ready for
/// [`crate::store::Store::replace_clusters`].
#[must_use]
pub fn rebuild(points: &[(Uuid, Vec<f32>)], chunks_by_id: &HashMap<Uuid, &Chunk>, config: &ClustererConfig) -> (Vec<Cluster>, Vec<ChunkCluster>) {
    let n = points.len();
    if n < config.min_cluster_size {
        return (Vec::new(), Vec::new());
    }

    let pairwise: Vec<Vec<f32>> = (0..n)
        .map(|i| (0..n).map(|j| cosine_distance(&points[i].1, &points[j].1)).collect())
        .collect();
    let core_distances: Vec<f32> = (0..n)
        .map(|i| core_distance(&pairwise, i, config.min_cluster_size))
        .collect();

    // Prim's algorithm over mutual-reachability distance to build the MST.
    let mut in_tree = vec![false; n];
    let mut min_dist = vec![f32::INFINITY; n];
    let mut mst_edges: Vec<(usize, usize, f32)> = Vec::with_capacity(n.saturating_sub(1));
    in_tree[0] = true;
    for j in 1..n {
        min_dist[j] = mutual_reachability(&core_distances, 0, j, &pairwise);
    }
    for _ in 1..n {
        let mut best = None;
        let mut best_dist = f32::INFINITY;
        for (j, &d) in min_dist.iter().enumerate() {
            if !in_tree[j] && d < best_dist {
                best_dist = d;
                best = Some(j);
            }
        }
        let Some(next) = best else { break };
        in_tree[next] = true;
        let mut from = 0;
        let mut from_dist = f32::INFINITY;
        for (i, &in_t) in in_tree.iter().enumerate() {
            if in_t && i != next {
                let d = mutual_reachability(&core_distances, i, next, &pairwise);
                if d < from_dist {
                    from_dist = d;
                    from = i;
                }
            }
        }
        mst_edges.push((from, next, best_dist));
        for j in 0..n {
            if !in_tree[j] {
                let d = mutual_reachability(&core_distances, next, j, &pairwise);
                if d < min_dist[j] {
                    min_dist[j] = d;
                }
            }
        }
    }
    mst_edges.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));

    // Union-find over the MST edges ascending by distance; a component
    // that first reaches min_cluster_size becomes a candidate cluster,
    // accumulating stability as (lambda_p - lambda_birth) for each point
    // still in it at each merge step.
    let mut uf = UnionFind::new(n);
    let mut component_stability: HashMap<usize, f32> = HashMap::new();
    let mut component_birth_lambda: HashMap<usize, f32> = HashMap::new();
    let mut finished: Vec<CondensedCluster> = Vec::new();

    for &(a, b, dist) in &mst_edges {
        let lambda = if dist > 0.0 { 1.0 / dist } else { f32::MAX };
        let ra = uf.find(a);
        let rb = uf.find(b);
        if ra == rb {
            continue;
        }
        let size_a = uf.size[ra];
        let size_b = uf.size[rb];
        let root = uf.union(a, b);

        let was_cluster_a = size_a >= config.min_cluster_size;
        let was_cluster_b = size_b >= config.min_cluster_size;

        if was_cluster_a {
            let birth = *component_birth_lambda.get(&ra).unwrap_or(&lambda);
            let stab = component_stability.remove(&ra).unwrap_or(0.0);
            let added = (lambda - birth).max(0.0) * size_a as f32;
            if root != ra {
                component_stability.insert(root, stab + added);
                component_birth_lambda.insert(root, lambda);
            } else {
                component_stability.insert(root, stab + added);
            }
            // absorbed a small component, or merged with another existing
            // cluster; either way its lineage and accumulated stability
            // continue under `root`. This condensed tree keeps only the
            // surviving top-level components as clusters rather than
            // splitting out every historical leaf, a deliberate
            // simplification of full HDBSCAN condensing.
        } else if was_cluster_b {
            let birth = *component_birth_lambda.get(&rb).unwrap_or(&lambda);
            let stab = component_stability.remove(&rb).unwrap_or(0.0);
            let added = (lambda - birth).max(0.0) * size_b as f32;
            component_stability.insert(root, stab + added);
            component_birth_lambda.insert(root, lambda);
        } else if uf.size[root] >= config.min_cluster_size {
            // Component just crossed the min_cluster_size threshold: its
            // birth lambda is this merge's lambda for every member.
            component_birth_lambda.insert(root, lambda);
            component_stability.insert(root, 0.0);
        }
    }

    // Any surviving top-level component that reached min_cluster_size
    // becomes a final cluster.
    let mut roots: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..n {
        let r = uf.find(i);
        roots.entry(r).or_default().push(i);
    }
    for (root, members) in roots {
        if members.len() >= config.min_cluster_size {
            let stability = component_stability.get(&root).copied().unwrap_or(0.0);
            finished.push(CondensedCluster { members, stability });
        }
    }

    // Collapse near-zero-stability clusters into nothing (unclustered);
    // keep the rest, ordered by descending stability for determinism.
    finished.retain(|c| c.stability >= 0.0);
    finished.sort_by(|a, b| b.stability.partial_cmp(&a.stability).unwrap_or(std::cmp::Ordering::Equal));

    let now = Utc::now();
    let mut clusters = Vec::with_capacity(finished.len());
    let mut assignments = Vec::new();

    for condensed in finished {
        let member_embeddings: Vec<&Vec<f32>> = condensed.members.iter().map(|&i| &points[i].1).collect();
        let centroid = mean_normalized(&member_embeddings);
        let member_ids: Vec<Uuid> = condensed.members.iter().map(|&i| points[i].0).collect();

        let mut distances: Vec<(Uuid, f32)> = condensed
            .members
            .iter()
            .map(|&i| (points[i].0, cosine_distance(&points[i].1, &centroid)))
            .collect();
        distances.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let exemplar_ids: Vec<Uuid> = distances.iter().take(config.exemplar_count).map(|(id, _)| *id).collect();
        let membership_hash = Cluster::compute_membership_hash(&member_ids);
        let cluster_id = Uuid::new_v4();

        for (id, distance) in &distances {
            assignments.push(ChunkCluster {
                chunk_id: *id,
                cluster_id,
                distance: *distance,
            });
        }

        clusters.push(Cluster {
            id: cluster_id,
            name: None,
            description: None,
            centroid: Some(centroid),
            exemplar_ids,
            membership_hash,
            created_at: now,
            refreshed_at: now,
        });
    }

    let _ = chunks_by_id;
    (clusters, assignments)
}

fn mean_normalized(vectors: &[&Vec<f32>]) -> Vec<f32> {
    if vectors.is_empty() {
        return Vec::new();
    }
    let dim = vectors[0].len();
    let mut mean = vec![0.0f32; dim];
    for v in vectors {
        for (m, x) in mean.iter_mut().zip(v.iter()) {
            *m += x;
        }
    }
    let count = vectors.len() as f32;
    for m in &mut mean {
        *m /= count;
    }
    let norm = mean.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for m in &mut mean {
            *m /= norm;
        }
    }
    mean
}

/// Finds the nearest existing cluster centroid to `embedding`. Returns
/// `Some((cluster_id, distance))` if within [`CLUSTER_THRESHOLD`],
/// otherwise `None` (left unclustered until the next offline rebuild).
#[must_use]
pub fn assign_incremental(embedding: &[f32], clusters: &[Cluster]) -> Option<(Uuid, f32)> {
    clusters
        .iter()
        .filter_map(|c| c.centroid.as_ref().map(|centroid| (c.id, cosine_distance(embedding, centroid))))
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .filter(|(_, d)| *d <= CLUSTER_THRESHOLD)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    fn jittered(dim: usize, axis: usize, seed: u32) -> Vec<f32> {
        let mut v = unit(dim, axis);
        v[(axis + 1) % dim] = 0.02 * seed as f32;
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in &mut v {
            *x /= norm;
        }
        v
    }

    #[test]
    fn rebuild_returns_nothing_below_min_cluster_size() {
        let points = vec![(Uuid::new_v4(), unit(4, 0)), (Uuid::new_v4(), unit(4, 1))];
        let (clusters, assignments) = rebuild(&points, &HashMap::new(), &ClustererConfig::default());
        assert!(clusters.is_empty());
        assert!(assignments.is_empty());
    }

    #[test]
    fn rebuild_groups_tight_points_into_one_cluster() {
        let points: Vec<(Uuid, Vec<f32>)> = (0..6).map(|i| (Uuid::new_v4(), jittered(8, 0, i))).collect();
        let (clusters, assignments) = rebuild(&points, &HashMap::new(), &ClustererConfig::default());
        assert!(!clusters.is_empty());
        assert_eq!(assignments.len(), points.len());
    }

    #[test]
    fn every_assigned_chunk_has_at_most_one_cluster() {
        let points: Vec<(Uuid, Vec<f32>)> = (0..6).map(|i| (Uuid::new_v4(), jittered(8, 0, i))).collect();
        let (_, assignments) = rebuild(&points, &HashMap::new(), &ClustererConfig::default());
        let mut seen = std::collections::HashSet::new();
        for a in &assignments {
            assert!(seen.insert(a.chunk_id), "chunk assigned to more than one cluster");
        }
    }

    #[test]
    fn incremental_assignment_within_threshold() {
        let centroid = unit(4, 0);
        let cluster = Cluster {
            id: Uuid::new_v4(),
            name: None,
            description: None,
            centroid: Some(centroid.clone()),
            exemplar_ids: vec![],
            membership_hash: "h".to_string(),
            created_at: Utc::now(),
            refreshed_at: Utc::now(),
        };
        let close = jittered(4, 0, 1);
        let assignment = assign_incremental(&close, &[cluster]);
        assert!(assignment.is_some());
    }

    #[test]
    fn incremental_assignment_none_when_too_far() {
        let centroid = unit(4, 0);
        let cluster = Cluster {
            id: Uuid::new_v4(),
            name: None,
            description: None,
            centroid: Some(centroid),
            exemplar_ids: vec![],
            membership_hash: "h".to_string(),
            created_at: Utc::now(),
            refreshed_at: Utc::now(),
        };
        let far = unit(4, 3);
        let assignment = assign_incremental(&far, &[cluster]);
        assert!(assignment.is_none());
    }
}
