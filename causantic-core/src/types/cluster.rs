//! Topical clusters produced by the offline clusterer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A topical group of chunks with a shared embedding-space centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Cluster id.
    pub id: Uuid,
    /// Short human-readable name, populated by the external labeler.
    pub name: Option<String>,
    /// Longer description, populated by the external labeler.
    pub description: Option<String>,
    /// L2-normalized mean of member embeddings, or `None` until the next
    /// offline rebuild computes it.
    pub centroid: Option<Vec<f32>>,
    /// Small ordered set of chunks nearest the centroid.
    pub exemplar_ids: Vec<Uuid>,
    /// Hash of the sorted member-id set, used to detect label staleness.
    pub membership_hash: String,
    /// When this cluster was first created.
    pub created_at: DateTime<Utc>,
    /// When membership or centroid was last recomputed.
    pub refreshed_at: DateTime<Utc>,
}

impl Cluster {
    /// Computes the membership hash for a set of member chunk ids. Order
    /// does not matter: ids are sorted before hashing.
    #[must_use]
    pub fn compute_membership_hash(member_ids: &[Uuid]) -> String {
        let mut sorted: Vec<Uuid> = member_ids.to_vec();
        sorted.sort_unstable();

        let mut hasher = Sha256::new();
        for id in &sorted {
            hasher.update(id.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Whether `description` is missing or `membership_hash` has changed
    /// since the description was last generated, i.e. the cluster needs
    /// the external labeler re-run.
    #[must_use]
    pub fn needs_label_refresh(&self, current_membership_hash: &str) -> bool {
        self.description.is_none() || self.membership_hash != current_membership_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_hash_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let h1 = Cluster::compute_membership_hash(&[a, b]);
        let h2 = Cluster::compute_membership_hash(&[b, a]);
        assert_eq!(h1, h2);
    }

    #[test]
    fn membership_hash_changes_with_membership() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let h1 = Cluster::compute_membership_hash(&[a, b]);
        let h2 = Cluster::compute_membership_hash(&[a, c]);
        assert_ne!(h1, h2);
    }

    #[test]
    fn needs_label_refresh_when_no_description() {
        let cluster = Cluster {
            id: Uuid::new_v4(),
            name: None,
            description: None,
            centroid: None,
            exemplar_ids: vec![],
            membership_hash: "abc".to_string(),
            created_at: Utc::now(),
            refreshed_at: Utc::now(),
        };
        assert!(cluster.needs_label_refresh("abc"));
    }

    #[test]
    fn no_refresh_needed_when_hash_matches_and_described() {
        let cluster = Cluster {
            id: Uuid::new_v4(),
            name: Some("auth".to_string()),
            description: Some("Authentication work".to_string()),
            centroid: None,
            exemplar_ids: vec![],
            membership_hash: "abc".to_string(),
            created_at: Utc::now(),
            refreshed_at: Utc::now(),
        };
        assert!(!cluster.needs_label_refresh("abc"));
        assert!(cluster.needs_label_refresh("def"));
    }
}
