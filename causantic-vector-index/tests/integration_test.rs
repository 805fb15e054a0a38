use causantic_core::vector_index::VectorIndex;
use causantic_vector_index::PackedVectorIndex;
use uuid::Uuid;

#[tokio::test]
async fn knn_over_many_vectors_respects_k_and_filter() {
    let dir = tempfile::tempdir().unwrap();
    let index = PackedVectorIndex::open(dir.path().join("index.cavi")).await.unwrap();

    let mut ids = Vec::new();
    for i in 0..20 {
        let id = Uuid::new_v4();
        ids.push(id);
        let angle = (i as f32) / 20.0 * std::f32::consts::FRAC_PI_2;
        index.insert_batch(&[(id, vec![angle.cos(), angle.sin()])]).await.unwrap();
    }

    let hits = index.knn(&[1.0, 0.0], 5, None).await.unwrap();
    assert_eq!(hits.len(), 5);
    for pair in hits.windows(2) {
        assert!(pair[0].1 >= pair[1].1);
    }

    let filter = vec![ids[10], ids[11]];
    let filtered = index.knn(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
    assert_eq!(filtered.len(), 2);
    assert!(filtered.iter().all(|(id, _)| filter.contains(id)));
}

#[tokio::test]
async fn reopening_an_empty_path_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let index = PackedVectorIndex::open(dir.path().join("missing.cavi")).await.unwrap();
    assert!(index.is_empty().await.unwrap());
    assert!(index.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_of_unknown_id_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let index = PackedVectorIndex::open(dir.path().join("index.cavi")).await.unwrap();
    let removed = index.delete(&[Uuid::new_v4()]).await.unwrap();
    assert_eq!(removed, 0);
}
