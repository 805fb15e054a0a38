use std::sync::Arc;

use chrono::Utc;

use causantic_core::api::{ForgetFilters, ReconstructSelector, TokenBudget};
use causantic_core::embedder::{Embedder, LoadOptions, MockEmbedder};
use causantic_core::store::Store;
use causantic_core::vector_index::VectorIndex;
use causantic_engine::config::CausanticConfig;
use causantic_engine::engine::Engine;
use causantic_store::CausanticStore;
use causantic_test_utils::sample_chunk;
use causantic_vector_index::PackedVectorIndex;

async fn test_engine() -> (Engine, Arc<CausanticStore>, Arc<PackedVectorIndex>, Arc<MockEmbedder>) {
    let store = Arc::new(CausanticStore::open_in_memory().await.unwrap());
    let dir = tempfile::tempdir().unwrap();
    let vector_index = Arc::new(PackedVectorIndex::open(dir.path().join("vectors.cavi")).await.unwrap());
    let embedder = Arc::new(MockEmbedder::new(8));
    embedder.load("test-model", LoadOptions::default()).await.unwrap();

    let config = CausanticConfig::default();
    let engine = Engine::new(store.clone(), vector_index.clone(), embedder.clone() as Arc<dyn Embedder>, None, &config);
    // keep `dir` alive for the duration of the test by leaking it; a
    // tempdir dropped mid-test would delete the backing file out from
    // under the open index.
    std::mem::forget(dir);
    (engine, store, vector_index, embedder)
}

#[tokio::test]
async fn reconstruct_session_returns_chronological_chunks() {
    let (engine, store, _vector_index, _embedder) = test_engine().await;
    let base = Utc::now();
    let chunks = vec![
        sample_chunk("s1", vec![2, 3], base, "second chunk"),
        sample_chunk("s1", vec![0, 1], base, "first chunk"),
    ];
    store.insert_chunks(&chunks).await.unwrap();

    let reconstructed = engine
        .reconstruct(&ReconstructSelector::Session("s1".to_string()), TokenBudget { max_tokens: u32::MAX }, true)
        .await
        .unwrap();

    assert_eq!(reconstructed.len(), 2);
    assert_eq!(reconstructed[0].content, "first chunk");
    assert_eq!(reconstructed[1].content, "second chunk");
}

#[tokio::test]
async fn reconstruct_trims_to_budget_keeping_newest() {
    let (engine, store, _vector_index, _embedder) = test_engine().await;
    let base = Utc::now();
    let chunks = vec![
        sample_chunk("s1", vec![0], base, "alpha beta gamma delta"),
        sample_chunk("s1", vec![1], base, "epsilon zeta eta theta"),
    ];
    store.insert_chunks(&chunks).await.unwrap();

    let budget = TokenBudget { max_tokens: 4 };
    let reconstructed =
        engine.reconstruct(&ReconstructSelector::Session("s1".to_string()), budget, true).await.unwrap();

    assert_eq!(reconstructed.len(), 1);
    assert_eq!(reconstructed[0].content, "epsilon zeta eta theta");
}

#[tokio::test]
async fn reconstruct_previous_session_without_predecessor_errors() {
    let (engine, store, _vector_index, _embedder) = test_engine().await;
    let base = Utc::now();
    store.insert_chunks(&[sample_chunk("s1", vec![0], base, "only session")]).await.unwrap();

    let result = engine
        .reconstruct(
            &ReconstructSelector::PreviousSession { project: "causantic".to_string(), session_id: "s1".to_string() },
            TokenBudget { max_tokens: u32::MAX },
            true,
        )
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn forget_dry_run_never_mutates_the_store() {
    let (engine, store, _vector_index, _embedder) = test_engine().await;
    let base = Utc::now();
    store.insert_chunks(&[sample_chunk("s1", vec![0], base, "to be forgotten")]).await.unwrap();

    let filters = ForgetFilters { session_id: Some("s1".to_string()), dry_run: true, ..Default::default() };
    let report = engine.forget(&filters).await.unwrap();

    assert_eq!(report.chunk_ids.len(), 1);
    assert!(report.dry_run);
    let remaining = store.get_chunks_by_session("s1").await.unwrap();
    assert_eq!(remaining.len(), 1);
}

#[tokio::test]
async fn forget_live_run_deletes_exactly_the_previewed_set() {
    let (engine, store, _vector_index, _embedder) = test_engine().await;
    let base = Utc::now();
    store.insert_chunks(&[sample_chunk("s1", vec![0], base, "to be forgotten")]).await.unwrap();

    let preview = engine.forget(&ForgetFilters { session_id: Some("s1".to_string()), dry_run: true, ..Default::default() }).await.unwrap();
    let applied = engine.forget(&ForgetFilters { session_id: Some("s1".to_string()), dry_run: false, ..Default::default() }).await.unwrap();

    assert_eq!(preview.chunk_ids, applied.chunk_ids);
    assert!(!applied.dry_run);
    let remaining = store.get_chunks_by_session("s1").await.unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn forget_without_project_or_session_is_rejected() {
    let (engine, _store, _vector_index, _embedder) = test_engine().await;
    let result = engine.forget(&ForgetFilters::default()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn forget_by_query_only_removes_chunks_above_threshold() {
    let (engine, store, vector_index, embedder) = test_engine().await;
    let base = Utc::now();
    let matching = sample_chunk("s1", vec![0], base, "auth token refresh flow");
    let other = sample_chunk("s1", vec![1], base, "totally unrelated topic");
    store.insert_chunks(&[matching.clone(), other.clone()]).await.unwrap();

    let matching_vec = embedder.embed(&[matching.content.clone()], false).await.unwrap().remove(0);
    let other_vec = embedder.embed(&[other.content.clone()], false).await.unwrap().remove(0);
    vector_index.insert_batch(&[(matching.id, matching_vec), (other.id, other_vec)]).await.unwrap();

    let filters = ForgetFilters {
        session_id: Some("s1".to_string()),
        query: Some(matching.content.clone()),
        threshold: Some(0.99),
        dry_run: true,
        ..Default::default()
    };
    let report = engine.forget(&filters).await.unwrap();

    assert_eq!(report.chunk_ids, vec![matching.id]);
}
