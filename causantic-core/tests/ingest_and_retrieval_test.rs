//! End-to-end ingest/retrieval tests over the real store and vector
//! index: chunking and file-path edge detection, idempotent re-ingest,
//! causal-chain decay on recall, and MMR diversity on near-duplicate
//! embeddings.

use std::sync::Arc;

use chrono::Utc;

use causantic_core::api::{ChainDirection, QueryFilters};
use causantic_core::chunker::ChunkerConfig;
use causantic_core::embedder::{Embedder, LoadOptions, MockEmbedder};
use causantic_core::ingest::{IngestConfig, IngestOrchestrator};
use causantic_core::retriever::{hop_decay, RetrievalConfig, Retriever};
use causantic_core::store::Store;
use causantic_core::types::{Chunk, Edge, EdgeType, IngestOutcome, ReferenceType};
use causantic_core::vector_index::VectorIndex;
use causantic_store::CausanticStore;
use causantic_test_utils::sample_chunk;
use causantic_vector_index::PackedVectorIndex;

async fn open_vector_index() -> Arc<PackedVectorIndex> {
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(PackedVectorIndex::open(dir.path().join("vectors.cavi")).await.unwrap());
    // Keep the backing directory alive for the test's duration; dropping
    // it would delete the open file out from under the index.
    std::mem::forget(dir);
    index
}

fn transcript_line(value: serde_json::Value) -> String {
    value.to_string()
}

/// A 3-turn session where turn 3 mentions the file path introduced in
/// turn 1 produces a `file-path` edge pair of weight 1.0.
#[tokio::test]
async fn ingest_detects_file_path_edge_across_turns() {
    let store = Arc::new(CausanticStore::open_in_memory().await.unwrap());
    let vector_index = open_vector_index().await;
    let embedder = Arc::new(MockEmbedder::new(8));
    embedder.load("test-model", LoadOptions::default()).await.unwrap();

    let transcripts_root = tempfile::tempdir().unwrap();
    let session_path = transcripts_root.path().join("session.jsonl");
    let transcript = vec![
        transcript_line(serde_json::json!({
            "role": "user", "timestamp": "2026-01-01T00:00:00Z",
            "session_id": "s1", "cwd": "/home/user/causantic",
            "content": [{"type": "text", "text": "please create src/a.ts with a hello export"}]
        })),
        transcript_line(serde_json::json!({
            "role": "assistant", "timestamp": "2026-01-01T00:00:01Z",
            "content": [{"type": "text", "text": "created src/a.ts"}]
        })),
        transcript_line(serde_json::json!({
            "role": "user", "timestamp": "2026-01-01T00:01:00Z",
            "content": [{"type": "text", "text": "now add a test for it"}]
        })),
        transcript_line(serde_json::json!({
            "role": "assistant", "timestamp": "2026-01-01T00:01:01Z",
            "content": [{"type": "text", "text": "sure, writing the test"}]
        })),
        transcript_line(serde_json::json!({
            "role": "user", "timestamp": "2026-01-01T00:02:00Z",
            "content": [{"type": "text", "text": "src/a.ts looks good now, thanks"}]
        })),
        transcript_line(serde_json::json!({
            "role": "assistant", "timestamp": "2026-01-01T00:02:01Z",
            "content": [{"type": "text", "text": "glad it works"}]
        })),
    ]
    .join("\n");
    tokio::fs::write(&session_path, transcript).await.unwrap();

    let orchestrator = IngestOrchestrator::new(
        store.clone(),
        vector_index.clone(),
        embedder.clone() as Arc<dyn Embedder>,
        IngestConfig {
            transcripts_root: transcripts_root.path().to_path_buf(),
            model_id: "test-model".to_string(),
            // Sized so turns 1-2 pack into one chunk and turn 3 starts a
            // second, adjacent chunk carrying the second src/a.ts mention.
            chunker: ChunkerConfig { max_tokens: 30, include_thinking: true },
        },
    );

    let report = orchestrator.ingest_session_file(&session_path).await.unwrap();
    assert!(matches!(report.outcome, IngestOutcome::Ingested));
    assert_eq!(report.chunks_inserted, 2, "expected turns 1-2 packed together and turn 3 split into a second, adjacent chunk");

    let chunks = store.get_chunks_by_session("s1").await.unwrap();
    assert_eq!(chunks.len(), report.chunks_inserted);

    let mut found_file_path_edge = false;
    for chunk in &chunks {
        let edges = store.get_edges_for_chunk(chunk.id, Some(EdgeType::Forward)).await.unwrap();
        for edge in edges {
            if edge.reference_type == ReferenceType::FilePath {
                assert!((edge.initial_weight - 1.0).abs() < 1e-6);
                found_file_path_edge = true;
            }
        }
    }
    assert!(found_file_path_edge, "expected a file-path edge between the chunks mentioning src/a.ts");
}

/// Re-ingesting an unchanged session file is fully idempotent: it is
/// reported skipped, with no new chunks or edges materializing.
#[tokio::test]
async fn reingesting_unchanged_session_is_idempotent() {
    let store = Arc::new(CausanticStore::open_in_memory().await.unwrap());
    let vector_index = open_vector_index().await;
    let embedder = Arc::new(MockEmbedder::new(8));
    embedder.load("test-model", LoadOptions::default()).await.unwrap();

    let transcripts_root = tempfile::tempdir().unwrap();
    let session_path = transcripts_root.path().join("session.jsonl");
    let transcript = vec![
        transcript_line(serde_json::json!({
            "role": "user", "timestamp": "2026-01-01T00:00:00Z",
            "session_id": "s1", "cwd": "/home/user/causantic",
            "content": [{"type": "text", "text": "hello"}]
        })),
        transcript_line(serde_json::json!({
            "role": "assistant", "timestamp": "2026-01-01T00:00:01Z",
            "content": [{"type": "text", "text": "hi there"}]
        })),
    ]
    .join("\n");
    tokio::fs::write(&session_path, transcript).await.unwrap();

    let orchestrator = IngestOrchestrator::new(
        store.clone(),
        vector_index.clone(),
        embedder.clone() as Arc<dyn Embedder>,
        IngestConfig {
            transcripts_root: transcripts_root.path().to_path_buf(),
            model_id: "test-model".to_string(),
            chunker: ChunkerConfig::default(),
        },
    );

    let first = orchestrator.ingest_session_file(&session_path).await.unwrap();
    assert!(matches!(first.outcome, IngestOutcome::Ingested));
    let chunks_after_first = store.get_chunks_by_session("s1").await.unwrap();

    let second = orchestrator.ingest_session_file(&session_path).await.unwrap();
    assert!(matches!(second.outcome, IngestOutcome::SkippedUnchangedFile));
    assert_eq!(second.chunks_inserted, 0);
    assert_eq!(second.cache_hits, 0);
    assert_eq!(second.cache_misses, 0);

    let chunks_after_second = store.get_chunks_by_session("s1").await.unwrap();
    assert_eq!(chunks_after_first, chunks_after_second);
}

async fn seed_chain_chunks(store: &Arc<CausanticStore>, vector_index: &Arc<PackedVectorIndex>, embedder: &Arc<MockEmbedder>) -> Vec<Chunk> {
    let base = Utc::now();
    let chunks: Vec<Chunk> = (0..5)
        .map(|i| sample_chunk("chain-session", vec![i], base, &format!("chunk number {i} about the refactor")))
        .collect();
    store.insert_chunks(&chunks).await.unwrap();

    let mut pairs = Vec::new();
    for chunk in &chunks {
        let vector = embedder.embed(&[chunk.content.clone()], false).await.unwrap().remove(0);
        pairs.push((chunk.id, vector));
    }
    vector_index.insert_batch(&pairs).await.unwrap();

    let mut edges = Vec::new();
    for window in chunks.windows(2) {
        let (fwd, bwd) = Edge::symmetric_pair(window[0].id, window[1].id, ReferenceType::Adjacent, 1.0, base);
        edges.push(fwd);
        edges.push(bwd);
    }
    store.create_or_boost_edges(&edges).await.unwrap();
    chunks
}

/// A forward chain `c1 -> c2 -> c3 -> c4 -> c5` with all weights 1.0:
/// recalling from `c3` walks backward to `c2, c1` with decayed weights
/// `0.9, 0.8`.
#[tokio::test]
async fn backward_chain_walk_decays_weights_per_hop() {
    let store = Arc::new(CausanticStore::open_in_memory().await.unwrap());
    let vector_index = open_vector_index().await;
    let embedder = Arc::new(MockEmbedder::new(16));
    embedder.load("test-model", LoadOptions::default()).await.unwrap();

    let chunks = seed_chain_chunks(&store, &vector_index, &embedder).await;
    let c3 = &chunks[2];

    let retriever = Retriever::new(store.clone() as Arc<dyn Store>, vector_index.clone() as Arc<dyn VectorIndex>, embedder.clone() as Arc<dyn Embedder>);
    let config = RetrievalConfig { k: 1, ..RetrievalConfig::default() };
    let results = retriever.recall(&c3.content, &QueryFilters::default(), causantic_core::api::TokenBudget { max_tokens: u32::MAX }, &config).await.unwrap();

    let top = results.first().expect("at least one recall hit");
    assert_eq!(top.hit.chunk_id, c3.id, "the chunk whose text matches the query verbatim should rank first");

    let by_hop: std::collections::HashMap<u32, &causantic_core::api::ChainLink> = top.chain.iter().map(|l| (l.hop, l)).collect();
    let hop1 = by_hop.get(&1).expect("hop 1 present");
    let hop2 = by_hop.get(&2).expect("hop 2 present");
    assert_eq!(hop1.chunk_id, chunks[1].id);
    assert_eq!(hop2.chunk_id, chunks[0].id);
    assert!((hop1.decayed_score - 0.9).abs() < 1e-5);
    assert!((hop2.decayed_score - 0.8).abs() < 1e-5);
}

/// Among three chunks with near-identical embeddings, the top `search`
/// result is the highest-similarity chunk and the second maximizes the
/// MMR objective rather than simply being the next-highest-similarity
/// chunk.
#[tokio::test]
async fn mmr_rerank_prefers_diversity_over_raw_similarity() {
    let store = Arc::new(CausanticStore::open_in_memory().await.unwrap());
    let vector_index = open_vector_index().await;
    let embedder = Arc::new(MockEmbedder::new(16));
    embedder.load("test-model", LoadOptions::default()).await.unwrap();

    let base = Utc::now();
    let a = sample_chunk("s1", vec![0], base, "chunk alpha");
    let b = sample_chunk("s1", vec![1], base, "chunk beta");
    let c = sample_chunk("s1", vec![2], base, "chunk gamma");
    store.insert_chunks(&[a.clone(), b.clone(), c.clone()]).await.unwrap();

    // Near-identical embeddings built from the same embedder the query
    // will go through: `a` and `b` are nearly collinear, `c` is
    // unrelated, so MMR's diversity term should favor `c` over `b` for
    // the second slot even though `b` is closer to the query by raw
    // cosine similarity alone.
    let normalize = |mut v: Vec<f32>| {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    };
    let vec_a = embedder.embed(&["chunk alpha".to_string()], false).await.unwrap().remove(0);
    let vec_b_seed = embedder.embed(&["a different phrase entirely".to_string()], false).await.unwrap().remove(0);
    let vec_b: Vec<f32> = vec_a.iter().zip(vec_b_seed.iter()).map(|(x, y)| 0.95 * x + 0.05 * y).collect();
    let vec_c = embedder.embed(&["something about an unrelated deployment topic".to_string()], false).await.unwrap().remove(0);
    vector_index
        .insert_batch(&[(a.id, vec_a), (b.id, normalize(vec_b)), (c.id, vec_c)])
        .await
        .unwrap();

    let retriever = Retriever::new(store.clone() as Arc<dyn Store>, vector_index.clone() as Arc<dyn VectorIndex>, embedder.clone() as Arc<dyn Embedder>);
    // Querying with the exact text `a` was embedded from gives a
    // near-identical-embeddings setup where the query matches one chunk
    // exactly, since the mock embedder is a pure function of text.
    let config = RetrievalConfig { k: 2, mmr_lambda: 0.7, ..RetrievalConfig::default() };
    let results = retriever.search("chunk alpha", &QueryFilters::default(), &config).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk_id, a.id, "top result should be the highest-similarity chunk");
    assert_eq!(results[1].chunk_id, c.id, "MMR should prefer the diverse chunk over the near-duplicate for the second slot");
}

#[tokio::test]
async fn hop_decay_values_match_the_seeded_chain() {
    assert!((hop_decay(ChainDirection::Backward, 1) - 0.9).abs() < 1e-6);
    assert!((hop_decay(ChainDirection::Backward, 2) - 0.8).abs() < 1e-6);
}

#[tokio::test]
async fn edges_touched_counts_every_created_or_boosted_edge_on_first_ingest() {
    let store = Arc::new(CausanticStore::open_in_memory().await.unwrap());
    let vector_index = open_vector_index().await;
    let embedder = Arc::new(MockEmbedder::new(8));
    embedder.load("test-model", LoadOptions::default()).await.unwrap();

    let transcripts_root = tempfile::tempdir().unwrap();
    let session_path = transcripts_root.path().join("session.jsonl");
    let transcript = vec![
        transcript_line(serde_json::json!({
            "role": "user", "timestamp": "2026-01-01T00:00:00Z",
            "session_id": "s-edges", "cwd": "/home/user/causantic",
            "content": [{"type": "text", "text": "first turn"}]
        })),
        transcript_line(serde_json::json!({
            "role": "assistant", "timestamp": "2026-01-01T00:00:01Z",
            "content": [{"type": "text", "text": "first reply"}]
        })),
        transcript_line(serde_json::json!({
            "role": "user", "timestamp": "2026-01-01T00:01:00Z",
            "content": [{"type": "text", "text": "second turn"}]
        })),
        transcript_line(serde_json::json!({
            "role": "assistant", "timestamp": "2026-01-01T00:01:01Z",
            "content": [{"type": "text", "text": "second reply"}]
        })),
    ]
    .join("\n");
    tokio::fs::write(&session_path, transcript).await.unwrap();

    let orchestrator = IngestOrchestrator::new(
        store.clone(),
        vector_index.clone(),
        embedder.clone() as Arc<dyn Embedder>,
        IngestConfig {
            transcripts_root: transcripts_root.path().to_path_buf(),
            model_id: "test-model".to_string(),
            chunker: ChunkerConfig { max_tokens: 3, include_thinking: true },
        },
    );

    let report = orchestrator.ingest_session_file(&session_path).await.unwrap();
    assert!(report.chunks_inserted >= 2);
    assert!(report.edges_touched > 0, "adjacency pass must emit at least the fallback adjacent edge pair");

    let chunks = store.get_chunks_by_session("s-edges").await.unwrap();
    let total_edges: usize = {
        let mut sum = 0;
        for chunk in &chunks {
            sum += store.get_edges_for_chunk(chunk.id, None).await.unwrap().len();
        }
        sum
    };
    assert!(total_edges > 0);
}
