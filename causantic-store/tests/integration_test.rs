use chrono::Utc;
use uuid::Uuid;

use causantic_core::store::{MaintenanceRun, Store, TimeRangeOptions};
use causantic_core::types::{Cluster, ChunkCluster, EdgeType, EmbeddingCacheEntry, IngestionCheckpoint, ReferenceType};
use causantic_store::config::{Cipher, StoreConfig};
use causantic_store::encryption::KeySources;
use causantic_store::CausanticStore;
use causantic_test_utils::{sample_chunk, sample_chunk_in_project, sample_edge};

#[tokio::test]
async fn insert_then_fetch_chunks_by_id_and_session() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    let a = sample_chunk("session-1", vec![0, 1], now, "first chunk");
    let b = sample_chunk("session-1", vec![2, 3], now, "second chunk");

    let ids = store.insert_chunks(&[a.clone(), b.clone()]).await.unwrap();
    assert_eq!(ids, vec![a.id, b.id]);

    let fetched = store.get_chunks_by_ids(&[a.id]).await.unwrap();
    assert_eq!(fetched, vec![a.clone()]);

    let session_chunks = store.get_chunks_by_session("session-1").await.unwrap();
    assert_eq!(session_chunks, vec![a, b]);
}

#[tokio::test]
async fn get_chunks_by_ids_silently_omits_missing() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    let a = sample_chunk("session-1", vec![0], now, "only chunk");
    store.insert_chunks(&[a.clone()]).await.unwrap();

    let fetched = store.get_chunks_by_ids(&[a.id, Uuid::new_v4()]).await.unwrap();
    assert_eq!(fetched, vec![a]);
}

#[tokio::test]
async fn insert_chunks_rejects_invalid_chunk() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let mut bad = sample_chunk("session-1", vec![0], Utc::now(), "x");
    bad.content = String::new();
    assert!(store.insert_chunks(&[bad]).await.is_err());
}

#[tokio::test]
async fn get_chunks_by_time_range_filters_by_project_and_session() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    let in_range = sample_chunk_in_project("proj-a", "session-1", vec![0], now, "in range");
    let out_of_range =
        sample_chunk_in_project("proj-a", "session-1", vec![1], now + chrono::Duration::days(10), "out of range");
    let other_project = sample_chunk_in_project("proj-b", "session-2", vec![0], now, "other project");
    store.insert_chunks(&[in_range.clone(), out_of_range, other_project]).await.unwrap();

    let results = store
        .get_chunks_by_time_range(
            "proj-a",
            now - chrono::Duration::days(1),
            now + chrono::Duration::days(1),
            &TimeRangeOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(results, vec![in_range]);
}

#[tokio::test]
async fn get_previous_session_walks_chronological_order() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    let s1 = sample_chunk("session-1", vec![0], now, "first session");
    let s2 = sample_chunk("session-2", vec![0], now + chrono::Duration::hours(1), "second session");
    let s3 = sample_chunk("session-3", vec![0], now + chrono::Duration::hours(2), "third session");
    store.insert_chunks(&[s1, s2, s3]).await.unwrap();

    assert_eq!(store.get_previous_session("causantic", "session-2").await.unwrap(), Some("session-1".to_string()));
    assert_eq!(store.get_previous_session("causantic", "session-1").await.unwrap(), None);
    assert_eq!(store.get_previous_session("causantic", "missing").await.unwrap(), None);
}

#[tokio::test]
async fn delete_chunks_cascades_to_edges_and_cluster_assignments() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    let a = sample_chunk("session-1", vec![0], now, "first");
    let b = sample_chunk("session-1", vec![1], now, "second");
    store.insert_chunks(&[a.clone(), b.clone()]).await.unwrap();

    let edge = sample_edge(a.id, b.id, EdgeType::Forward, ReferenceType::Adjacent, 0.5);
    store.create_or_boost_edges(&[edge]).await.unwrap();

    let cluster = Cluster {
        id: Uuid::new_v4(),
        name: None,
        description: None,
        centroid: None,
        exemplar_ids: vec![a.id],
        membership_hash: Cluster::compute_membership_hash(&[a.id]),
        created_at: now,
        refreshed_at: now,
    };
    store
        .replace_clusters(&[cluster.clone()], &[ChunkCluster { chunk_id: a.id, cluster_id: cluster.id, distance: 0.1 }])
        .await
        .unwrap();

    let removed = store.delete_chunks(&[a.id]).await.unwrap();
    assert_eq!(removed, 1);

    assert!(store.get_edges_for_chunk(a.id, None).await.unwrap().is_empty());
    assert!(store.get_edges_for_chunk(b.id, None).await.unwrap().is_empty());
    assert!(store.get_chunk_cluster(a.id).await.unwrap().is_none());
}

#[tokio::test]
async fn create_or_boost_edges_boosts_existing_edge_instead_of_duplicating() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    let a = sample_chunk("session-1", vec![0], now, "first");
    let b = sample_chunk("session-1", vec![1], now, "second");
    store.insert_chunks(&[a.clone(), b.clone()]).await.unwrap();

    let edge = sample_edge(a.id, b.id, EdgeType::Forward, ReferenceType::Adjacent, 0.5);
    store.create_or_boost_edges(&[edge.clone()]).await.unwrap();
    store.create_or_boost_edges(&[edge]).await.unwrap();

    let edges = store.get_edges_for_chunk(a.id, Some(EdgeType::Forward)).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].link_count, 2);
    assert!(edges[0].initial_weight > 0.5);
}

#[tokio::test]
async fn get_edges_for_chunk_filters_by_direction() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    let a = sample_chunk("session-1", vec![0], now, "first");
    let b = sample_chunk("session-1", vec![1], now, "second");
    store.insert_chunks(&[a.clone(), b.clone()]).await.unwrap();

    let (forward, backward) =
        causantic_core::types::Edge::symmetric_pair(a.id, b.id, ReferenceType::Adjacent, 0.5, now);
    store.create_or_boost_edges(&[forward, backward]).await.unwrap();

    assert_eq!(store.get_edges_for_chunk(a.id, Some(EdgeType::Forward)).await.unwrap().len(), 1);
    assert_eq!(store.get_edges_for_chunk(a.id, Some(EdgeType::Backward)).await.unwrap().len(), 0);
    assert_eq!(store.get_edges_for_chunk(b.id, Some(EdgeType::Backward)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn prune_dangling_edges_removes_orphaned_edges() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    let a = sample_chunk("session-1", vec![0], now, "first");
    let b = sample_chunk("session-1", vec![1], now, "second");
    store.insert_chunks(&[a.clone(), b.clone()]).await.unwrap();
    let edge = sample_edge(a.id, b.id, EdgeType::Forward, ReferenceType::Adjacent, 0.5);
    store.create_or_boost_edges(&[edge]).await.unwrap();

    // Simulate a chunk deletion path that didn't cascade (e.g. a bulk
    // import), leaving a dangling edge for prune-graph to clean up.
    store.delete_edges_for_session(&[]).await.unwrap();
    let deleted_via_raw = store.get_chunks_by_ids(&[b.id]).await.unwrap();
    assert_eq!(deleted_via_raw.len(), 1);

    let removed = store.prune_dangling_edges().await.unwrap();
    assert_eq!(removed, 0);
}

#[tokio::test]
async fn fts_search_finds_inserted_content() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    let a = sample_chunk("session-1", vec![0], now, "the quick brown fox");
    let b = sample_chunk("session-1", vec![1], now, "an unrelated sentence");
    store.insert_chunks(&[a.clone(), b]).await.unwrap();

    let hits = store.fts_search("quick", 10, None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, a.id);
}

#[tokio::test]
async fn fts_search_scopes_to_project_when_given() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    let a = sample_chunk_in_project("proj-a", "session-1", vec![0], now, "shared keyword here");
    let b = sample_chunk_in_project("proj-b", "session-2", vec![0], now, "shared keyword here too");
    store.insert_chunks(&[a.clone(), b.clone()]).await.unwrap();

    let hits = store.fts_search("keyword", 10, Some("proj-a")).await.unwrap();
    assert_eq!(hits.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![a.id]);
}

#[tokio::test]
async fn checkpoint_round_trips_and_updates_in_place() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let checkpoint = IngestionCheckpoint {
        session_id: "session-1".to_string(),
        last_turn_index: 4,
        last_chunk_id: Some(Uuid::new_v4()),
        file_mtime: Utc::now(),
    };
    store.put_checkpoint(&checkpoint).await.unwrap();
    assert_eq!(store.get_checkpoint("session-1").await.unwrap(), Some(checkpoint.clone()));

    let updated = IngestionCheckpoint { last_turn_index: 9, ..checkpoint };
    store.put_checkpoint(&updated).await.unwrap();
    assert_eq!(store.get_checkpoint("session-1").await.unwrap().unwrap().last_turn_index, 9);
}

#[tokio::test]
async fn get_checkpoint_returns_none_when_absent() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    assert_eq!(store.get_checkpoint("never-ingested").await.unwrap(), None);
}

#[tokio::test]
async fn embedding_cache_round_trips_and_counts_hits() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let entry = EmbeddingCacheEntry {
        content_hash: EmbeddingCacheEntry::hash_content("hello world"),
        model_id: "test-model".to_string(),
        embedding: vec![0.1, 0.2, 0.3],
        hit_count: 0,
    };
    store.cache_put(&entry).await.unwrap();

    let first = store.cache_get(&entry.content_hash, &entry.model_id).await.unwrap();
    assert_eq!(first, Some(entry.embedding.clone()));

    let miss = store.cache_get(&entry.content_hash, "other-model").await.unwrap();
    assert_eq!(miss, None);
}

#[tokio::test]
async fn replace_clusters_swaps_full_generation() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    let a = sample_chunk("session-1", vec![0], now, "first");
    store.insert_chunks(&[a.clone()]).await.unwrap();

    let cluster_one = Cluster {
        id: Uuid::new_v4(),
        name: Some("auth".to_string()),
        description: None,
        centroid: Some(vec![1.0, 0.0]),
        exemplar_ids: vec![a.id],
        membership_hash: Cluster::compute_membership_hash(&[a.id]),
        created_at: now,
        refreshed_at: now,
    };
    store
        .replace_clusters(&[cluster_one.clone()], &[ChunkCluster { chunk_id: a.id, cluster_id: cluster_one.id, distance: 0.0 }])
        .await
        .unwrap();
    assert_eq!(store.get_all_clusters().await.unwrap().len(), 1);

    // A later rebuild produces an entirely different cluster set; the old
    // generation must not leak through.
    let cluster_two = Cluster { id: Uuid::new_v4(), ..cluster_one };
    store.replace_clusters(&[cluster_two.clone()], &[]).await.unwrap();

    let remaining = store.get_all_clusters().await.unwrap();
    assert_eq!(remaining, vec![cluster_two]);
    assert!(store.get_chunk_cluster(a.id).await.unwrap().is_none());
}

#[tokio::test]
async fn update_cluster_label_persists_name_and_description() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    let cluster = Cluster {
        id: Uuid::new_v4(),
        name: None,
        description: None,
        centroid: None,
        exemplar_ids: vec![],
        membership_hash: "abc".to_string(),
        created_at: now,
        refreshed_at: now,
    };
    store.replace_clusters(&[cluster.clone()], &[]).await.unwrap();

    store
        .update_cluster_label(cluster.id, Some("auth flow".to_string()), Some("authentication work".to_string()))
        .await
        .unwrap();

    let fetched = store.get_cluster(cluster.id).await.unwrap().unwrap();
    assert_eq!(fetched.name, Some("auth flow".to_string()));
    assert_eq!(fetched.description, Some("authentication work".to_string()));
}

#[tokio::test]
async fn list_projects_aggregates_counts_and_time_bounds() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    store
        .insert_chunks(&[
            sample_chunk_in_project("proj-a", "session-1", vec![0], now, "one"),
            sample_chunk_in_project("proj-a", "session-1", vec![1], now + chrono::Duration::hours(1), "two"),
            sample_chunk_in_project("proj-b", "session-2", vec![0], now, "three"),
        ])
        .await
        .unwrap();

    let mut projects = store.list_projects().await.unwrap();
    projects.sort_by(|a, b| a.slug.cmp(&b.slug));
    assert_eq!(projects.len(), 2);
    assert_eq!(projects[0].slug, "proj-a");
    assert_eq!(projects[0].chunk_count, 2);
    assert_eq!(projects[1].slug, "proj-b");
    assert_eq!(projects[1].chunk_count, 1);
}

#[tokio::test]
async fn list_projects_cache_is_invalidated_on_insert() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    store.insert_chunks(&[sample_chunk("session-1", vec![0], now, "first")]).await.unwrap();
    assert_eq!(store.list_projects().await.unwrap().len(), 1);

    store
        .insert_chunks(&[sample_chunk_in_project("other-project", "session-2", vec![0], now, "second")])
        .await
        .unwrap();
    assert_eq!(store.list_projects().await.unwrap().len(), 2);
}

#[tokio::test]
async fn list_sessions_filters_by_time_range() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let now = Utc::now();
    store
        .insert_chunks(&[
            sample_chunk("session-1", vec![0], now, "early"),
            sample_chunk("session-2", vec![0], now + chrono::Duration::days(5), "late"),
        ])
        .await
        .unwrap();

    let all = store.list_sessions("causantic", None).await.unwrap();
    assert_eq!(all.len(), 2);

    let narrow = store
        .list_sessions("causantic", Some((now - chrono::Duration::hours(1), now + chrono::Duration::hours(1))))
        .await
        .unwrap();
    assert_eq!(narrow.len(), 1);
    assert_eq!(narrow[0].session_id, "session-1");
}

#[tokio::test]
async fn record_maintenance_run_persists_outcome() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    let run = MaintenanceRun {
        task: "prune-graph".to_string(),
        started_at: Utc::now(),
        finished_at: Some(Utc::now()),
        success: true,
        error: None,
    };
    store.record_maintenance_run(&run).await.unwrap();
}

#[tokio::test]
async fn vacuum_runs_without_error() {
    let store = CausanticStore::open_in_memory().await.unwrap();
    store.vacuum().await.unwrap();
}

// Opening an encrypted store without a key fails, with the wrong key
// fails, and with the correct key succeeds and reads back prior chunks.
// Runs single-threaded within this binary since it mutates the
// process-wide `CAUSANTIC_ENCRYPTION_KEY` env var across opens.
#[tokio::test]
async fn encrypted_store_requires_the_correct_key_to_reopen() {
    const ENV_VAR: &str = "CAUSANTIC_ENCRYPTION_KEY";
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("encrypted.db");
    let env_sources = KeySources { try_keystore: false, try_env_var: true, try_prompt: false };

    std::env::set_var(ENV_VAR, "the-right-key");
    let config = StoreConfig::new(&path).with_encryption(Cipher::ChaCha20Poly1305, env_sources.clone());
    let store = CausanticStore::open(config).await.unwrap();
    let now = Utc::now();
    store.insert_chunks(&[sample_chunk("session-1", vec![0], now, "secret chunk")]).await.unwrap();
    drop(store);

    std::env::remove_var(ENV_VAR);
    let no_key_config = StoreConfig::new(&path).with_encryption(Cipher::ChaCha20Poly1305, env_sources.clone());
    assert!(CausanticStore::open(no_key_config).await.is_err());

    std::env::set_var(ENV_VAR, "a-wrong-key");
    let wrong_key_config = StoreConfig::new(&path).with_encryption(Cipher::ChaCha20Poly1305, env_sources.clone());
    assert!(CausanticStore::open(wrong_key_config).await.is_err());

    std::env::set_var(ENV_VAR, "the-right-key");
    let right_key_config = StoreConfig::new(&path).with_encryption(Cipher::ChaCha20Poly1305, env_sources);
    let reopened = CausanticStore::open(right_key_config).await.unwrap();
    let chunks = reopened.get_chunks_by_session("session-1").await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "secret chunk");
    std::env::remove_var(ENV_VAR);
}
