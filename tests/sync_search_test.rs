mod helpers;

use memsearch::{SearchManager, SearchOptions, SyncOptions};
use tokio_util::sync::CancellationToken;

use helpers::{HashProvider, TestEnv};

fn cancel() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn forced_sync_then_search_finds_memory_line() {
    let env = TestEnv::new();
    env.write_memory_corpus();

    let manager = SearchManager::with_provider(env.config.clone(), HashProvider::new("test"))
        .await
        .unwrap();
    manager
        .sync(
            SyncOptions {
                force: true,
                reason: None,
            },
            &cancel(),
        )
        .await
        .unwrap();

    let results = manager
        .search("alpha", SearchOptions::default(), &cancel())
        .await
        .unwrap();
    assert!(
        results.iter().any(|r| r.path.contains("memory/2026-01-12.md")),
        "expected a hit in memory/2026-01-12.md, got {:?}",
        results.iter().map(|r| &r.path).collect::<Vec<_>>()
    );

    manager.close().await;
}

#[tokio::test]
async fn status_source_counts_match_totals() {
    let env = TestEnv::new();
    env.write_memory_corpus();

    let manager = SearchManager::with_provider(env.config.clone(), HashProvider::new("test"))
        .await
        .unwrap();
    manager
        .sync(
            SyncOptions {
                force: true,
                reason: None,
            },
            &cancel(),
        )
        .await
        .unwrap();

    let status = manager.status().await.unwrap();
    assert!(status.files > 0);
    assert!(status.chunks > 0);
    assert!(status.last_synced_at.is_some());
    assert_eq!(status.embedding_model, "hash/test");
    assert!(status.fts.available);
    assert!(status.vector.enabled);
    assert!(status.vector.available);

    // The corpus is all memory content, so the memory row carries every
    // file and chunk.
    let memory = status
        .source_counts
        .iter()
        .find(|c| c.source == "memory")
        .expect("memory source row");
    assert_eq!(memory.files, status.files);
    assert_eq!(memory.chunks, status.chunks);

    manager.close().await;
}

#[tokio::test]
async fn incremental_sync_applies_adds_updates_and_deletes() {
    let env = TestEnv::new();
    env.write("memory/first.md", "Gamma note about storage engines.\n");

    let manager = SearchManager::with_provider(env.config.clone(), HashProvider::new("test"))
        .await
        .unwrap();

    let report = manager.sync(SyncOptions::default(), &cancel()).await.unwrap();
    assert_eq!(report.files_added, 1);
    assert_eq!(report.files_updated, 0);
    assert_eq!(report.files_deleted, 0);

    // Add a second file.
    env.write("memory/second.md", "Delta note about query planners.\n");
    let report = manager.sync(SyncOptions::default(), &cancel()).await.unwrap();
    assert_eq!(report.files_added, 1);
    assert_eq!(report.files_updated, 0);

    // Rewrite the first file (different length so the change is visible in
    // metadata even with coarse mtimes).
    env.write(
        "memory/first.md",
        "Gamma note about storage engines, revised with more detail.\n",
    );
    let report = manager.sync(SyncOptions::default(), &cancel()).await.unwrap();
    assert_eq!(report.files_updated, 1);
    assert_eq!(report.files_added, 0);

    let results = manager
        .search("revised", SearchOptions::default(), &cancel())
        .await
        .unwrap();
    assert!(results.iter().any(|r| r.path == "memory/first.md"));

    // Delete it.
    env.remove("memory/first.md");
    let report = manager.sync(SyncOptions::default(), &cancel()).await.unwrap();
    assert_eq!(report.files_deleted, 1);

    let status = manager.status().await.unwrap();
    assert_eq!(status.files, 1);

    let results = manager
        .search("revised", SearchOptions::default(), &cancel())
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.path != "memory/first.md"));

    manager.close().await;
}

#[tokio::test]
async fn unchanged_corpus_syncs_to_no_ops() {
    let env = TestEnv::new();
    env.write_memory_corpus();

    let manager = SearchManager::with_provider(env.config.clone(), HashProvider::new("test"))
        .await
        .unwrap();
    manager.sync(SyncOptions::default(), &cancel()).await.unwrap();

    let report = manager.sync(SyncOptions::default(), &cancel()).await.unwrap();
    assert_eq!(report.files_added, 0);
    assert_eq!(report.files_updated, 0);
    assert_eq!(report.files_deleted, 0);
    assert_eq!(report.chunks_indexed, 0);

    manager.close().await;
}

#[tokio::test]
async fn empty_files_are_recorded_with_zero_chunks() {
    let env = TestEnv::new();
    env.write("memory/empty.md", "");
    env.write("memory/full.md", "Some real content here.\n");

    let manager = SearchManager::with_provider(env.config.clone(), HashProvider::new("test"))
        .await
        .unwrap();
    manager.sync(SyncOptions::default(), &cancel()).await.unwrap();

    let status = manager.status().await.unwrap();
    assert_eq!(status.files, 2, "empty file must still be recorded");

    // A later edit of the formerly-empty file is picked up.
    env.write("memory/empty.md", "No longer empty: sigma content.\n");
    let report = manager.sync(SyncOptions::default(), &cancel()).await.unwrap();
    assert_eq!(report.files_updated, 1);

    let results = manager
        .search("sigma", SearchOptions::default(), &cancel())
        .await
        .unwrap();
    assert!(results.iter().any(|r| r.path == "memory/empty.md"));

    manager.close().await;
}

#[tokio::test]
async fn empty_query_returns_no_results() {
    let env = TestEnv::new();
    env.write_memory_corpus();

    let manager = SearchManager::with_provider(env.config.clone(), HashProvider::new("test"))
        .await
        .unwrap();
    manager.sync(SyncOptions::default(), &cancel()).await.unwrap();

    let results = manager
        .search("   ", SearchOptions::default(), &cancel())
        .await
        .unwrap();
    assert!(results.is_empty());

    manager.close().await;
}

#[tokio::test]
async fn search_result_offsets_point_into_the_file() {
    let env = TestEnv::new();
    env.write_memory_corpus();

    let manager = SearchManager::with_provider(env.config.clone(), HashProvider::new("test"))
        .await
        .unwrap();
    manager.sync(SyncOptions::default(), &cancel()).await.unwrap();

    let results = manager
        .search("zebra", SearchOptions::default(), &cancel())
        .await
        .unwrap();
    let hit = results
        .iter()
        .find(|r| r.path == "memory/2026-01-12.md")
        .expect("zebra hit");

    let body = manager.read_file(&hit.path, &cancel()).await.unwrap();
    let start = hit.byte_offset as usize;
    assert_eq!(&body[start..start + hit.text.len()], hit.text);

    manager.close().await;
}

#[tokio::test]
async fn closed_manager_rejects_calls() {
    let env = TestEnv::new();
    env.write_memory_corpus();

    let manager = SearchManager::with_provider(env.config.clone(), HashProvider::new("test"))
        .await
        .unwrap();
    manager.close().await;

    let err = manager
        .search("alpha", SearchOptions::default(), &cancel())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "io_error");
    let err = manager.sync(SyncOptions::default(), &cancel()).await.unwrap_err();
    assert_eq!(err.kind(), "io_error");
}
