mod helpers;

use memsearch::{SearchManager, SyncOptions};
use tokio_util::sync::CancellationToken;

use helpers::{HashProvider, TestEnv};

fn cancel() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn read_file_serves_memory_content() {
    let env = TestEnv::new();
    env.write_memory_corpus();

    let manager = SearchManager::with_provider(env.config.clone(), HashProvider::new("test"))
        .await
        .unwrap();

    let body = manager
        .read_file("memory/2026-01-12.md", &cancel())
        .await
        .unwrap();
    assert!(body.contains("Alpha memory line."));

    let sentinel = manager.read_file("MEMORY.md", &cancel()).await.unwrap();
    assert!(sentinel.contains("Beta knowledge base entry."));

    manager.close().await;
}

#[tokio::test]
async fn read_file_denies_plain_workspace_files() {
    let env = TestEnv::new();
    env.write("NOTES.md", "workspace-level notes, not memory");

    let manager = SearchManager::with_provider(env.config.clone(), HashProvider::new("test"))
        .await
        .unwrap();

    let err = manager.read_file("NOTES.md", &cancel()).await.unwrap_err();
    assert_eq!(err.kind(), "path_denied");

    manager.close().await;
}

#[tokio::test]
async fn read_file_denies_traversal_and_missing_paths() {
    let env = TestEnv::new();
    std::fs::write(env.tmp.path().join("outside.md"), "outside").unwrap();

    let manager = SearchManager::with_provider(env.config.clone(), HashProvider::new("test"))
        .await
        .unwrap();

    for rel in ["../outside.md", "memory/../../outside.md", "memory/nope.md", ""] {
        let err = manager.read_file(rel, &cancel()).await.unwrap_err();
        assert_eq!(err.kind(), "path_denied", "expected denial for {:?}", rel);
    }

    manager.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn read_file_denies_symlinks_in_extra_roots() {
    let env = TestEnv::new();
    let extra = env.tmp.path().join("extra");
    std::fs::create_dir_all(&extra).unwrap();
    std::fs::write(extra.join("real.md"), "extra root content").unwrap();
    // A link pointing inside its own root is still refused: symlink
    // following is off for every root.
    std::os::unix::fs::symlink(extra.join("real.md"), extra.join("alias.md")).unwrap();
    // And one escaping the root entirely.
    std::fs::write(env.tmp.path().join("secret.md"), "secret").unwrap();
    std::os::unix::fs::symlink(env.tmp.path().join("secret.md"), extra.join("leak.md")).unwrap();

    let mut config = env.config.clone();
    config.memory_search.extra_paths = vec![extra];

    let manager = SearchManager::with_provider(config, HashProvider::new("test"))
        .await
        .unwrap();

    assert!(manager.read_file("real.md", &cancel()).await.is_ok());
    assert_eq!(
        manager.read_file("alias.md", &cancel()).await.unwrap_err().kind(),
        "path_denied"
    );
    assert_eq!(
        manager.read_file("leak.md", &cancel()).await.unwrap_err().kind(),
        "path_denied"
    );

    manager.close().await;
}

#[tokio::test]
async fn extra_roots_are_scanned_and_tagged() {
    let env = TestEnv::new();
    env.write_memory_corpus();
    let extra = env.tmp.path().join("extra-notes");
    std::fs::create_dir_all(&extra).unwrap();
    std::fs::write(extra.join("vendor.md"), "Omega vendor documentation.\n").unwrap();

    let mut config = env.config.clone();
    config.memory_search.extra_paths = vec![extra];

    let manager = SearchManager::with_provider(config, HashProvider::new("test"))
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
    let extra_row = status
        .source_counts
        .iter()
        .find(|c| c.source == "extra")
        .expect("extra source row");
    assert_eq!(extra_row.files, 1);

    let body = manager.read_file("vendor.md", &cancel()).await.unwrap();
    assert!(body.contains("Omega"));

    manager.close().await;
}

#[tokio::test]
async fn oversized_files_are_denied_and_skipped() {
    let env = TestEnv::new();
    let mut config = env.config.clone();
    config.memory_search.scan.max_file_bytes = 64;

    env.write("memory/small.md", "fits fine");
    env.write("memory/huge.md", &"x".repeat(500));

    let manager = SearchManager::with_provider(config, HashProvider::new("test"))
        .await
        .unwrap();
    manager.sync(SyncOptions::default(), &cancel()).await.unwrap();

    let status = manager.status().await.unwrap();
    assert_eq!(status.files, 1, "the oversized file must not be indexed");

    let err = manager.read_file("memory/huge.md", &cancel()).await.unwrap_err();
    assert_eq!(err.kind(), "path_denied");

    manager.close().await;
}
