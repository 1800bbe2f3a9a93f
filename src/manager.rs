//! Manager facade coordinating scanner, store, cache, provider, and the
//! query planner.
//!
//! A [`SearchManager`] owns one index store. Writers are serialized through
//! a single-flight slot: concurrent `sync` callers coalesce onto the
//! in-flight run and all receive its [`SyncReport`] (or its error, shared
//! through an `Arc`). A `force` caller that joins a non-forced run waits
//! for it to finish and then starts its own forced run. Reads (`search`,
//! `status`, `read_file`) proceed concurrently against the store's WAL
//! snapshots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::cache::EmbeddingCache;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::migrate;
use crate::models::{
    FtsStatus, SearchOptions, SearchResult, StatusReport, SyncOptions, SyncReport, VectorStatus,
};
use crate::path_gate::PathGate;
use crate::search::run_search;
use crate::store::IndexStore;
use crate::sync::{run_sync, SyncContext};

type SyncOutcome = std::result::Result<SyncReport, Arc<Error>>;

struct InflightSync {
    force: bool,
    tx: broadcast::Sender<SyncOutcome>,
}

struct Inner {
    config: Config,
    store: IndexStore,
    cache: EmbeddingCache,
    provider: Arc<dyn EmbeddingProvider>,
    gate: PathGate,
    vec_extension: bool,
    sync_slot: Mutex<Option<InflightSync>>,
    closed: AtomicBool,
}

/// The public entry point to the memory search index.
#[derive(Clone)]
pub struct SearchManager {
    inner: Arc<Inner>,
}

impl SearchManager {
    /// Validate the configuration, open (or create and migrate) the store,
    /// and build the configured embedding provider.
    pub async fn open(config: Config) -> Result<SearchManager> {
        config.validate()?;
        let provider = create_provider(&config)?;
        Self::with_provider(config, provider).await
    }

    /// Open the store with an injected provider. The provider's
    /// `id`/`model` pair defines the embedding fingerprint, so swapping the
    /// model here invalidates stored vectors exactly like a config change.
    pub async fn with_provider(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<SearchManager> {
        config.validate()?;

        let fingerprint = format!("{}/{}", provider.id(), provider.model());
        let pool = db::connect(&config.memory_search.store.path).await?;
        let report = migrate::open_store(&pool, &fingerprint).await?;

        let store = IndexStore::new(
            pool.clone(),
            report,
            provider.id().to_string(),
            provider.model().to_string(),
        );
        let cache = EmbeddingCache::new(pool, provider.id().to_string(), provider.model().to_string());
        let gate = PathGate::new(
            &config.workspace,
            &config.memory_search.extra_paths,
            config.memory_search.scan.max_file_bytes,
        );

        Ok(SearchManager {
            inner: Arc::new(Inner {
                config,
                store,
                cache,
                provider,
                gate,
                vec_extension: report.vec_extension,
                sync_slot: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Synchronize the index with the filesystem. Concurrent callers
    /// coalesce onto one in-flight run and share its outcome.
    pub async fn sync(
        &self,
        opts: SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        loop {
            self.ensure_open()?;

            let mut slot = self.inner.sync_slot.lock().await;
            if let Some(inflight) = slot.as_ref() {
                let mut rx = inflight.tx.subscribe();
                let joined_force = inflight.force;
                drop(slot);

                let received = tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    received = rx.recv() => received,
                };
                let outcome = match received {
                    Ok(outcome) => outcome,
                    // Sender dropped without broadcasting; re-enter the loop.
                    Err(_) => continue,
                };
                if opts.force && !joined_force {
                    // The run we waited out was not forced; start ours now.
                    continue;
                }
                return outcome.map_err(Error::from);
            }

            let (tx, _rx) = broadcast::channel(1);
            *slot = Some(InflightSync {
                force: opts.force,
                tx: tx.clone(),
            });
            drop(slot);

            let ctx = SyncContext {
                config: &self.inner.config,
                store: &self.inner.store,
                cache: &self.inner.cache,
                provider: self.inner.provider.clone(),
                gate: &self.inner.gate,
            };
            let result = run_sync(&ctx, opts.force, opts.reason.as_deref(), cancel).await;

            let mut slot = self.inner.sync_slot.lock().await;
            *slot = None;
            drop(slot);

            let outcome: SyncOutcome = result.map_err(Arc::new);
            let _ = tx.send(outcome.clone());
            return outcome.map_err(Error::from);
        }
    }

    /// Run a hybrid search and return ranked passages. Provider failures
    /// degrade to keyword-only ranking; an index with nothing to offer
    /// answers `[]`.
    pub async fn search(
        &self,
        query: &str,
        opts: SearchOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_open()?;

        if self.inner.config.memory_search.sync.on_search {
            match self.sync(SyncOptions::default(), cancel).await {
                Ok(_) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    tracing::warn!(error = %err, "pre-search sync failed, searching stale index");
                }
            }
        }

        run_search(
            &self.inner.config,
            &self.inner.store,
            &self.inner.provider,
            query,
            &opts,
            cancel,
        )
        .await
    }

    /// Read a file's content through the path gate. Only memory content
    /// and extra-root files are served; plain workspace files are indexed
    /// for search but not exposed here.
    pub async fn read_file(&self, rel_path: &str, cancel: &CancellationToken) -> Result<String> {
        self.ensure_open()?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let resolved = self.inner.gate.resolve(rel_path)?;
        if resolved.source == crate::models::Source::Workspace {
            return Err(Error::PathDenied(rel_path.to_string()));
        }
        Ok(tokio::fs::read_to_string(&resolved.abs_path).await?)
    }

    /// Snapshot counts and capability flags.
    pub async fn status(&self) -> Result<StatusReport> {
        self.ensure_open()?;
        let store = &self.inner.store;
        let (files, chunks) = store.counts().await?;
        let source_counts = store.source_counts().await?;
        let vector_available = store.vector_ready().await?;

        Ok(StatusReport {
            files,
            chunks,
            source_counts,
            vector: VectorStatus {
                enabled: self.inner.config.memory_search.store.vector.enabled,
                available: vector_available,
            },
            fts: FtsStatus {
                available: store.fts_available(),
            },
            last_synced_at: store.last_synced_at().await?,
            embedding_model: format!(
                "{}/{}",
                self.inner.provider.id(),
                self.inner.provider.model()
            ),
        })
    }

    /// Whether a native vector extension answered the probe at open time.
    /// Without one, vector search runs as a brute-force cosine scan.
    pub fn probe_vector_availability(&self) -> bool {
        self.inner.vec_extension
    }

    /// Close the store. Later calls fail with an I/O error.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.store.pool().close().await;
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("search manager is closed")));
        }
        Ok(())
    }
}
