//! Sync engine: reconciles the scanner's view of the filesystem with the
//! index store.
//!
//! Incremental syncs diff scanner output against the stored file rows and
//! apply adds/updates/deletes file by file, each file in its own
//! transaction. Forced syncs rebuild everything: chunk every accepted
//! file, resolve vectors (cache first, then the provider), and hand the
//! result to [`IndexStore::replace_all`], which either commits the whole
//! new index or leaves the old one untouched.
//!
//! Vectors are resolved cache-first. Misses are embedded in batches of at
//! most `sync.max_batch` texts, with up to `sync.max_in_flight` requests
//! in the air at once. The first vector seen in a sync establishes the
//! prevailing dimension; any later disagreement is a
//! `provider_dim_mismatch`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::cache::EmbeddingCache;
use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::models::{Chunk, SyncReport};
use crate::path_gate::PathGate;
use crate::scanner;
use crate::store::{IndexStore, StagedFile};

pub(crate) struct SyncContext<'a> {
    pub config: &'a Config,
    pub store: &'a IndexStore,
    pub cache: &'a EmbeddingCache,
    pub provider: Arc<dyn EmbeddingProvider>,
    pub gate: &'a PathGate,
}

/// Outcome of resolving vectors for a set of chunks.
#[derive(Default)]
struct ResolvedVectors {
    by_sha: HashMap<String, Vec<f32>>,
    embedded: u64,
    from_cache: u64,
}

pub(crate) async fn run_sync(
    ctx: &SyncContext<'_>,
    force: bool,
    reason: Option<&str>,
    cancel: &CancellationToken,
) -> Result<SyncReport> {
    let started = Instant::now();
    let report = if force {
        forced_sync(ctx, cancel).await?
    } else {
        incremental_sync(ctx, cancel).await?
    };

    let mut report = report;
    report.duration_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        force,
        reason = reason.unwrap_or(""),
        files_scanned = report.files_scanned,
        files_added = report.files_added,
        files_updated = report.files_updated,
        files_deleted = report.files_deleted,
        chunks_indexed = report.chunks_indexed,
        vectors_embedded = report.vectors_embedded,
        vectors_from_cache = report.vectors_from_cache,
        duration_ms = report.duration_ms,
        "sync complete"
    );
    Ok(report)
}

async fn incremental_sync(
    ctx: &SyncContext<'_>,
    cancel: &CancellationToken,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    let memory = &ctx.config.memory_search;

    let known = ctx.store.known_files().await?;
    let entries = scanner::scan(ctx.config, ctx.gate, &known)?;
    report.files_scanned = entries.len() as u64;

    let current: HashSet<&str> = entries.iter().map(|e| e.rel_path.as_str()).collect();
    let removed: Vec<String> = known
        .keys()
        .filter(|rel| !current.contains(rel.as_str()))
        .cloned()
        .collect();
    for rel_path in removed {
        ensure_live(ctx, cancel)?;
        ctx.store.delete_file(&rel_path).await?;
        report.files_deleted += 1;
    }

    let mut prevailing_dim = stored_dim(ctx).await?;
    let mut dim_mismatch: Option<Error> = None;

    for entry in &entries {
        ensure_live(ctx, cancel)?;

        let known_record = known.get(&entry.rel_path);
        if let Some(record) = known_record {
            if record.sha256 == entry.sha256 {
                continue;
            }
        }
        let text = match &entry.text {
            Some(text) => text,
            // The scanner only withholds the body for unchanged files.
            None => continue,
        };

        let chunks = chunk_text(
            text,
            memory.chunking.max_chars,
            memory.chunking.overlap_chars,
        );

        let mut vectors = HashMap::new();
        if memory.store.vector.enabled && !chunks.is_empty() {
            match resolve_vectors(ctx, &chunk_items(&chunks), &mut prevailing_dim, cancel).await {
                Ok(resolved) => {
                    report.vectors_embedded += resolved.embedded;
                    report.vectors_from_cache += resolved.from_cache;
                    vectors = resolved.by_sha;
                }
                Err(err @ Error::ProviderDimMismatch { .. }) => {
                    // This file's update is abandoned; the rest of the sync
                    // proceeds and the error surfaces at the end.
                    tracing::warn!(
                        path = %entry.rel_path,
                        error = %err,
                        "skipping file after embedding dimension mismatch"
                    );
                    dim_mismatch.get_or_insert(err);
                    continue;
                }
                Err(err) => return Err(err),
            }
        }

        ctx.store.replace_file(entry, &chunks, &vectors).await?;
        report.chunks_indexed += chunks.len() as u64;
        if known_record.is_some() {
            report.files_updated += 1;
        } else {
            report.files_added += 1;
        }
    }

    // Chunks can be left without vectors by a model change (the old
    // vector space was dropped at open) even though their files are
    // unchanged; backfill them so vector search recovers.
    if memory.store.vector.enabled && dim_mismatch.is_none() {
        let pending = ctx.store.chunks_missing_vectors().await?;
        if !pending.is_empty() {
            tracing::info!(chunks = pending.len(), "backfilling missing vectors");
            let items: Vec<(String, String)> = pending
                .iter()
                .map(|(_, sha, text)| (sha.clone(), text.clone()))
                .collect();
            match resolve_vectors(ctx, &items, &mut prevailing_dim, cancel).await {
                Ok(resolved) => {
                    report.vectors_embedded += resolved.embedded;
                    report.vectors_from_cache += resolved.from_cache;
                    let entries: Vec<(i64, Vec<f32>)> = pending
                        .iter()
                        .filter_map(|(chunk_id, sha, _)| {
                            resolved.by_sha.get(sha).map(|v| (*chunk_id, v.clone()))
                        })
                        .collect();
                    ctx.store.put_vectors(&entries).await?;
                }
                Err(err @ Error::ProviderDimMismatch { .. }) => {
                    dim_mismatch = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
    }

    if let Some(err) = dim_mismatch {
        return Err(err);
    }

    ctx.store
        .mark_synced(
            prevailing_dim.map(|d| d as i64),
            chrono::Utc::now().timestamp(),
        )
        .await?;
    if memory.cache.enabled {
        ctx.cache.prune(memory.cache.max_entries).await?;
    }
    Ok(report)
}

async fn forced_sync(ctx: &SyncContext<'_>, cancel: &CancellationToken) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    let memory = &ctx.config.memory_search;

    // Hash every file; unchanged chunks are still served from the cache,
    // so the provider only sees genuinely new content.
    let entries = scanner::scan(ctx.config, ctx.gate, &HashMap::new())?;
    report.files_scanned = entries.len() as u64;

    let mut staged = Vec::with_capacity(entries.len());
    let mut all_chunks: Vec<Chunk> = Vec::new();
    for entry in &entries {
        ensure_live(ctx, cancel)?;
        let text = entry.text.as_deref().unwrap_or_default();
        let chunks = chunk_text(
            text,
            memory.chunking.max_chars,
            memory.chunking.overlap_chars,
        );
        report.chunks_indexed += chunks.len() as u64;
        all_chunks.extend(chunks.iter().cloned());
        staged.push(StagedFile {
            rel_path: entry.rel_path.clone(),
            source: entry.source,
            mtime_ns: entry.mtime_ns,
            size_bytes: entry.size_bytes,
            sha256: entry.sha256.clone(),
            chunks,
        });
        report.files_added += 1;
    }

    let mut prevailing_dim = stored_dim(ctx).await?;
    let mut vectors = HashMap::new();
    if memory.store.vector.enabled && !all_chunks.is_empty() {
        // Vectors are fully resolved before anything is written; a provider
        // failure here leaves the live index byte-identical.
        let resolved =
            resolve_vectors(ctx, &chunk_items(&all_chunks), &mut prevailing_dim, cancel).await?;
        report.vectors_embedded = resolved.embedded;
        report.vectors_from_cache = resolved.from_cache;
        vectors = resolved.by_sha;
    }

    ensure_live(ctx, cancel)?;
    ctx.store
        .replace_all(
            &staged,
            &vectors,
            prevailing_dim.map(|d| d as i64),
            chrono::Utc::now().timestamp(),
        )
        .await?;

    if memory.cache.enabled {
        ctx.cache.prune(memory.cache.max_entries).await?;
    }
    Ok(report)
}

fn chunk_items(chunks: &[Chunk]) -> Vec<(String, String)> {
    chunks
        .iter()
        .map(|c| (c.sha256.clone(), c.text.clone()))
        .collect()
}

/// Resolve vectors for `(chunk_sha256, text)` items: cache first, provider
/// for the rest. Newly embedded vectors are written back to the cache
/// before returning.
async fn resolve_vectors(
    ctx: &SyncContext<'_>,
    items: &[(String, String)],
    prevailing_dim: &mut Option<usize>,
    cancel: &CancellationToken,
) -> Result<ResolvedVectors> {
    let memory = &ctx.config.memory_search;
    let mut resolved = ResolvedVectors::default();

    // Unique chunk hashes, first occurrence keeps its text.
    let mut unique: Vec<(String, String)> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for (sha, text) in items {
        if seen.insert(sha.as_str()) {
            unique.push((sha.clone(), text.clone()));
        }
    }

    let mut missing: Vec<(String, String)> = Vec::new();
    if memory.cache.enabled {
        let shas: Vec<String> = unique.iter().map(|(sha, _)| sha.clone()).collect();
        let mut hits = ctx.cache.get_many(&shas).await?;
        for (sha, text) in unique {
            match hits.remove(&sha) {
                Some(vector) if dim_matches(prevailing_dim, vector.len()) => {
                    *prevailing_dim = Some(vector.len());
                    resolved.by_sha.insert(sha, vector);
                    resolved.from_cache += 1;
                }
                // A stale entry with the wrong dimension is just a miss.
                _ => missing.push((sha, text)),
            }
        }
    } else {
        missing = unique;
    }

    if missing.is_empty() {
        return Ok(resolved);
    }

    let semaphore = Arc::new(Semaphore::new(memory.sync.max_in_flight));
    let mut join_set: JoinSet<Result<(Vec<String>, Vec<Vec<f32>>)>> = JoinSet::new();
    for batch in missing.chunks(memory.sync.max_batch) {
        let shas: Vec<String> = batch.iter().map(|(sha, _)| sha.clone()).collect();
        let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
        let provider = ctx.provider.clone();
        let semaphore = semaphore.clone();
        join_set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| Error::Cancelled)?;
            let vectors = provider.embed_batch(&texts).await?;
            Ok((shas, vectors))
        });
    }

    let mut fresh: HashMap<String, Vec<f32>> = HashMap::new();
    loop {
        let joined = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            joined = join_set.join_next() => joined,
        };
        let Some(joined) = joined else { break };
        let (shas, vectors) =
            joined.map_err(|e| Error::ProviderRequestFailed(format!("embedding task: {}", e)))??;

        if vectors.len() != shas.len() {
            return Err(Error::ProviderRequestFailed(format!(
                "embedding count mismatch: sent {}, got {}",
                shas.len(),
                vectors.len()
            )));
        }
        for (sha, vector) in shas.into_iter().zip(vectors) {
            if vector.is_empty() || !dim_matches(prevailing_dim, vector.len()) {
                return Err(Error::ProviderDimMismatch {
                    expected: prevailing_dim.unwrap_or(0),
                    actual: vector.len(),
                });
            }
            *prevailing_dim = Some(vector.len());
            resolved.embedded += 1;
            fresh.insert(sha.clone(), vector.clone());
            resolved.by_sha.insert(sha, vector);
        }
    }

    if memory.cache.enabled && !fresh.is_empty() {
        ctx.cache.put_batch(&fresh).await?;
    }
    Ok(resolved)
}

fn dim_matches(prevailing: &Option<usize>, len: usize) -> bool {
    if len == 0 {
        return false;
    }
    match prevailing {
        Some(dim) => *dim == len,
        None => true,
    }
}

async fn stored_dim(ctx: &SyncContext<'_>) -> Result<Option<usize>> {
    let dim = ctx.store.meta_dim().await?;
    Ok((dim > 0).then_some(dim as usize))
}

fn ensure_live(_ctx: &SyncContext<'_>, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dim_matching_rules() {
        assert!(dim_matches(&None, 4));
        assert!(dim_matches(&Some(4), 4));
        assert!(!dim_matches(&Some(4), 3));
        assert!(!dim_matches(&None, 0), "a zero-dim vector is never valid");
    }
}
