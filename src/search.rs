//! Query planner: hybrid vector + keyword retrieval.
//!
//! # Scoring
//!
//! 1. Embed the query; a failure or an all-zeros vector downgrades to
//!    keyword-only ranking.
//! 2. Fetch `max_results × candidate_multiplier` candidates from each
//!    available side.
//! 3. Normalize: vector scores by `(cos + 1) / 2`, text scores min-max
//!    over the returned batch.
//! 4. Fuse per chunk: `w_v · vector + w_t · text`, a side missing a chunk
//!    contributes 0.
//! 5. Drop below `min_score`, sort descending, truncate, hydrate.
//!
//! Degradation is deliberate and silent: a dead provider must never make
//! `search` fail while the keyword index can still answer, and an index
//! with neither side available answers with an empty list, not an error.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::embedding::{is_zero_vector, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::{SearchOptions, SearchResult};
use crate::store::IndexStore;

pub(crate) async fn run_search(
    config: &Config,
    store: &IndexStore,
    provider: &Arc<dyn EmbeddingProvider>,
    query: &str,
    opts: &SearchOptions,
    cancel: &CancellationToken,
) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    if !store.has_chunks().await? {
        return Ok(Vec::new());
    }
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let query_config = &config.memory_search.query;
    let hybrid = &query_config.hybrid;
    let max_results = opts.max_results.unwrap_or(query_config.max_results);
    let min_score = opts.min_score.unwrap_or(query_config.min_score);
    let k = max_results.saturating_mul(hybrid.candidate_multiplier).max(1);

    let vector_enabled = config.memory_search.store.vector.enabled;
    let query_vec = if vector_enabled && store.vector_ready().await? {
        match provider.embed_query(query).await {
            Ok(vector) if !is_zero_vector(&vector) => Some(vector),
            Ok(_) => {
                tracing::debug!("query embedding is all zeros, using keyword-only ranking");
                None
            }
            Err(err) => {
                tracing::debug!(error = %err, "query embedding failed, using keyword-only ranking");
                None
            }
        }
    } else {
        None
    };
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let vector_side = query_vec.is_some();
    let text_side = store.fts_available() && (hybrid.enabled || !vector_side);

    let vector_candidates = match &query_vec {
        Some(vector) => store.vector_search(vector, k).await?,
        None => Vec::new(),
    };
    let text_candidates = if text_side {
        store.text_search(query, k).await?
    } else {
        Vec::new()
    };

    if vector_candidates.is_empty() && text_candidates.is_empty() {
        return Ok(Vec::new());
    }

    // Keyword-only ranking when the vector side is out; otherwise the
    // configured weights (hybrid off means pure vector).
    let (vector_weight, text_weight) = if !vector_side {
        (0.0, 1.0)
    } else if hybrid.enabled {
        (hybrid.vector_weight, hybrid.text_weight)
    } else {
        (1.0, 0.0)
    };

    let fused = fuse_candidates(
        &vector_candidates,
        &text_candidates,
        vector_weight,
        text_weight,
    );

    let mut ranked: Vec<(i64, f64)> = fused
        .into_iter()
        .filter(|(_, score)| *score >= min_score)
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    ranked.truncate(max_results);

    let mut results = Vec::with_capacity(ranked.len());
    for (chunk_id, score) in ranked {
        if let Some((path, source, byte_offset, text)) =
            store.load_chunk_context(chunk_id).await?
        {
            results.push(SearchResult {
                path,
                source,
                byte_offset,
                text,
                score,
            });
        }
    }
    Ok(results)
}

/// Weighted fusion of the two candidate lists, deduplicated by chunk id.
///
/// Vector scores arrive as raw cosine in `[-1, 1]` and are shifted to
/// `[0, 1]`; text scores are min-max normalized over the batch. A chunk
/// absent from one side contributes 0 from that side.
pub(crate) fn fuse_candidates(
    vector_candidates: &[(i64, f64)],
    text_candidates: &[(i64, f64)],
    vector_weight: f64,
    text_weight: f64,
) -> HashMap<i64, f64> {
    let text_normalized = normalize_min_max(text_candidates);

    let mut fused: HashMap<i64, f64> = HashMap::new();
    for (chunk_id, cosine) in vector_candidates {
        let normalized = (cosine + 1.0) / 2.0;
        let entry = fused.entry(*chunk_id).or_insert(0.0);
        *entry = entry.max(vector_weight * normalized);
    }
    for (chunk_id, score) in &text_normalized {
        let vector_part = vector_candidates
            .iter()
            .find(|(id, _)| id == chunk_id)
            .map(|(_, cosine)| vector_weight * ((cosine + 1.0) / 2.0))
            .unwrap_or(0.0);
        let combined = vector_part + text_weight * score;
        let entry = fused.entry(*chunk_id).or_insert(0.0);
        *entry = entry.max(combined);
    }
    fused
}

/// Min-max normalize raw scores to `[0, 1]`; a batch of equal scores
/// normalizes to 1.0.
pub(crate) fn normalize_min_max(candidates: &[(i64, f64)]) -> Vec<(i64, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let min = candidates
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::INFINITY, f64::min);
    let max = candidates
        .iter()
        .map(|(_, s)| *s)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|(id, score)| {
            let normalized = if (max - min).abs() < f64::EPSILON {
                1.0
            } else {
                (score - min) / (max - min)
            };
            (*id, normalized)
        })
        .collect()
}
