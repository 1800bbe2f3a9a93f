//! Persistent embedding cache.
//!
//! Maps `(provider_id, model_id, chunk_sha256)` to an embedding vector,
//! stored in the same SQLite file as the index so it survives forced
//! reindexes and model changes (entries for other models stay usable if
//! the configuration is switched back). Reads refresh `last_used_at`, and
//! [`EmbeddingCache::prune`] evicts the least recently used rows beyond
//! the configured cap.

use std::collections::HashMap;

use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::Result;

pub struct EmbeddingCache {
    pool: SqlitePool,
    provider_id: String,
    model_id: String,
}

/// How many keys a single `IN (...)` list may carry.
const LOOKUP_CHUNK: usize = 500;

impl EmbeddingCache {
    pub fn new(pool: SqlitePool, provider_id: String, model_id: String) -> Self {
        EmbeddingCache {
            pool,
            provider_id,
            model_id,
        }
    }

    /// Look up cached vectors for a set of chunk hashes. Hits get their
    /// `last_used_at` refreshed.
    pub async fn get_many(&self, shas: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        let mut found = HashMap::new();
        if shas.is_empty() {
            return Ok(found);
        }

        let now = chrono::Utc::now().timestamp();
        for batch in shas.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT chunk_sha256, embedding FROM embedding_cache \
                 WHERE provider_id = ? AND model_id = ? AND chunk_sha256 IN ({})",
                placeholders
            );
            let mut query = sqlx::query(&sql)
                .bind(&self.provider_id)
                .bind(&self.model_id);
            for sha in batch {
                query = query.bind(sha);
            }
            let rows = query.fetch_all(&self.pool).await?;

            for row in rows {
                let sha: String = row.get("chunk_sha256");
                let blob: Vec<u8> = row.get("embedding");
                found.insert(sha, blob_to_vec(&blob));
            }

            let touch_sql = format!(
                "UPDATE embedding_cache SET last_used_at = ? \
                 WHERE provider_id = ? AND model_id = ? AND chunk_sha256 IN ({})",
                placeholders
            );
            let mut touch = sqlx::query(&touch_sql)
                .bind(now)
                .bind(&self.provider_id)
                .bind(&self.model_id);
            for sha in batch {
                touch = touch.bind(sha);
            }
            touch.execute(&self.pool).await?;
        }

        Ok(found)
    }

    /// Store a batch of vectors in one transaction.
    pub async fn put_batch(&self, entries: &HashMap<String, Vec<f32>>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for (sha, vector) in entries {
            sqlx::query(
                "INSERT OR REPLACE INTO embedding_cache \
                 (provider_id, model_id, chunk_sha256, embedding, created_at, last_used_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&self.provider_id)
            .bind(&self.model_id)
            .bind(sha)
            .bind(vec_to_blob(vector))
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Evict least-recently-used rows beyond `max_entries`. The cap spans
    /// all models, so an abandoned model's entries age out naturally.
    pub async fn prune(&self, max_entries: u64) -> Result<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_cache")
            .fetch_one(&self.pool)
            .await?;
        let excess = total - max_entries as i64;
        if excess <= 0 {
            return Ok(0);
        }

        let result = sqlx::query(
            "DELETE FROM embedding_cache WHERE rowid IN \
             (SELECT rowid FROM embedding_cache ORDER BY last_used_at ASC, rowid ASC LIMIT ?)",
        )
        .bind(excess)
        .execute(&self.pool)
        .await?;
        tracing::debug!(evicted = result.rows_affected(), "pruned embedding cache");
        Ok(result.rows_affected())
    }
}
