//! Row-level operations on the index store.
//!
//! All writes that touch one file happen inside a single transaction, so a
//! file's chunks, vectors, and FTS rows always change as one unit. The
//! forced-reindex path ([`IndexStore::replace_all`]) builds the new content
//! in staging tables and swaps it into the live tables in one final
//! transaction: a failure at any point leaves the live index untouched.

use std::collections::HashMap;

use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::Result;
use crate::migrate::{OpenReport, STAGING_TABLES};
use crate::models::{Chunk, ScanEntry, Source, SourceCount};
use crate::scanner::KnownFile;

/// A file plus its chunks, assembled for a forced reindex.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub rel_path: String,
    pub source: Source,
    pub mtime_ns: i64,
    pub size_bytes: i64,
    pub sha256: String,
    pub chunks: Vec<Chunk>,
}

pub struct IndexStore {
    pool: SqlitePool,
    fts_available: bool,
    vec_extension: bool,
    provider_id: String,
    model_id: String,
}

impl IndexStore {
    pub fn new(pool: SqlitePool, report: OpenReport, provider_id: String, model_id: String) -> Self {
        IndexStore {
            pool,
            fts_available: report.fts_available,
            vec_extension: report.vec_extension,
            provider_id,
            model_id,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn fts_available(&self) -> bool {
        self.fts_available
    }

    pub fn vec_extension(&self) -> bool {
        self.vec_extension
    }

    /// Snapshot of all file rows keyed by relative path, used by the
    /// scanner to skip hashing unchanged files.
    pub async fn known_files(&self) -> Result<HashMap<String, KnownFile>> {
        let rows = sqlx::query("SELECT id, rel_path, mtime_ns, size_bytes, sha256 FROM files")
            .fetch_all(&self.pool)
            .await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            map.insert(
                row.get::<String, _>("rel_path"),
                KnownFile {
                    id: row.get("id"),
                    mtime_ns: row.get("mtime_ns"),
                    size_bytes: row.get("size_bytes"),
                    sha256: row.get("sha256"),
                },
            );
        }
        Ok(map)
    }

    pub async fn counts(&self) -> Result<(i64, i64)> {
        let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok((files, chunks))
    }

    pub async fn source_counts(&self) -> Result<Vec<SourceCount>> {
        let rows = sqlx::query(
            r#"
            SELECT f.source, COUNT(DISTINCT f.id) AS files, COUNT(c.id) AS chunks
            FROM files f
            LEFT JOIN chunks c ON c.file_id = f.id
            GROUP BY f.source
            ORDER BY f.source
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SourceCount {
                source: row.get("source"),
                files: row.get("files"),
                chunks: row.get("chunks"),
            })
            .collect())
    }

    pub async fn last_synced_at(&self) -> Result<Option<i64>> {
        let value: Option<Option<i64>> =
            sqlx::query_scalar("SELECT last_synced_at FROM index_meta WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.flatten())
    }

    /// Vector dimension recorded for the current fingerprint; 0 until the
    /// first successful embedding sync.
    pub async fn meta_dim(&self) -> Result<i64> {
        let dim: Option<i64> = sqlx::query_scalar("SELECT dim FROM index_meta WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(dim.unwrap_or(0))
    }

    /// Whether vector queries can be answered right now.
    pub async fn vector_ready(&self) -> Result<bool> {
        Ok(self.meta_dim().await? > 0)
    }

    pub async fn has_chunks(&self) -> Result<bool> {
        let (_, chunks) = self.counts().await?;
        Ok(chunks > 0)
    }

    /// Record a completed sync: dimension (when newly established) and the
    /// sync timestamp.
    pub async fn mark_synced(&self, dim: Option<i64>, timestamp: i64) -> Result<()> {
        if let Some(dim) = dim {
            sqlx::query("UPDATE index_meta SET dim = ?, last_synced_at = ? WHERE id = 1")
                .bind(dim)
                .bind(timestamp)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query("UPDATE index_meta SET last_synced_at = ? WHERE id = 1")
                .bind(timestamp)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Insert or replace one file and all of its derived rows in a single
    /// transaction. `vectors` maps chunk sha256 to its embedding.
    pub async fn replace_file(
        &self,
        entry: &ScanEntry,
        chunks: &[Chunk],
        vectors: &HashMap<String, Vec<f32>>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM files WHERE rel_path = ?")
            .bind(&entry.rel_path)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(file_id) = existing {
            if self.fts_available {
                sqlx::query(
                    "DELETE FROM chunks_fts WHERE chunk_id IN (SELECT id FROM chunks WHERE file_id = ?)",
                )
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
            }
            sqlx::query("DELETE FROM files WHERE id = ?")
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
        }

        let file_id = sqlx::query(
            "INSERT INTO files (rel_path, source, mtime_ns, size_bytes, sha256) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&entry.rel_path)
        .bind(entry.source.as_str())
        .bind(entry.mtime_ns)
        .bind(entry.size_bytes)
        .bind(&entry.sha256)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for chunk in chunks {
            let chunk_id = sqlx::query(
                "INSERT INTO chunks (file_id, chunk_index, byte_offset, byte_len, text, sha256) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(file_id)
            .bind(chunk.index)
            .bind(chunk.byte_offset)
            .bind(chunk.byte_len)
            .bind(&chunk.text)
            .bind(&chunk.sha256)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            if let Some(vector) = vectors.get(&chunk.sha256) {
                sqlx::query(
                    "INSERT INTO vectors (chunk_id, provider_id, model_id, dim, embedding) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(chunk_id)
                .bind(&self.provider_id)
                .bind(&self.model_id)
                .bind(vector.len() as i64)
                .bind(vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;
            }

            if self.fts_available {
                sqlx::query("INSERT INTO chunks_fts (chunk_id, text) VALUES (?, ?)")
                    .bind(chunk_id)
                    .bind(&chunk.text)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Delete a file; chunks and vectors cascade, FTS rows go explicitly,
    /// all in one transaction.
    pub async fn delete_file(&self, rel_path: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM files WHERE rel_path = ?")
            .bind(rel_path)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(file_id) = existing {
            if self.fts_available {
                sqlx::query(
                    "DELETE FROM chunks_fts WHERE chunk_id IN (SELECT id FROM chunks WHERE file_id = ?)",
                )
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
            }
            sqlx::query("DELETE FROM files WHERE id = ?")
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Atomically replace the entire index with the staged content. Rows
    /// are written to staging tables first; the live swap (plus FTS rebuild
    /// and meta update) is one transaction. Any failure drops staging and
    /// leaves the live tables byte-identical.
    pub async fn replace_all(
        &self,
        staged: &[StagedFile],
        vectors: &HashMap<String, Vec<f32>>,
        dim: Option<i64>,
        timestamp: i64,
    ) -> Result<()> {
        let result = self
            .replace_all_inner(staged, vectors, dim, timestamp)
            .await;
        if result.is_err() {
            self.drop_staging().await;
        }
        result
    }

    async fn replace_all_inner(
        &self,
        staged: &[StagedFile],
        vectors: &HashMap<String, Vec<f32>>,
        dim: Option<i64>,
        timestamp: i64,
    ) -> Result<()> {
        self.drop_staging().await;
        sqlx::query(
            r#"
            CREATE TABLE files_staging (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                rel_path TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL,
                mtime_ns INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                sha256 TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE chunks_staging (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id INTEGER NOT NULL,
                chunk_index INTEGER NOT NULL,
                byte_offset INTEGER NOT NULL,
                byte_len INTEGER NOT NULL,
                text TEXT NOT NULL,
                sha256 TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE vectors_staging (
                chunk_id INTEGER PRIMARY KEY,
                provider_id TEXT NOT NULL,
                model_id TEXT NOT NULL,
                dim INTEGER NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let mut tx = self.pool.begin().await?;
        for file in staged {
            let file_id = sqlx::query(
                "INSERT INTO files_staging (rel_path, source, mtime_ns, size_bytes, sha256) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&file.rel_path)
            .bind(file.source.as_str())
            .bind(file.mtime_ns)
            .bind(file.size_bytes)
            .bind(&file.sha256)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

            for chunk in &file.chunks {
                let chunk_id = sqlx::query(
                    "INSERT INTO chunks_staging (file_id, chunk_index, byte_offset, byte_len, text, sha256) VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(file_id)
                .bind(chunk.index)
                .bind(chunk.byte_offset)
                .bind(chunk.byte_len)
                .bind(&chunk.text)
                .bind(&chunk.sha256)
                .execute(&mut *tx)
                .await?
                .last_insert_rowid();

                if let Some(vector) = vectors.get(&chunk.sha256) {
                    sqlx::query(
                        "INSERT INTO vectors_staging (chunk_id, provider_id, model_id, dim, embedding) VALUES (?, ?, ?, ?, ?)",
                    )
                    .bind(chunk_id)
                    .bind(&self.provider_id)
                    .bind(&self.model_id)
                    .bind(vector.len() as i64)
                    .bind(vec_to_blob(vector))
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit().await?;

        // The swap: everything visible changes in this one transaction.
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM vectors").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM files").execute(&mut *tx).await?;
        if self.fts_available {
            sqlx::query("DELETE FROM chunks_fts").execute(&mut *tx).await?;
        }

        sqlx::query(
            "INSERT INTO files (id, rel_path, source, mtime_ns, size_bytes, sha256) SELECT id, rel_path, source, mtime_ns, size_bytes, sha256 FROM files_staging",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO chunks (id, file_id, chunk_index, byte_offset, byte_len, text, sha256) SELECT id, file_id, chunk_index, byte_offset, byte_len, text, sha256 FROM chunks_staging",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO vectors (chunk_id, provider_id, model_id, dim, embedding) SELECT chunk_id, provider_id, model_id, dim, embedding FROM vectors_staging",
        )
        .execute(&mut *tx)
        .await?;
        if self.fts_available {
            sqlx::query("INSERT INTO chunks_fts (chunk_id, text) SELECT id, text FROM chunks_staging")
                .execute(&mut *tx)
                .await?;
        }

        if let Some(dim) = dim {
            sqlx::query("UPDATE index_meta SET dim = ?, last_synced_at = ? WHERE id = 1")
                .bind(dim)
                .bind(timestamp)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query("UPDATE index_meta SET last_synced_at = ? WHERE id = 1")
                .bind(timestamp)
                .execute(&mut *tx)
                .await?;
        }

        for table in STAGING_TABLES {
            sqlx::query(&format!("DROP TABLE {}", table))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn drop_staging(&self) {
        for table in STAGING_TABLES {
            let _ = sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
                .execute(&self.pool)
                .await;
        }
    }

    /// Chunks that have no vector for the current provider/model pair.
    /// Non-empty after a model change dropped the old vector space, or
    /// when earlier embedding work was interrupted.
    pub async fn chunks_missing_vectors(&self) -> Result<Vec<(i64, String, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.sha256, c.text
            FROM chunks c
            LEFT JOIN vectors v
                ON v.chunk_id = c.id AND v.provider_id = ? AND v.model_id = ?
            WHERE v.chunk_id IS NULL
            ORDER BY c.id
            "#,
        )
        .bind(&self.provider_id)
        .bind(&self.model_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("id"), row.get("sha256"), row.get("text")))
            .collect())
    }

    /// Insert vectors for existing chunks in one transaction.
    pub async fn put_vectors(&self, entries: &[(i64, Vec<f32>)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (chunk_id, vector) in entries {
            sqlx::query(
                "INSERT OR REPLACE INTO vectors (chunk_id, provider_id, model_id, dim, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(chunk_id)
            .bind(&self.provider_id)
            .bind(&self.model_id)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Vector search over the stored embeddings. Returns
    /// `(chunk_id, cosine ∈ [-1, 1])` sorted best-first. Delegates to the
    /// native extension when one answered the probe; otherwise brute-force
    /// scans the vector rows.
    pub async fn vector_search(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f64)>> {
        if query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        if self.vec_extension {
            let rows = sqlx::query(
                r#"
                SELECT chunk_id, 1.0 - vec_distance_cosine(embedding, ?) AS score
                FROM vectors
                WHERE provider_id = ? AND model_id = ?
                ORDER BY score DESC
                LIMIT ?
                "#,
            )
            .bind(vec_to_blob(query))
            .bind(&self.provider_id)
            .bind(&self.model_id)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await?;

            return Ok(rows
                .iter()
                .map(|row| (row.get::<i64, _>("chunk_id"), row.get::<f64, _>("score")))
                .collect());
        }

        let rows = sqlx::query(
            "SELECT chunk_id, embedding FROM vectors WHERE provider_id = ? AND model_id = ?",
        )
        .bind(&self.provider_id)
        .bind(&self.model_id)
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(i64, f64)> = rows
            .iter()
            .map(|row| {
                let chunk_id: i64 = row.get("chunk_id");
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query, &blob_to_vec(&blob));
                (chunk_id, similarity as f64)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Full-text search via FTS5 BM25. Returns `(chunk_id, raw_score)`
    /// where higher is better; the query planner min-max normalizes the
    /// batch. Empty when FTS is unavailable or the query has no usable
    /// terms.
    pub async fn text_search(&self, query: &str, k: usize) -> Result<Vec<(i64, f64)>> {
        if !self.fts_available || k == 0 {
            return Ok(Vec::new());
        }
        let escaped = escape_fts_query(query);
        if escaped.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT chunk_id, bm25(chunks_fts) AS rank
            FROM chunks_fts
            WHERE chunks_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&escaped)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let chunk_id: i64 = row.get("chunk_id");
                let rank: f64 = row.get("rank");
                (chunk_id, -rank)
            })
            .collect())
    }

    /// Fetch the file context for one chunk, used to hydrate results.
    pub async fn load_chunk_context(
        &self,
        chunk_id: i64,
    ) -> Result<Option<(String, Source, i64, String)>> {
        let row = sqlx::query(
            r#"
            SELECT f.rel_path, f.source, c.byte_offset, c.text
            FROM chunks c
            JOIN files f ON f.id = c.file_id
            WHERE c.id = ?
            "#,
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let source = Source::parse(row.get::<String, _>("source").as_str())
                .unwrap_or(Source::Workspace);
            (
                row.get("rel_path"),
                source,
                row.get("byte_offset"),
                row.get("text"),
            )
        }))
    }
}

/// Escape a free-form query for FTS5: each word quoted, joined with OR.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| format!("\"{}\"", w.replace('"', "")))
        .filter(|w| w.len() > 2)
        .collect::<Vec<_>>()
        .join(" OR ")
}
