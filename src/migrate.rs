//! Schema creation and migration.
//!
//! # Schema
//!
//! ```text
//! ┌──────────────┐     ┌───────────────┐     ┌──────────────┐
//! │    files     │──┐  │    chunks     │──┐  │   vectors    │
//! │ id (PK)      │  │  │ id (PK)       │  │  │ chunk_id(PK) │
//! │ rel_path  UQ │  └──│ file_id  (FK) │  └──│ provider_id  │
//! │ source       │     │ chunk_index   │     │ model_id     │
//! │ mtime_ns     │     │ byte_offset   │     │ dim          │
//! │ size_bytes   │     │ byte_len      │     │ embedding    │
//! │ sha256       │     │ text          │     └──────────────┘
//! └──────────────┘     │ sha256        │
//!                      └───────────────┘
//! ┌──────────────┐     ┌───────────────┐     ┌─────────────────┐
//! │  index_meta  │     │  chunks_fts   │     │ embedding_cache │
//! │ id = 1       │     │  (FTS5)       │     │ provider_id     │
//! │ schema_ver   │     │ chunk_id      │     │ model_id        │
//! │ fingerprint  │     │ text          │     │ chunk_sha256    │
//! │ dim          │     └───────────────┘     │ embedding       │
//! │ created_at   │                           │ last_used_at    │
//! │ last_synced  │                           └─────────────────┘
//! └──────────────┘
//! ```
//!
//! Deletes cascade files → chunks → vectors; FTS rows are removed
//! explicitly in the same transaction because virtual tables carry no
//! foreign keys.
//!
//! Opening the store also:
//! - drops `*_staging` tables left behind by a crashed forced reindex;
//! - probes for the FTS5 module and a native vector extension;
//! - compares the stored embedding-model fingerprint against the
//!   configured one and drops all vectors on mismatch (they belong to a
//!   different vector space and must be recomputed).

use sqlx::sqlite::SqlitePool;

use crate::error::{Error, Result};

pub const SCHEMA_VERSION: i64 = 1;

/// Capabilities and state discovered while opening the store.
#[derive(Debug, Clone, Copy)]
pub struct OpenReport {
    pub fts_available: bool,
    /// Whether a native vector extension answered the probe.
    pub vec_extension: bool,
    /// True when a fingerprint change forced the vector rows out.
    pub vectors_dropped: bool,
}

pub(crate) const STAGING_TABLES: &[&str] = &["files_staging", "chunks_staging", "vectors_staging"];

/// Create or migrate the schema in place.
pub async fn open_store(pool: &SqlitePool, fingerprint: &str) -> Result<OpenReport> {
    // A crashed forced reindex can leave staging behind; it is never
    // authoritative.
    for table in STAGING_TABLES {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(pool)
            .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rel_path TEXT NOT NULL UNIQUE,
            source TEXT NOT NULL,
            mtime_ns INTEGER NOT NULL,
            size_bytes INTEGER NOT NULL,
            sha256 TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            chunk_index INTEGER NOT NULL,
            byte_offset INTEGER NOT NULL,
            byte_len INTEGER NOT NULL,
            text TEXT NOT NULL,
            sha256 TEXT NOT NULL,
            UNIQUE(file_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            chunk_id INTEGER PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
            provider_id TEXT NOT NULL,
            model_id TEXT NOT NULL,
            dim INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            schema_version INTEGER NOT NULL,
            model_fingerprint TEXT NOT NULL,
            dim INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            last_synced_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_cache (
            provider_id TEXT NOT NULL,
            model_id TEXT NOT NULL,
            chunk_sha256 TEXT NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            last_used_at INTEGER NOT NULL,
            PRIMARY KEY (provider_id, model_id, chunk_sha256)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file_id ON chunks(file_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_source ON files(source)")
        .execute(pool)
        .await?;

    let fts_available = ensure_fts(pool).await;
    let vec_extension = probe_vector_extension(pool).await;

    let meta: Option<(i64, String)> =
        sqlx::query_as("SELECT schema_version, model_fingerprint FROM index_meta WHERE id = 1")
            .fetch_optional(pool)
            .await?;

    let now = chrono::Utc::now().timestamp();
    let mut vectors_dropped = false;

    match meta {
        None => {
            sqlx::query(
                r#"
                INSERT INTO index_meta (id, schema_version, model_fingerprint, dim, created_at, last_synced_at)
                VALUES (1, ?, ?, 0, ?, NULL)
                "#,
            )
            .bind(SCHEMA_VERSION)
            .bind(fingerprint)
            .bind(now)
            .execute(pool)
            .await?;
        }
        Some((version, _)) if version > SCHEMA_VERSION => {
            return Err(Error::StoreCorrupt(format!(
                "store schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }
        Some((_, stored_fingerprint)) if stored_fingerprint != fingerprint => {
            tracing::info!(
                from = %stored_fingerprint,
                to = %fingerprint,
                "embedding model changed, dropping stored vectors"
            );
            let mut tx = pool.begin().await?;
            sqlx::query("DELETE FROM vectors").execute(&mut *tx).await?;
            sqlx::query("UPDATE index_meta SET model_fingerprint = ?, dim = 0 WHERE id = 1")
                .bind(fingerprint)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            vectors_dropped = true;
        }
        Some(_) => {}
    }

    let integrity: String = sqlx::query_scalar("PRAGMA quick_check")
        .fetch_one(pool)
        .await?;
    if integrity != "ok" {
        return Err(Error::StoreCorrupt(format!(
            "integrity check failed: {}",
            integrity
        )));
    }

    tracing::debug!(fts_available, vec_extension, "store opened");
    Ok(OpenReport {
        fts_available,
        vec_extension,
        vectors_dropped,
    })
}

/// Create the FTS5 virtual table if the module is present. Returns whether
/// full-text search is usable.
async fn ensure_fts(pool: &SqlitePool) -> bool {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'chunks_fts'",
    )
    .fetch_one(pool)
    .await
    .unwrap_or(false);
    if exists {
        return true;
    }

    let created = sqlx::query(
        r#"
        CREATE VIRTUAL TABLE chunks_fts USING fts5(
            chunk_id UNINDEXED,
            text,
            tokenize = 'porter unicode61'
        )
        "#,
    )
    .execute(pool)
    .await;

    match created {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "fts5 unavailable, keyword search disabled");
            false
        }
    }
}

/// Probe for a preloaded native vector extension (sqlite-vec). The stock
/// bundled build does not ship one, in which case vector search falls back
/// to a brute-force cosine scan.
async fn probe_vector_extension(pool: &SqlitePool) -> bool {
    sqlx::query_scalar::<_, String>("SELECT vec_version()")
        .fetch_one(pool)
        .await
        .is_ok()
}
