//! Core data types used throughout the index.
//!
//! The data lifecycle is:
//!
//! ```text
//! Scanner → ScanEntry → chunk() → Chunk → embed() → vector
//!                                    ↓
//!                               search() → SearchResult
//! ```
//!
//! All timestamps are Unix epoch seconds except file mtimes, which keep
//! nanosecond precision so that fast successive edits are still detected.

use serde::Serialize;

/// Which allowed root a file was found under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Files under a `memory/` directory or the `MEMORY.md` sentinel.
    Memory,
    /// Other files under the workspace root.
    Workspace,
    /// Files under a configured extra root.
    Extra,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Memory => "memory",
            Source::Workspace => "workspace",
            Source::Extra => "extra",
        }
    }

    pub fn parse(s: &str) -> Option<Source> {
        match s {
            "memory" => Some(Source::Memory),
            "workspace" => Some(Source::Workspace),
            "extra" => Some(Source::Extra),
            _ => None,
        }
    }
}

/// A file accepted by the scanner, ready for reconciliation with the store.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    /// Root-relative path, forward slashes, no `.`/`..` components.
    pub rel_path: String,
    pub source: Source,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: i64,
    pub size_bytes: i64,
    /// SHA-256 of the file content, lowercase hex.
    pub sha256: String,
    /// Full text, present only when the file was (re)read this scan.
    /// `None` means the stored record is current and the body was skipped.
    pub text: Option<String>,
}

/// A bounded text window extracted from a file; the unit of embedding and
/// retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Zero-based index within the file's chunk sequence.
    pub index: i64,
    /// Byte offset of the chunk text in the original file content.
    pub byte_offset: i64,
    /// Byte length of the chunk text.
    pub byte_len: i64,
    pub text: String,
    /// SHA-256 of `text`, lowercase hex; cache and dedup key.
    pub sha256: String,
}

/// A ranked passage returned by [`crate::SearchManager::search`].
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// Root-relative path of the containing file.
    pub path: String,
    pub source: Source,
    /// Byte offset of the passage within the file.
    pub byte_offset: i64,
    pub text: String,
    /// Fused relevance score.
    pub score: f64,
}

/// Per-source breakdown reported by [`StatusReport`].
#[derive(Debug, Clone, Serialize)]
pub struct SourceCount {
    pub source: String,
    pub files: i64,
    pub chunks: i64,
}

/// Vector-search availability as reported by status.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct VectorStatus {
    /// Whether vector search is enabled by configuration.
    pub enabled: bool,
    /// Whether the store can answer vector queries right now (vectors are
    /// indexed for the configured embedding model).
    pub available: bool,
}

/// Full-text availability as reported by status.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FtsStatus {
    pub available: bool,
}

/// Snapshot of the index returned by [`crate::SearchManager::status`].
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub files: i64,
    pub chunks: i64,
    pub source_counts: Vec<SourceCount>,
    pub vector: VectorStatus,
    pub fts: FtsStatus,
    /// Unix seconds of the last successful sync, if any.
    pub last_synced_at: Option<i64>,
    /// Embedding model fingerprint: `provider_id + "/" + model_id`.
    pub embedding_model: String,
}

/// Summary of a completed sync run, shared by every coalesced waiter.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub files_scanned: u64,
    pub files_added: u64,
    pub files_updated: u64,
    pub files_deleted: u64,
    pub chunks_indexed: u64,
    pub vectors_embedded: u64,
    pub vectors_from_cache: u64,
    pub duration_ms: u64,
}

/// Options for [`crate::SearchManager::sync`].
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Rebuild the whole index atomically instead of reconciling.
    pub force: bool,
    /// Free-form reason recorded in the sync log line.
    pub reason: Option<String>,
}

/// Per-call overrides for [`crate::SearchManager::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub max_results: Option<usize>,
    pub min_score: Option<f64>,
}
