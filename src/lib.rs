//! # memsearch
//!
//! **A persistent, incrementally-synced hybrid search index over an agent's
//! notes and workspace files.**
//!
//! Given a natural-language query, memsearch returns ranked passages,
//! blending dense vector similarity against text embeddings with a lexical
//! full-text (BM25) score. The index lives in a single SQLite file and is
//! kept in sync with the filesystem by an incremental scanner.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌───────────────────┐   ┌───────────┐
//! │  Scanner   │──▶│ Chunker  │──▶│ Cache ∪ Provider  │──▶│  SQLite   │
//! │ (walk+glob)│   │ (windows)│   │ (openai / ollama) │   │ FTS5+vec  │
//! └───────────┘   └──────────┘   └───────────────────┘   └─────┬─────┘
//!                                                              │
//!                                    query ──▶ embed ─┐        │
//!                                    query ──▶ tokens ─┴──▶ planner ──▶ ranked passages
//! ```
//!
//! ## Data Flow
//!
//! 1. The **scanner** ([`scanner`]) walks the workspace and extra roots,
//!    applying glob filters and size caps, hashing only files whose
//!    `(path, mtime, size)` changed. Every path passes the **path gate**
//!    ([`path_gate`]), the same sandbox used by `read_file`.
//! 2. The **chunker** ([`chunk`]) splits file text into deterministic
//!    overlapping windows with byte offsets.
//! 3. Chunks are embedded through an **embedding provider** ([`embedding`]),
//!    consulting a persistent content-hash **cache** ([`cache`]) first.
//! 4. The **sync engine** ([`sync`]) reconciles all of this with the
//!    **store** ([`store`]): per-file transactions incrementally, or an
//!    atomic staging-table swap for forced rebuilds.
//! 5. The **query planner** ([`search`]) fuses vector and keyword
//!    candidates into one ranked list, degrading gracefully when either
//!    side is unavailable.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use memsearch::{Config, SearchManager, SearchOptions, SyncOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> memsearch::Result<()> {
//! let config: Config = toml::from_str(r#"
//!     workspace = "/home/user/agent"
//!
//!     [memory_search]
//!     provider = "ollama"
//!
//!     [memory_search.store]
//!     path = "/home/user/.agent/memsearch"
//! "#).unwrap();
//!
//! let manager = SearchManager::open(config).await?;
//! let cancel = CancellationToken::new();
//! manager.sync(SyncOptions::default(), &cancel).await?;
//! let hits = manager.search("what did we decide about retries?",
//!     SearchOptions::default(), &cancel).await?;
//! for hit in hits {
//!     println!("[{:.2}] {}: {}", hit.score, hit.path, hit.text);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Configuration tree, defaults, and validation |
//! | [`error`] | Tagged error kinds shared by every public method |
//! | [`models`] | Core data types: chunks, reports, search results |
//! | [`path_gate`] | Sandbox confining all file access to allowed roots |
//! | [`scanner`] | Incremental file enumeration with lazy hashing |
//! | [`chunk`] | Deterministic overlapping-window chunker |
//! | [`embedding`] | Provider trait, OpenAI/Ollama transports, fallback state machine |
//! | [`cache`] | Persistent `(provider, model, sha256)` → vector cache |
//! | [`db`] / [`migrate`] | SQLite pool, schema, probes, fingerprint migration |
//! | [`store`] | Row operations, staging swap, vector + FTS queries |
//! | [`sync`] | Incremental reconcile and atomic forced reindex |
//! | [`search`] | Hybrid score fusion and result hydration |
//! | [`manager`] | Facade: `sync`, `search`, `read_file`, `status`, `close` |

pub mod cache;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod manager;
pub mod migrate;
pub mod models;
pub mod path_gate;
pub mod scanner;
pub mod search;
pub mod store;
pub mod sync;

pub use config::{load_config, Config, ProviderKind};
pub use embedding::EmbeddingProvider;
pub use error::{Error, Result};
pub use manager::SearchManager;
pub use models::{
    SearchOptions, SearchResult, Source, StatusReport, SyncOptions, SyncReport,
};
