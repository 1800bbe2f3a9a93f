//! Error types for the memory search index.
//!
//! Every public operation fails with a tagged [`Error`]; [`Error::kind`]
//! returns the stable machine-readable tag for a variant, which is what
//! embedding applications should branch on. The `Display` output is for
//! humans and may change between releases.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Main error type for the memsearch crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or contradictory configuration.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A path was rejected by the sandbox (outside allowed roots, escaping
    /// symlink, or over the size cap).
    #[error("path denied: {0}")]
    PathDenied(String),

    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Database failure while reading or writing the index store.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Schema mismatch or integrity failure that migration cannot fix.
    #[error("store corrupt: {0}")]
    StoreCorrupt(String),

    /// The embedding provider requires an API key that was not configured.
    #[error("embedding provider auth missing: {0}")]
    ProviderAuthMissing(String),

    /// The embedding provider answered with a non-retryable HTTP status.
    #[error("embedding provider http error ({status}): {message}")]
    ProviderHttpError { status: u16, message: String },

    /// The embedding request could not be completed (transport failure,
    /// retries exhausted).
    #[error("embedding provider request failed: {0}")]
    ProviderRequestFailed(String),

    /// A returned vector's length disagrees with the dimension established
    /// for this index.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    ProviderDimMismatch { expected: usize, actual: usize },

    /// The operation was cancelled via its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// An error produced by a coalesced sync run and shared between all
    /// waiters.
    #[error(transparent)]
    Shared(#[from] Arc<Error>),
}

impl Error {
    /// Stable tag identifying the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ConfigInvalid(_) => "config_invalid",
            Error::PathDenied(_) => "path_denied",
            Error::Io(_) => "io_error",
            Error::Store(_) => "io_error",
            Error::StoreCorrupt(_) => "store_corrupt",
            Error::ProviderAuthMissing(_) => "provider_auth_missing",
            Error::ProviderHttpError { .. } => "provider_http_error",
            Error::ProviderRequestFailed(_) => "provider_request_failed",
            Error::ProviderDimMismatch { .. } => "provider_dim_mismatch",
            Error::Cancelled => "cancelled",
            Error::Shared(inner) => inner.kind(),
        }
    }
}

/// Standard result type using [`enum@Error`] as the default error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
