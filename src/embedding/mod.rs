//! Embedding provider abstraction and shared transport helpers.
//!
//! Two concrete providers share this module's plumbing:
//! - **[`openai::OpenAiProvider`]** — any OpenAI-compatible `/embeddings`
//!   endpoint with Bearer auth.
//! - **[`ollama::OllamaProvider`]** — an Ollama host, reached through an
//!   endpoint-preference state machine that falls back from the
//!   OpenAI-compatible surface to the native `/api/embed` and
//!   `/api/embeddings` endpoints, latching whichever first succeeds.
//!
//! Also provides the vector utilities used by the store:
//! [`vec_to_blob`], [`blob_to_vec`], [`cosine_similarity`],
//! [`is_zero_vector`].

pub mod ollama;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{Error, Result};

/// Trait implemented by all embedding backends.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable provider id (`"openai"`, `"ollama"`), half of the model
    /// fingerprint.
    fn id(&self) -> &str;

    /// Model id, the other half of the fingerprint.
    fn model(&self) -> &str;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, preserving input order. Empty input yields
    /// an empty output without any network call.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the provider selected by the configuration.
pub fn create_provider(config: &Config) -> Result<Arc<dyn EmbeddingProvider>> {
    let model = config.model().to_string();
    let transport = config.provider_transport();
    let timeout = Duration::from_secs(config.memory_search.sync.request_timeout_secs);

    match config.memory_search.provider {
        crate::config::ProviderKind::Openai => Ok(Arc::new(openai::OpenAiProvider::new(
            transport, model, timeout,
        )?)),
        crate::config::ProviderKind::Ollama => Ok(Arc::new(ollama::OllamaProvider::new(
            transport, model, timeout,
        )?)),
    }
}

/// Maximum attempts per endpoint before a retryable failure surfaces.
pub(crate) const MAX_ATTEMPTS: u32 = 3;

/// Exponential backoff: 150 ms · 2^(attempt−1).
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(150u64 << (attempt.saturating_sub(1)).min(16))
}

/// Substrings that mark a transport-level failure as retryable.
const RETRYABLE_PATTERNS: &[&str] = &[
    "eof",
    "epipe",
    "econnreset",
    "econnrefused",
    "timeout",
    "socket hang up",
    "dial tcp",
    "broken pipe",
    "connection refused",
    "connection reset",
];

/// Classify an error message against the retryable pattern set.
pub(crate) fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Substrings in an HTTP error body that mean "this endpoint does not
/// exist / does not speak this dialect", triggering endpoint fallback.
const UNSUPPORTED_PATTERNS: &[&str] = &["not found", "unsupported", "unrecognized", "invalid"];

/// Whether a `(status, body)` pair indicates an unsupported endpoint rather
/// than a genuine request failure.
pub(crate) fn is_unsupported_endpoint(status: u16, body: &str) -> bool {
    if matches!(status, 404 | 405 | 501) {
        return true;
    }
    if status >= 400 {
        let lower = body.to_lowercase();
        return UNSUPPORTED_PATTERNS.iter().any(|p| lower.contains(p));
    }
    false
}

/// Parse an embedding response body. Accepts all of:
/// `{"data": [{"embedding": [...]}]}`, `{"embeddings": [[...]]}` and
/// `{"embedding": [...]}`.
pub(crate) fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    if let Some(data) = json.get("data").and_then(|d| d.as_array()) {
        let mut out = Vec::with_capacity(data.len());
        for item in data {
            let values = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| {
                    Error::ProviderRequestFailed("response item missing 'embedding'".into())
                })?;
            out.push(values_to_f32(values));
        }
        return Ok(out);
    }

    if let Some(embeddings) = json.get("embeddings").and_then(|e| e.as_array()) {
        let mut out = Vec::with_capacity(embeddings.len());
        for values in embeddings {
            let values = values.as_array().ok_or_else(|| {
                Error::ProviderRequestFailed("'embeddings' entry is not an array".into())
            })?;
            out.push(values_to_f32(values));
        }
        return Ok(out);
    }

    if let Some(values) = json.get("embedding").and_then(|e| e.as_array()) {
        return Ok(vec![values_to_f32(values)]);
    }

    Err(Error::ProviderRequestFailed(
        "unrecognized embedding response shape".into(),
    ))
}

fn values_to_f32(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// A zero vector carries no direction information; the query planner treats
/// it as "no query embedding".
pub fn is_zero_vector(v: &[f32]) -> bool {
    v.iter().all(|&x| x == 0.0)
}
