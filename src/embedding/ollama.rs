//! Ollama-compatible embedding provider with endpoint fallback.
//!
//! Ollama hosts differ in which embedding surface they expose: newer builds
//! accept OpenAI-style batched `/v1/embeddings`, older ones only the native
//! `/api/embed` (batch) or `/api/embeddings` (one prompt at a time). Rather
//! than probing versions, the provider walks an explicit preference state
//! machine:
//!
//! ```text
//! openai-batch → openai-single → ollama-embed → ollama-embeddings
//! ```
//!
//! Retryable transport failures are retried in place with exponential
//! backoff. A response that marks the endpoint itself as unsupported
//! (404/405/501, or an error body saying not found/unsupported/
//! unrecognized/invalid) advances the machine to the next state. The first
//! state that succeeds is latched and later calls start there.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::ProviderTransportConfig;
use crate::error::{Error, Result};

use super::{
    backoff_delay, is_retryable_message, is_unsupported_endpoint, parse_embedding_response,
    EmbeddingProvider, MAX_ATTEMPTS,
};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// One state of the endpoint preference machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endpoint {
    OpenAiBatch,
    OpenAiSingle,
    OllamaEmbed,
    OllamaEmbeddings,
}

impl Endpoint {
    pub(crate) fn next(self) -> Option<Endpoint> {
        match self {
            Endpoint::OpenAiBatch => Some(Endpoint::OpenAiSingle),
            Endpoint::OpenAiSingle => Some(Endpoint::OllamaEmbed),
            Endpoint::OllamaEmbed => Some(Endpoint::OllamaEmbeddings),
            Endpoint::OllamaEmbeddings => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Endpoint::OpenAiBatch => "openai-batch",
            Endpoint::OpenAiSingle => "openai-single",
            Endpoint::OllamaEmbed => "ollama-embed",
            Endpoint::OllamaEmbeddings => "ollama-embeddings",
        }
    }
}

/// How a single endpoint attempt failed.
enum EndpointFailure {
    /// This endpoint does not exist on the host; advance the machine.
    Unsupported(Error),
    /// A real failure; surface it.
    Fatal(Error),
}

pub struct OllamaProvider {
    client: reqwest::Client,
    /// OpenAI-compatible base, always carrying a path (usually `/v1`).
    openai_base: String,
    /// Native API base: the OpenAI base with a trailing `/v1` stripped.
    native_base: String,
    model: String,
    api_key: Option<String>,
    headers: Vec<(String, String)>,
    preference: Mutex<Endpoint>,
}

impl OllamaProvider {
    pub fn new(
        transport: Option<&ProviderTransportConfig>,
        model: String,
        timeout: Duration,
    ) -> Result<OllamaProvider> {
        let configured = transport.and_then(|t| t.base_url.clone());
        let raw = configured.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let trimmed = raw.trim_end_matches('/');
        let url = reqwest::Url::parse(trimmed)
            .map_err(|e| Error::ConfigInvalid(format!("bad provider base url '{}': {}", raw, e)))?;

        let openai_base = if url.path().is_empty() || url.path() == "/" {
            format!("{}/v1", trimmed)
        } else {
            trimmed.to_string()
        };
        let native_base = openai_base.trim_end_matches("/v1").to_string();

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ProviderRequestFailed(format!("http client init: {}", e)))?;

        Ok(OllamaProvider {
            client,
            openai_base,
            native_base,
            model,
            api_key: transport.and_then(|t| t.api_key.clone()),
            headers: transport
                .map(|t| t.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
            preference: Mutex::new(Endpoint::OpenAiBatch),
        })
    }

    fn latched(&self) -> Endpoint {
        *self.preference.lock().unwrap()
    }

    fn latch(&self, endpoint: Endpoint) {
        let mut preference = self.preference.lock().unwrap();
        if *preference != endpoint {
            tracing::debug!(endpoint = endpoint.label(), "latched embedding endpoint");
            *preference = endpoint;
        }
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut state = self.latched();
        loop {
            match self.call_endpoint(state, texts).await {
                Ok(vectors) => {
                    self.latch(state);
                    return Ok(vectors);
                }
                Err(EndpointFailure::Unsupported(err)) => match state.next() {
                    Some(next) => {
                        tracing::debug!(
                            from = state.label(),
                            to = next.label(),
                            error = %err,
                            "embedding endpoint unsupported, falling back"
                        );
                        state = next;
                    }
                    None => return Err(err),
                },
                Err(EndpointFailure::Fatal(err)) => return Err(err),
            }
        }
    }

    async fn call_endpoint(
        &self,
        endpoint: Endpoint,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, EndpointFailure> {
        match endpoint {
            Endpoint::OpenAiBatch => {
                let url = format!("{}/embeddings", self.openai_base);
                let body = json!({ "model": self.model, "input": texts });
                let vectors = self.post_with_retry(&url, &body).await?;
                expect_count(vectors, texts.len())
            }
            Endpoint::OpenAiSingle => {
                let url = format!("{}/embeddings", self.openai_base);
                let mut out = Vec::with_capacity(texts.len());
                for text in texts {
                    let body = json!({ "model": self.model, "input": text });
                    let mut vectors = self.post_with_retry(&url, &body).await?;
                    if vectors.is_empty() {
                        return Err(EndpointFailure::Fatal(Error::ProviderRequestFailed(
                            "empty embedding response".into(),
                        )));
                    }
                    out.push(vectors.remove(0));
                }
                Ok(out)
            }
            Endpoint::OllamaEmbed => {
                let url = format!("{}/api/embed", self.native_base);
                let body = json!({ "model": self.model, "input": texts });
                let vectors = self.post_with_retry(&url, &body).await?;
                expect_count(vectors, texts.len())
            }
            Endpoint::OllamaEmbeddings => {
                let url = format!("{}/api/embeddings", self.native_base);
                let mut out = Vec::with_capacity(texts.len());
                for text in texts {
                    let body = json!({ "model": self.model, "prompt": text });
                    let mut vectors = self.post_with_retry(&url, &body).await?;
                    if vectors.is_empty() {
                        return Err(EndpointFailure::Fatal(Error::ProviderRequestFailed(
                            "empty embedding response".into(),
                        )));
                    }
                    out.push(vectors.remove(0));
                }
                Ok(out)
            }
        }
    }

    /// POST one body, retrying retryable failures in place.
    async fn post_with_retry(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<Vec<Vec<f32>>, EndpointFailure> {
        let mut last_err: Option<Error> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }

            let mut request = self.client.post(url).json(body);
            if let Some(ref key) = self.api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }
            for (name, value) in &self.headers {
                request = request.header(name.as_str(), value.as_str());
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    let message = e.to_string();
                    if e.is_timeout() || e.is_connect() || is_retryable_message(&message) {
                        last_err = Some(Error::ProviderRequestFailed(message));
                        continue;
                    }
                    return Err(EndpointFailure::Fatal(Error::ProviderRequestFailed(message)));
                }
            };

            let status = response.status().as_u16();
            if (200..300).contains(&status) {
                let json: serde_json::Value = response.json().await.map_err(|e| {
                    EndpointFailure::Fatal(Error::ProviderRequestFailed(e.to_string()))
                })?;
                return parse_embedding_response(&json).map_err(EndpointFailure::Fatal);
            }

            let text = response.text().await.unwrap_or_default();
            if is_unsupported_endpoint(status, &text) {
                return Err(EndpointFailure::Unsupported(Error::ProviderHttpError {
                    status,
                    message: text,
                }));
            }
            if status >= 500 && is_retryable_message(&text) {
                last_err = Some(Error::ProviderHttpError {
                    status,
                    message: text,
                });
                continue;
            }
            return Err(EndpointFailure::Fatal(Error::ProviderHttpError {
                status,
                message: text,
            }));
        }

        Err(EndpointFailure::Fatal(Error::ProviderRequestFailed(
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "embedding request failed".into()),
        )))
    }
}

fn expect_count(
    vectors: Vec<Vec<f32>>,
    expected: usize,
) -> std::result::Result<Vec<Vec<f32>>, EndpointFailure> {
    if vectors.len() != expected {
        return Err(EndpointFailure::Fatal(Error::ProviderRequestFailed(format!(
            "embedding count mismatch: sent {}, got {}",
            expected,
            vectors.len()
        ))));
    }
    Ok(vectors)
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn id(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_texts(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::ProviderRequestFailed("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_texts(texts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_order() {
        assert_eq!(Endpoint::OpenAiBatch.next(), Some(Endpoint::OpenAiSingle));
        assert_eq!(Endpoint::OpenAiSingle.next(), Some(Endpoint::OllamaEmbed));
        assert_eq!(Endpoint::OllamaEmbed.next(), Some(Endpoint::OllamaEmbeddings));
        assert_eq!(Endpoint::OllamaEmbeddings.next(), None);
    }

    #[test]
    fn base_urls_derived_from_bare_host() {
        let provider =
            OllamaProvider::new(None, "nomic-embed-text".into(), Duration::from_secs(5)).unwrap();
        assert_eq!(provider.openai_base, "http://localhost:11434/v1");
        assert_eq!(provider.native_base, "http://localhost:11434");
    }

    #[test]
    fn base_urls_respect_explicit_v1() {
        let transport = ProviderTransportConfig {
            base_url: Some("http://10.0.0.5:11434/v1".into()),
            api_key: None,
            headers: Default::default(),
        };
        let provider = OllamaProvider::new(
            Some(&transport),
            "nomic-embed-text".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(provider.openai_base, "http://10.0.0.5:11434/v1");
        assert_eq!(provider.native_base, "http://10.0.0.5:11434");
    }

    #[test]
    fn initial_preference_is_openai_batch() {
        let provider =
            OllamaProvider::new(None, "nomic-embed-text".into(), Duration::from_secs(5)).unwrap();
        assert_eq!(provider.latched(), Endpoint::OpenAiBatch);
        provider.latch(Endpoint::OllamaEmbed);
        assert_eq!(provider.latched(), Endpoint::OllamaEmbed);
    }
}
