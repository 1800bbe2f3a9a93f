//! OpenAI-compatible embedding provider.
//!
//! Speaks `POST <base>/embeddings` with `{"model", "input"}`. The base URL
//! defaults to the hosted OpenAI API; third-party compatibles (LM Studio,
//! vLLM, gateway proxies) are configured through
//! `models.providers.openai.base_url`. A missing API key is fatal only when
//! talking to the hosted default — compatibles frequently run keyless.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::ProviderTransportConfig;
use crate::error::{Error, Result};

use super::{
    backoff_delay, is_retryable_message, parse_embedding_response, EmbeddingProvider,
    MAX_ATTEMPTS,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    headers: Vec<(String, String)>,
}

impl OpenAiProvider {
    pub fn new(
        transport: Option<&ProviderTransportConfig>,
        model: String,
        timeout: Duration,
    ) -> Result<OpenAiProvider> {
        let configured = transport.and_then(|t| t.base_url.clone());
        let base_url = normalize_base_url(configured.as_deref().unwrap_or(DEFAULT_BASE_URL))?;

        let api_key = transport.and_then(|t| t.api_key.clone());
        let headers: Vec<(String, String)> = transport
            .map(|t| t.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        let has_auth_override = headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("authorization"));

        if api_key.is_none() && !has_auth_override && base_url == DEFAULT_BASE_URL {
            return Err(Error::ProviderAuthMissing(
                "api key required for the hosted OpenAI endpoint".into(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ProviderRequestFailed(format!("http client init: {}", e)))?;

        Ok(OpenAiProvider {
            client,
            endpoint: format!("{}/embeddings", base_url),
            model,
            api_key,
            headers,
        })
    }

    async fn request(&self, input: serde_json::Value) -> Result<Vec<Vec<f32>>> {
        let body = json!({ "model": self.model, "input": input });
        let mut last_err: Option<Error> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }

            let mut request = self.client.post(&self.endpoint).json(&body);
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
                    return Err(Error::ProviderRequestFailed(message));
                }
            };

            let status = response.status();
            if status.is_success() {
                let json: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| Error::ProviderRequestFailed(e.to_string()))?;
                return parse_embedding_response(&json);
            }

            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || status.is_server_error() {
                last_err = Some(Error::ProviderHttpError {
                    status: status.as_u16(),
                    message: text,
                });
                continue;
            }
            return Err(Error::ProviderHttpError {
                status: status.as_u16(),
                message: text,
            });
        }

        Err(match last_err {
            Some(Error::ProviderHttpError { status, message }) => {
                Error::ProviderHttpError { status, message }
            }
            Some(e) => Error::ProviderRequestFailed(e.to_string()),
            None => Error::ProviderRequestFailed("embedding request failed".into()),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn id(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(json!(text)).await?;
        if vectors.is_empty() {
            return Err(Error::ProviderRequestFailed("empty embedding response".into()));
        }
        Ok(vectors.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.request(json!(texts)).await?;
        if vectors.len() != texts.len() {
            return Err(Error::ProviderRequestFailed(format!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

/// Normalize a configured base URL: strip the trailing slash and, when the
/// URL carries no path at all, extend it with `/v1`.
fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim_end_matches('/');
    let url = reqwest::Url::parse(trimmed)
        .map_err(|e| Error::ConfigInvalid(format!("bad provider base url '{}': {}", raw, e)))?;
    if url.path().is_empty() || url.path() == "/" {
        Ok(format!("{}/v1", trimmed))
    } else {
        Ok(trimmed.to_string())
    }
}
