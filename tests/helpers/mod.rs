//! Shared fixtures for integration tests: a temp workspace/store pair and
//! a family of deterministic or fault-injecting embedding providers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use memsearch::{Config, EmbeddingProvider, Error, Result};

/// A temp workspace + store directory pair with a ready-to-use config.
pub struct TestEnv {
    pub tmp: TempDir,
    pub config: Config,
}

impl TestEnv {
    pub fn new() -> TestEnv {
        let tmp = TempDir::new().unwrap();
        let workspace = tmp.path().join("workspace");
        let store = tmp.path().join("store");
        std::fs::create_dir_all(workspace.join("memory")).unwrap();

        let config: Config = toml::from_str(&format!(
            r#"
            workspace = "{}"

            [memory_search]
            provider = "openai"

            [memory_search.store]
            path = "{}"
            "#,
            workspace.display(),
            store.display()
        ))
        .unwrap();

        TestEnv { tmp, config }
    }

    pub fn workspace(&self) -> std::path::PathBuf {
        self.config.workspace.clone()
    }

    pub fn store_dir(&self) -> std::path::PathBuf {
        self.config.memory_search.store.path.clone()
    }

    pub fn write(&self, rel_path: &str, content: &str) {
        let path = self.workspace().join(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn remove(&self, rel_path: &str) {
        std::fs::remove_file(self.workspace().join(rel_path)).unwrap();
    }

    /// Write the "Alpha/Zebra" memory corpus used by several tests.
    pub fn write_memory_corpus(&self) {
        self.write(
            "memory/2026-01-12.md",
            "# Log\nAlpha memory line.\nZebra memory line.\nAnother line.\n",
        );
        self.write("MEMORY.md", "Beta knowledge base entry.\n");
    }
}

/// Deterministic bag-of-words embedding. Each distinct lowercase token gets
/// its own dimension (assigned on first sight), so token overlap maps
/// directly to cosine similarity and results are stable across runs.
pub struct HashProvider {
    model: String,
    dim: usize,
    tokens: Mutex<HashMap<String, usize>>,
}

impl HashProvider {
    pub fn new(model: &str) -> Arc<HashProvider> {
        Arc::new(HashProvider {
            model: model.to_string(),
            dim: 512,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        let lower = text.to_lowercase();
        let mut tokens = self.tokens.lock().unwrap();
        for token in lower.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let next = tokens.len();
            let index = *tokens.entry(token.to_string()).or_insert(next) % self.dim;
            vector[index] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashProvider {
    fn id(&self) -> &str {
        "hash"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Counts calls while delegating to an inner provider.
pub struct CountingProvider {
    inner: Arc<dyn EmbeddingProvider>,
    pub batch_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
}

impl CountingProvider {
    pub fn new(inner: Arc<dyn EmbeddingProvider>) -> Arc<CountingProvider> {
        Arc::new(CountingProvider {
            inner,
            batch_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        })
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingProvider {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_query(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_batch(texts).await
    }
}

/// Fails every call; id/model are configurable so it can impersonate a
/// previously used provider without invalidating stored vectors.
pub struct FailingProvider {
    id: String,
    model: String,
}

impl FailingProvider {
    pub fn new(id: &str, model: &str) -> Arc<FailingProvider> {
        Arc::new(FailingProvider {
            id: id.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FailingProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::ProviderRequestFailed("injected failure".into()))
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::ProviderRequestFailed("injected failure".into()))
    }
}

/// Batch embedding works, query embedding always fails.
pub struct FailQueryProvider {
    inner: Arc<dyn EmbeddingProvider>,
}

impl FailQueryProvider {
    pub fn new(inner: Arc<dyn EmbeddingProvider>) -> Arc<FailQueryProvider> {
        Arc::new(FailQueryProvider { inner })
    }
}

#[async_trait]
impl EmbeddingProvider for FailQueryProvider {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::ProviderRequestFailed("query embedding down".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.inner.embed_batch(texts).await
    }
}

/// Query embeddings come back as all zeros (no information).
pub struct ZeroQueryProvider {
    inner: Arc<dyn EmbeddingProvider>,
}

impl ZeroQueryProvider {
    pub fn new(inner: Arc<dyn EmbeddingProvider>) -> Arc<ZeroQueryProvider> {
        Arc::new(ZeroQueryProvider { inner })
    }
}

#[async_trait]
impl EmbeddingProvider for ZeroQueryProvider {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.0; 512])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.inner.embed_batch(texts).await
    }
}

/// Delegates after a pause, to hold a sync in flight.
pub struct SlowProvider {
    inner: Arc<dyn EmbeddingProvider>,
    delay: Duration,
}

impl SlowProvider {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, delay: Duration) -> Arc<SlowProvider> {
        Arc::new(SlowProvider { inner, delay })
    }
}

#[async_trait]
impl EmbeddingProvider for SlowProvider {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.embed_query(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed_batch(texts).await
    }
}

/// Always returns vectors of a fixed dimension, regardless of history.
pub struct FixedDimProvider {
    id: String,
    model: String,
    dim: usize,
}

impl FixedDimProvider {
    pub fn new(id: &str, model: &str, dim: usize) -> Arc<FixedDimProvider> {
        Arc::new(FixedDimProvider {
            id: id.to_string(),
            model: model.to_string(),
            dim,
        })
    }

    fn vector(&self) -> Vec<f32> {
        vec![1.0; self.dim]
    }
}

#[async_trait]
impl EmbeddingProvider for FixedDimProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(self.vector())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| self.vector()).collect())
    }
}

/// List files under the store directory matching a suffix pattern, for
/// asserting that failed rebuilds leave no debris behind.
pub fn files_matching(dir: &Path, needle: &str) -> Vec<String> {
    let mut found = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.contains(needle) {
                found.push(name);
            }
        }
    }
    found
}
