use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level configuration consumed by [`crate::SearchManager`].
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Absolute path of the agent workspace root.
    pub workspace: PathBuf,
    pub memory_search: MemorySearchConfig,
    #[serde(default)]
    pub models: ModelsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemorySearchConfig {
    pub provider: ProviderKind,
    /// Embedding model id; defaults per provider when absent.
    #[serde(default)]
    pub model: Option<String>,
    /// Additional absolute roots indexed and readable next to the workspace.
    #[serde(default)]
    pub extra_paths: Vec<PathBuf>,
    pub store: StoreConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Embedding provider variant. The transport details live under
/// `models.providers.<id>`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openai,
    Ollama,
}

impl ProviderKind {
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "openai",
            ProviderKind::Ollama => "ollama",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "text-embedding-3-small",
            ProviderKind::Ollama => "nomic-embed-text",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Absolute directory holding `index.sqlite` and its WAL.
    pub path: PathBuf,
    #[serde(default)]
    pub vector: VectorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Whether the embedding application should watch for file changes.
    /// Recognized and surfaced; this crate starts no watcher itself.
    #[serde(default)]
    pub watch: bool,
    /// Whether the embedding application should sync when a session starts.
    #[serde(default = "default_true")]
    pub on_session_start: bool,
    /// Run a non-forced sync before answering each search.
    #[serde(default)]
    pub on_search: bool,
    /// Maximum concurrent embedding batch requests.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Maximum texts per embedding batch request.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            watch: false,
            on_session_start: true,
            on_search: false,
            max_in_flight: default_max_in_flight(),
            max_batch: default_max_batch(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default)]
    pub min_score: f64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub hybrid: HybridConfig,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            max_results: default_max_results(),
            hybrid: HybridConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HybridConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_text_weight")]
    pub text_weight: f64,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            vector_weight: default_vector_weight(),
            text_weight: default_text_weight(),
            candidate_multiplier: default_candidate_multiplier(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_cache_max_entries(),
        }
    }
}

/// Transport overrides keyed by provider id (`models.providers.<id>`).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModelsConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderTransportConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProviderTransportConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}
fn default_max_file_bytes() -> u64 {
    2 * 1024 * 1024
}
fn default_max_chars() -> usize {
    1600
}
fn default_overlap_chars() -> usize {
    200
}
fn default_max_in_flight() -> usize {
    4
}
fn default_max_batch() -> usize {
    64
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_max_results() -> usize {
    20
}
fn default_vector_weight() -> f64 {
    0.7
}
fn default_text_weight() -> f64 {
    0.3
}
fn default_candidate_multiplier() -> usize {
    3
}
fn default_cache_max_entries() -> u64 {
    250_000
}

impl Config {
    /// Effective embedding model id (configured or provider default).
    pub fn model(&self) -> &str {
        self.memory_search
            .model
            .as_deref()
            .unwrap_or_else(|| self.memory_search.provider.default_model())
    }

    /// Embedding model fingerprint: `provider_id + "/" + model_id`.
    /// A change invalidates all stored vectors.
    pub fn fingerprint(&self) -> String {
        format!("{}/{}", self.memory_search.provider.id(), self.model())
    }

    /// Transport overrides for the configured provider, if any.
    pub fn provider_transport(&self) -> Option<&ProviderTransportConfig> {
        self.models
            .providers
            .get(self.memory_search.provider.id())
    }

    /// Validate cross-field constraints. Called by
    /// [`crate::SearchManager::open`] before anything touches disk.
    pub fn validate(&self) -> Result<()> {
        if !self.workspace.is_absolute() {
            return Err(Error::ConfigInvalid(format!(
                "workspace must be an absolute path: {}",
                self.workspace.display()
            )));
        }
        if !self.memory_search.store.path.is_absolute() {
            return Err(Error::ConfigInvalid(format!(
                "memory_search.store.path must be an absolute path: {}",
                self.memory_search.store.path.display()
            )));
        }
        for extra in &self.memory_search.extra_paths {
            if !extra.is_absolute() {
                return Err(Error::ConfigInvalid(format!(
                    "memory_search.extra_paths entries must be absolute: {}",
                    extra.display()
                )));
            }
        }

        let chunking = &self.memory_search.chunking;
        if chunking.max_chars == 0 {
            return Err(Error::ConfigInvalid(
                "memory_search.chunking.max_chars must be > 0".into(),
            ));
        }
        if chunking.overlap_chars >= chunking.max_chars {
            return Err(Error::ConfigInvalid(
                "memory_search.chunking.overlap_chars must be < max_chars".into(),
            ));
        }

        let query = &self.memory_search.query;
        if query.max_results == 0 {
            return Err(Error::ConfigInvalid(
                "memory_search.query.max_results must be >= 1".into(),
            ));
        }
        if query.hybrid.candidate_multiplier == 0 {
            return Err(Error::ConfigInvalid(
                "memory_search.query.hybrid.candidate_multiplier must be >= 1".into(),
            ));
        }
        if query.hybrid.enabled
            && query.hybrid.vector_weight + query.hybrid.text_weight <= 0.0
        {
            return Err(Error::ConfigInvalid(
                "memory_search.query.hybrid weights must sum to > 0".into(),
            ));
        }

        if self.memory_search.sync.max_in_flight == 0 {
            return Err(Error::ConfigInvalid(
                "memory_search.sync.max_in_flight must be >= 1".into(),
            ));
        }
        if self.memory_search.sync.max_batch == 0 {
            return Err(Error::ConfigInvalid(
                "memory_search.sync.max_batch must be >= 1".into(),
            ));
        }

        Ok(())
    }
}

/// Load and validate a configuration file (TOML).
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| Error::ConfigInvalid(format!("{}: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        toml::from_str(
            r#"
            workspace = "/tmp/ws"

            [memory_search]
            provider = "openai"

            [memory_search.store]
            path = "/tmp/store"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_fill_in() {
        let config = base_config();
        config.validate().unwrap();
        assert_eq!(config.model(), "text-embedding-3-small");
        assert_eq!(config.fingerprint(), "openai/text-embedding-3-small");
        assert!(config.memory_search.store.vector.enabled);
        assert!(config.memory_search.cache.enabled);
        assert_eq!(config.memory_search.query.max_results, 20);
        assert_eq!(config.memory_search.query.hybrid.candidate_multiplier, 3);
        assert_eq!(config.memory_search.chunking.max_chars, 1600);
    }

    #[test]
    fn ollama_default_model() {
        let mut config = base_config();
        config.memory_search.provider = ProviderKind::Ollama;
        assert_eq!(config.fingerprint(), "ollama/nomic-embed-text");
    }

    #[test]
    fn rejects_relative_workspace() {
        let mut config = base_config();
        config.workspace = PathBuf::from("relative/path");
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), "config_invalid");
    }

    #[test]
    fn rejects_zero_weights_when_hybrid_enabled() {
        let mut config = base_config();
        config.memory_search.query.hybrid.vector_weight = 0.0;
        config.memory_search.query.hybrid.text_weight = 0.0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), "config_invalid");
    }

    #[test]
    fn rejects_overlap_not_below_max() {
        let mut config = base_config();
        config.memory_search.chunking.overlap_chars = 1600;
        assert!(config.validate().is_err());
    }
}
