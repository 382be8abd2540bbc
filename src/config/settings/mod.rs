#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::RagError;

pub const ENV_USE_LOCAL_EMBEDDINGS: &str = "USE_LOCAL_EMBEDDINGS";
pub const ENV_KEYWORD_SEARCH_FALLBACK: &str = "ENABLE_KEYWORD_SEARCH_FALLBACK";
pub const DEFAULT_API_KEY_ENV: &str = "INFRA_RAG_API_KEY";
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
pub const DEFAULT_MAX_INPUT_CHARS: usize = 2000;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub dimension: usize,
    /// Always synthesize embeddings locally, even when a remote credential exists
    pub use_local: bool,
    pub max_input_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            use_local: false,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub embedding_model: String,
    pub generation_model: String,
    /// Name of the environment variable holding the API credential
    pub api_key_env: String,
    pub timeout_seconds: u64,
    pub generation_timeout_seconds: u64,
    pub retry_attempts: u32,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip)]
    pub api_key: Option<Credential>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            generation_model: "gemini-2.5-flash-lite".to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            timeout_seconds: 10,
            generation_timeout_seconds: 30,
            retry_attempts: 3,
            temperature: 0.7,
            max_tokens: 1000,
            api_key: None,
        }
    }
}

/// Remote API credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    #[inline]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    #[inline]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
    pub threshold: f32,
    pub keyword_fallback: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            threshold: 0.3,
            keyword_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RouterConfig {
    /// Complexity score (0-100) above which the remote engine is recommended
    pub threshold: f32,
    /// Remote recommendations below this confidence stay local in auto mode
    pub auto_min_confidence: f32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            threshold: 30.0,
            auto_min_confidence: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub embedding_capacity: usize,
    pub embedding_ttl_seconds: u64,
    pub search_capacity: usize,
    pub search_ttl_seconds: u64,
    pub response_capacity: usize,
    pub response_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            embedding_capacity: 1000,
            embedding_ttl_seconds: 3 * 60 * 60,
            search_capacity: 100,
            search_ttl_seconds: 5 * 60,
            response_capacity: 200,
            response_ttl_seconds: 10 * 60,
            sweep_interval_seconds: 60,
        }
    }
}

impl CacheConfig {
    #[inline]
    pub fn embedding_ttl(&self) -> Duration {
        Duration::from_secs(self.embedding_ttl_seconds)
    }

    #[inline]
    pub fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.search_ttl_seconds)
    }

    #[inline]
    pub fn response_ttl(&self) -> Duration {
        Duration::from_secs(self.response_ttl_seconds)
    }

    #[inline]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexingConfig {
    pub batch_size: usize,
    /// Pause between batches, to stay under the remote embedding rate limit
    pub batch_delay_ms: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_delay_ms: 1000,
        }
    }
}

impl IndexingConfig {
    #[inline]
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid embedding dimension: {0} (must be between 8 and 4096)")]
    InvalidEmbeddingDimension(usize),
    #[error("Invalid max input length: {0} (must be between 1 and 100000 characters)")]
    InvalidMaxInputChars(usize),
    #[error("Invalid timeout: {0} (must be between 1 and 300 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid similarity threshold: {0} (must be between -1.0 and 1.0)")]
    InvalidSimilarityThreshold(f32),
    #[error("Invalid router threshold: {0} (must be between 1 and 99)")]
    InvalidRouterThreshold(f32),
    #[error("Invalid confidence: {0} (must be between 0.0 and 1.0)")]
    InvalidConfidence(f32),
    #[error("Invalid {0} cache capacity: {1} (must be between 1 and 100000)")]
    InvalidCacheCapacity(&'static str, usize),
    #[error("Invalid {0} cache TTL: {1} (must be at least 1 second)")]
    InvalidCacheTtl(&'static str, u64),
    #[error("Invalid sweep interval: {0} (must be at least 1 second)")]
    InvalidSweepInterval(u64),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(usize),
    #[error("Invalid value for {name}: {value:?} (expected true/false)")]
    InvalidEnvFlag { name: String, value: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl From<ConfigError> for RagError {
    #[inline]
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl Config {
    /// Default configuration directory (`~/.infra-rag`)
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".infra-rag"))
            .or_else(|| dirs::data_dir().map(|data| data.join("infra-rag")))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Load from disk, then apply the process environment
    #[inline]
    pub fn load_with_env<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let mut config = Self::load(config_dir)?;
        config
            .apply_env_overrides(|name| std::env::var(name).ok())
            .context("Failed to apply environment overrides")?;
        Ok(config)
    }

    /// Apply `USE_LOCAL_EMBEDDINGS`, `ENABLE_KEYWORD_SEARCH_FALLBACK` and the
    /// remote credential variable, reading values through `lookup`.
    #[inline]
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_USE_LOCAL_EMBEDDINGS) {
            self.embedding.use_local = parse_flag(ENV_USE_LOCAL_EMBEDDINGS, &value)?;
        }

        if let Some(value) = lookup(ENV_KEYWORD_SEARCH_FALLBACK) {
            self.search.keyword_fallback = parse_flag(ENV_KEYWORD_SEARCH_FALLBACK, &value)?;
        }

        self.remote.api_key = lookup(&self.remote.api_key_env)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(Credential::new);

        Ok(())
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.remote.validate()?;
        self.search.validate()?;
        self.router.validate()?;
        self.cache.validate()?;
        self.indexing.validate()?;
        Ok(())
    }

    /// True when a usable remote credential was observed
    #[inline]
    pub fn has_remote_credential(&self) -> bool {
        self.remote.api_key.is_some()
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the SQLite interaction log
    #[inline]
    pub fn query_log_path(&self) -> PathBuf {
        self.get_base_dir().join("query_log.db")
    }

    /// Get the path for the vector database directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnvFlag {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8..=4096).contains(&self.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimension));
        }

        if !(1..=100_000).contains(&self.max_input_chars) {
            return Err(ConfigError::InvalidMaxInputChars(self.max_input_chars));
        }

        Ok(())
    }

    pub fn set_dimension(&mut self, dimension: usize) -> Result<(), ConfigError> {
        if !(8..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.dimension = dimension;
        Ok(())
    }
}

impl RemoteConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if self.generation_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.generation_model.clone()));
        }

        for timeout in [self.timeout_seconds, self.generation_timeout_seconds] {
            if !(1..=300).contains(&timeout) {
                return Err(ConfigError::InvalidTimeout(timeout));
            }
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(self.base_url.clone()));
        }
        Ok(url)
    }

    pub fn set_base_url(&mut self, base_url: String) -> Result<(), ConfigError> {
        let temp_config = RemoteConfig {
            base_url: base_url.clone(),
            ..self.clone()
        };
        temp_config.base_url()?;
        self.base_url = base_url;
        Ok(())
    }

    pub fn set_generation_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.generation_model = model;
        Ok(())
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    #[inline]
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_seconds)
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.top_k) {
            return Err(ConfigError::InvalidTopK(self.top_k));
        }

        if !(-1.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::InvalidSimilarityThreshold(self.threshold));
        }

        Ok(())
    }
}

impl RouterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1.0..=99.0).contains(&self.threshold) {
            return Err(ConfigError::InvalidRouterThreshold(self.threshold));
        }

        if !(0.0..=1.0).contains(&self.auto_min_confidence) {
            return Err(ConfigError::InvalidConfidence(self.auto_min_confidence));
        }

        Ok(())
    }

    pub fn set_threshold(&mut self, threshold: f32) -> Result<(), ConfigError> {
        if !(1.0..=99.0).contains(&threshold) {
            return Err(ConfigError::InvalidRouterThreshold(threshold));
        }
        self.threshold = threshold;
        Ok(())
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let caches = [
            ("embedding", self.embedding_capacity, self.embedding_ttl_seconds),
            ("search", self.search_capacity, self.search_ttl_seconds),
            ("response", self.response_capacity, self.response_ttl_seconds),
        ];

        for (name, capacity, ttl) in caches {
            if !(1..=100_000).contains(&capacity) {
                return Err(ConfigError::InvalidCacheCapacity(name, capacity));
            }
            if ttl == 0 {
                return Err(ConfigError::InvalidCacheTtl(name, ttl));
            }
        }

        if self.sweep_interval_seconds == 0 {
            return Err(ConfigError::InvalidSweepInterval(
                self.sweep_interval_seconds,
            ));
        }

        Ok(())
    }
}

impl IndexingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=1000).contains(&self.batch_size) {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }
        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: usize) -> Result<(), ConfigError> {
        if !(1..=1000).contains(&batch_size) {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }
}
