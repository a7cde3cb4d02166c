//! Configuration management for the kbvec service.
//!
//! Settings are layered, lowest precedence first:
//! - Built-in defaults
//! - YAML config file (`kbvec.yaml` or `KBVEC_CONFIG`)
//! - Environment variables
//! - Command-line flags (see [`AppConfig::with_overrides`])

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{AppError, AppResult};

/// Index type backed by inner-product search over normalized vectors.
pub const INDEX_FLAT_IP: &str = "IndexFlatIP";

/// Index type backed by squared Euclidean distance.
pub const INDEX_FLAT_L2: &str = "IndexFlatL2";

const DEFAULT_CONFIG_FILE: &str = "kbvec.yaml";
const KNOWN_PROVIDERS: [&str; 2] = ["trigram", "ollama"];
const KNOWN_LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Main service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// SQLite database holding the `knowledge_base` table
    pub db_path: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Embedding provider ("trigram", "ollama")
    pub provider: String,

    /// Embedding model identifier
    pub model: String,

    /// Base URL for HTTP embedding providers
    pub embedding_endpoint: Option<String>,

    /// Output dimension of the embedding model
    pub embedding_dimension: usize,

    /// Vector store flavor (`IndexFlatIP` or `IndexFlatL2`)
    pub index_type: String,

    /// Minimum similarity (or maximum distance for L2) for a match
    pub similarity_threshold: f32,

    /// Neighbors retrieved per search
    pub top_k: usize,

    /// Capacity of each cache map
    pub max_cache_size: usize,

    /// Default time-to-live for cache entries, in seconds
    pub cache_ttl_secs: Option<u64>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// Emit logs as JSON lines
    pub json_logs: bool,
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    database: Option<DatabaseSection>,
    embedding: Option<EmbeddingSection>,
    index: Option<IndexSection>,
    cache: Option<CacheSection>,
    logging: Option<LoggingSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatabaseSection {
    path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmbeddingSection {
    provider: Option<String>,
    model: Option<String>,
    endpoint: Option<String>,
    dimension: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexSection {
    #[serde(rename = "type")]
    index_type: Option<String>,
    similarity_threshold: Option<f32>,
    top_k: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheSection {
    max_size: Option<usize>,
    ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingSection {
    level: Option<String>,
    color: Option<bool>,
    json: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/support.db"),
            config_file: None,
            provider: "trigram".to_string(), // Offline default
            model: "trigram-v1".to_string(),
            embedding_endpoint: None,
            embedding_dimension: 384,
            index_type: INDEX_FLAT_IP.to_string(),
            similarity_threshold: 0.7,
            top_k: 5,
            max_cache_size: 1000,
            cache_ttl_secs: None,
            log_level: None,
            verbose: false,
            no_color: false,
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the config file and the environment.
    ///
    /// Environment variables:
    /// - `KBVEC_CONFIG`: Path to config file
    /// - `KBVEC_DB_PATH`: SQLite database path
    /// - `KBVEC_PROVIDER` / `KBVEC_MODEL`: Embedding provider and model
    /// - `KBVEC_EMBEDDING_DIMENSION`: Model output dimension
    /// - `KBVEC_INDEX_TYPE`: `IndexFlatIP` or `IndexFlatL2`
    /// - `KBVEC_SIMILARITY_THRESHOLD`, `KBVEC_TOP_K`
    /// - `KBVEC_MAX_CACHE_SIZE`, `KBVEC_CACHE_TTL_SECS`
    /// - `OLLAMA_URL`: Embedding endpoint
    /// - `RUST_LOG`, `NO_COLOR`, `KBVEC_LOG_JSON`
    ///
    /// # Example
    /// ```no_run
    /// use kbvec_core::config::AppConfig;
    ///
    /// let config = AppConfig::load().expect("Failed to load config");
    /// println!("Database: {:?}", config.db_path);
    /// ```
    pub fn load() -> AppResult<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an explicit config file taking precedence
    /// over `KBVEC_CONFIG`.
    pub fn load_from(config_file: Option<PathBuf>) -> AppResult<Self> {
        let mut config = Self::default();

        config.config_file = config_file.or_else(|| {
            std::env::var("KBVEC_CONFIG").ok().map(PathBuf::from)
        });

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        } else if config.config_file.is_some() {
            return Err(AppError::Config(format!(
                "Config file does not exist: {:?}",
                config_path
            )));
        }

        config.apply_env()?;
        Ok(config)
    }

    /// Environment variables override YAML config.
    fn apply_env(&mut self) -> AppResult<()> {
        if let Ok(path) = std::env::var("KBVEC_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Ok(provider) = std::env::var("KBVEC_PROVIDER") {
            self.provider = provider;
        }
        if let Ok(model) = std::env::var("KBVEC_MODEL") {
            self.model = model;
        }
        if let Ok(endpoint) = std::env::var("OLLAMA_URL") {
            self.embedding_endpoint = Some(endpoint);
        }
        if let Some(dimension) = env_parse("KBVEC_EMBEDDING_DIMENSION")? {
            self.embedding_dimension = dimension;
        }
        if let Ok(index_type) = std::env::var("KBVEC_INDEX_TYPE") {
            self.index_type = index_type;
        }
        if let Some(threshold) = env_parse("KBVEC_SIMILARITY_THRESHOLD")? {
            self.similarity_threshold = threshold;
        }
        if let Some(top_k) = env_parse("KBVEC_TOP_K")? {
            self.top_k = top_k;
        }
        if let Some(size) = env_parse("KBVEC_MAX_CACHE_SIZE")? {
            self.max_cache_size = size;
        }
        if let Some(ttl) = env_parse("KBVEC_CACHE_TTL_SECS")? {
            self.cache_ttl_secs = Some(ttl);
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.log_level = Some(level);
        }
        if std::env::var("NO_COLOR").is_ok() {
            self.no_color = true;
        }
        if let Some(json) = env_parse("KBVEC_LOG_JSON")? {
            self.json_logs = json;
        }
        Ok(())
    }

    /// Merge YAML configuration file into this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        self.merge_yaml_str(&contents)
            .map_err(|e| AppError::Config(format!("Failed to parse config file {:?}: {}", path, e)))
    }

    fn merge_yaml_str(&self, contents: &str) -> AppResult<Self> {
        let config_file: ConfigFile = serde_yaml::from_str(contents)?;
        let mut result = self.clone();

        if let Some(path) = config_file.database.and_then(|db| db.path) {
            result.db_path = PathBuf::from(path);
        }

        if let Some(embedding) = config_file.embedding {
            if let Some(provider) = embedding.provider {
                result.provider = provider;
            }
            if let Some(model) = embedding.model {
                result.model = model;
            }
            if embedding.endpoint.is_some() {
                result.embedding_endpoint = embedding.endpoint;
            }
            if let Some(dimension) = embedding.dimension {
                result.embedding_dimension = dimension;
            }
        }

        if let Some(index) = config_file.index {
            if let Some(index_type) = index.index_type {
                result.index_type = index_type;
            }
            if let Some(threshold) = index.similarity_threshold {
                result.similarity_threshold = threshold;
            }
            if let Some(top_k) = index.top_k {
                result.top_k = top_k;
            }
        }

        if let Some(cache) = config_file.cache {
            if let Some(max_size) = cache.max_size {
                result.max_cache_size = max_size;
            }
            if cache.ttl_secs.is_some() {
                result.cache_ttl_secs = cache.ttl_secs;
            }
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
            if let Some(json) = logging.json {
                result.json_logs = json;
            }
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// CLI flags take precedence over environment variables and the file.
    pub fn with_overrides(
        mut self,
        db_path: Option<PathBuf>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
        json_logs: bool,
    ) -> Self {
        if let Some(db_path) = db_path {
            self.db_path = db_path;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        if json_logs {
            self.json_logs = true;
        }

        self
    }

    /// Whether the configured index compares by distance instead of similarity.
    pub fn uses_distance_metric(&self) -> bool {
        self.index_type == INDEX_FLAT_L2
    }

    /// Validate settings before the service is constructed.
    pub fn validate(&self) -> AppResult<()> {
        if !KNOWN_PROVIDERS.contains(&self.provider.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown embedding provider: {}. Supported: {}",
                self.provider,
                KNOWN_PROVIDERS.join(", ")
            )));
        }

        match self.index_type.as_str() {
            INDEX_FLAT_IP => {
                if !(0.0..=1.0).contains(&self.similarity_threshold) {
                    return Err(AppError::Config(
                        "Similarity threshold must be between 0.0 and 1.0".to_string(),
                    ));
                }
            }
            INDEX_FLAT_L2 => {
                if self.similarity_threshold.is_nan() || self.similarity_threshold < 0.0 {
                    return Err(AppError::Config(
                        "Distance threshold must be non-negative for IndexFlatL2".to_string(),
                    ));
                }
            }
            other => {
                return Err(AppError::Config(format!(
                    "Unknown index type: {}. Supported: {}, {}",
                    other, INDEX_FLAT_IP, INDEX_FLAT_L2
                )));
            }
        }

        if self.embedding_dimension == 0 {
            return Err(AppError::Config(
                "Embedding dimension must be greater than zero".to_string(),
            ));
        }

        if self.max_cache_size == 0 {
            return Err(AppError::Config(
                "Cache size must be greater than zero".to_string(),
            ));
        }

        if self.top_k == 0 {
            return Err(AppError::Config("top_k must be at least 1".to_string()));
        }

        if let Some(level) = &self.log_level {
            // RUST_LOG may hold a full directive ("kbvec=debug,info"); only plain levels are checked
            let plain = level.to_ascii_lowercase();
            let is_directive = plain.contains('=') || plain.contains(',');
            if !is_directive && !KNOWN_LOG_LEVELS.contains(&plain.as_str()) {
                return Err(AppError::Config(format!(
                    "Log level must be one of: {}",
                    KNOWN_LOG_LEVELS.join(", ")
                )));
            }
        }

        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(AppError::Config(format!(
                    "Database directory does not exist: {:?}",
                    parent
                )));
            }
        }

        Ok(())
    }
}

/// Parse an optional environment variable, rejecting malformed values.
fn env_parse<T: FromStr>(name: &str) -> AppResult<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::Config(format!("Invalid value for {}: {:?}", name, raw))),
        Err(_) => Ok(None),
    }
}
