//! Embedding provider configuration.

use kbvec_core::AppConfig;
use serde::{Deserialize, Serialize};

/// Default Ollama API base URL
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Settings for constructing an embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Provider name: "trigram" or "ollama"
    pub provider: String,

    /// Model identifier (provider-specific)
    pub model: String,

    /// Embedding vector dimensions
    pub dimensions: usize,

    /// Base URL for HTTP providers
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "trigram".to_string(),
            model: "trigram-v1".to_string(),
            dimensions: 384,
            endpoint: None,
        }
    }
}

impl EmbeddingConfig {
    /// Extract the embedding section of the application configuration.
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            provider: config.provider.clone(),
            model: config.model.clone(),
            dimensions: config.embedding_dimension,
            endpoint: config.embedding_endpoint.clone(),
        }
    }

    /// Endpoint for HTTP providers, falling back to the local default.
    pub fn endpoint_or_default(&self) -> &str {
        self.endpoint
            .as_deref()
            .map(|e| e.trim_end_matches('/'))
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_OLLAMA_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.provider, "trigram");
        assert_eq!(config.model, "trigram-v1");
        assert_eq!(config.dimensions, 384);
        assert_eq!(config.endpoint_or_default(), DEFAULT_OLLAMA_URL);
    }

    #[test]
    fn test_from_app_config() {
        let app = AppConfig {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            embedding_dimension: 768,
            embedding_endpoint: Some("http://gpu-box:11434/".to_string()),
            ..AppConfig::default()
        };

        let config = EmbeddingConfig::from_app_config(&app);
        assert_eq!(config.provider, "ollama");
        assert_eq!(config.dimensions, 768);
        assert_eq!(config.endpoint_or_default(), "http://gpu-box:11434");
    }
}
