//! Embedding provider settings.

use serde::{Deserialize, Serialize};

/// Which embedding API to call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// No embedder; semantic search always uses the keyword path.
    #[default]
    Disabled,
    /// OpenAI-compatible `/embeddings` endpoint with bearer auth.
    OpenAi,
    /// Azure OpenAI deployment endpoint with `api-key` auth.
    Azure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    /// Base URL. For Azure this is the resource endpoint,
    /// e.g. `https://my-resource.openai.azure.com`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Model name (OpenAI) or deployment name (Azure).
    #[serde(default = "default_model")]
    pub model: String,

    /// Expected vector length; must match the `vector(n)` column.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Azure `api-version` query parameter.
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            endpoint: None,
            model: default_model(),
            dimensions: default_dimensions(),
            api_key_env: default_api_key_env(),
            api_version: default_api_version(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != EmbeddingProvider::Disabled
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

fn default_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    1536
}

fn default_api_key_env() -> String {
    "EMBEDDING_API_KEY".to_string()
}

fn default_api_version() -> String {
    "2024-10-21".to_string()
}
