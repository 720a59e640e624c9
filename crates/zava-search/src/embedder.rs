//! Embedding collaborator.
//!
//! `embed(text)` returns a vector of the configured length or an error; any
//! error makes search fall back to keyword matching.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use zava_core::{EmbeddingConfig, EmbeddingProvider};

/// Errors from embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider is disabled")]
    Disabled,

    #[error("embedding API key not found in ${0}")]
    MissingApiKey(String),

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("no embedding returned")]
    Empty,

    #[error("embedding contains non-finite values")]
    NonFinite,

    #[error("embedding request timed out after {0}ms")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Produces fixed-length embedding vectors for text.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Length of every vector returned by `embed`.
    fn dimensions(&self) -> usize;
}

/// Build the embedder described by `config`.
pub fn from_config(
    config: &EmbeddingConfig,
    timeout: Duration,
) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    match config.provider {
        EmbeddingProvider::Disabled => Ok(Arc::new(DisabledEmbedder::new(config.dimensions))),
        EmbeddingProvider::OpenAi | EmbeddingProvider::Azure => {
            let api_key = config
                .api_key()
                .ok_or_else(|| EmbeddingError::MissingApiKey(config.api_key_env.clone()))?;
            Ok(Arc::new(HttpEmbedder::new(config, api_key, timeout)?))
        }
    }
}

/// Always unavailable. Used when no provider is configured.
#[derive(Debug, Clone)]
pub struct DisabledEmbedder {
    dimensions: usize,
}

impl DisabledEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl Embedder for DisabledEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Disabled)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// OpenAI-compatible or Azure OpenAI embeddings endpoint.
pub struct HttpEmbedder {
    url: String,
    auth: Auth,
    model: String,
    dimensions: usize,
    client: reqwest::Client,
}

enum Auth {
    Bearer(String),
    ApiKey(String),
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(
        config: &EmbeddingConfig,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .unwrap_or_default()
            .trim_end_matches('/');
        let (url, auth) = match config.provider {
            EmbeddingProvider::Azure => (
                format!(
                    "{}/openai/deployments/{}/embeddings?api-version={}",
                    endpoint, config.model, config.api_version
                ),
                Auth::ApiKey(api_key),
            ),
            _ => (format!("{}/embeddings", endpoint), Auth::Bearer(api_key)),
        };
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url,
            auth,
            model: config.model.clone(),
            dimensions: config.dimensions,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let builder = self.client.post(&self.url).json(&request);
        let builder = match &self.auth {
            Auth::Bearer(key) => builder.bearer_auth(key),
            Auth::ApiKey(key) => builder.header("api-key", key),
        };
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(EmbeddingError::RateLimitExceeded);
            }
            let message = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: EmbeddingResponse = response.json().await?;
        let embedding = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(EmbeddingError::Empty)?;
        if embedding.len() != self.dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }
        tracing::debug!(dimensions = embedding.len(), "Embedding generated");
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
