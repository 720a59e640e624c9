//! Product search settings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Rows returned when the caller does not ask for a limit.
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    /// Upper bound on any caller supplied limit.
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,

    /// Candidates taken from each ranked list before fusion.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: u32,

    /// Reciprocal rank fusion constant.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,

    /// Text search configuration passed to `to_tsvector`/`to_tsquery`.
    #[serde(default = "default_text_search_config")]
    pub text_search_config: String,

    /// Fuse full-text relevance with vector distance.
    #[serde(default = "default_true")]
    pub hybrid: bool,

    /// How long to wait for the embedder before falling back to keyword search.
    #[serde(default = "default_embedding_timeout_ms")]
    pub embedding_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            candidate_limit: default_candidate_limit(),
            rrf_k: default_rrf_k(),
            text_search_config: default_text_search_config(),
            hybrid: true,
            embedding_timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

impl SearchConfig {
    /// Clamp a requested limit into `1..=max_limit`.
    pub fn effective_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}

fn default_limit() -> u32 {
    10
}

fn default_max_limit() -> u32 {
    50
}

fn default_candidate_limit() -> u32 {
    20
}

fn default_rrf_k() -> u32 {
    60
}

fn default_text_search_config() -> String {
    "english".to_string()
}

fn default_true() -> bool {
    true
}

fn default_embedding_timeout_ms() -> u64 {
    3_000
}
