//! Configuration types for the Zava retail MCP server.
//!
//! Configuration is loaded from a single YAML file (`zava.yaml`). Every
//! section has defaults, so an empty file yields a runnable local setup.
//!
//! ```yaml
//! upstream:
//!   database_url_env: POSTGRES_URL
//! pool:
//!   max_connections: 10
//!   statement_timeout_ms: 15000
//! rls:
//!   setting_name: app.current_store_id
//! embedding:
//!   provider: azure
//!   endpoint: https://my-resource.openai.azure.com
//!   model: text-embedding-3-small
//! mcp:
//!   transport: http
//!   port: 3000
//! ```

pub mod embedding;
pub mod mcp;
pub mod rls;
pub mod search;
pub mod upstream;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use embedding::{EmbeddingConfig, EmbeddingProvider};
pub use mcp::{McpConfig, Transport};
pub use rls::RlsConfig;
pub use search::SearchConfig;
pub use upstream::{PoolConfig, SslMode, UpstreamConfig};

use crate::identity::TenantIdentity;

/// Complete configuration loaded from `zava.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZavaConfig {
    /// Upstream Postgres connection.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Session pool sizing and timeouts.
    #[serde(default)]
    pub pool: PoolConfig,

    /// How tenant identities reach the RLS policies.
    #[serde(default)]
    pub rls: RlsConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub mcp: McpConfig,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ZavaConfig {
    /// Load configuration from a YAML file without validating it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Load and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Identity used by the stdio transport, if configured.
    pub fn default_identity(&self) -> Result<Option<TenantIdentity>, ConfigError> {
        self.mcp
            .default_identity
            .as_deref()
            .map(|raw| raw.parse().map_err(|e| ConfigError::Config(format!("mcp.default_identity: {e}"))))
            .transpose()
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pool = &self.pool;
        if pool.max_connections == 0 {
            return Err(ConfigError::Config("pool.max_connections must be at least 1".into()));
        }
        if pool.min_connections > pool.max_connections {
            return Err(ConfigError::Config(format!(
                "pool.min_connections ({}) exceeds pool.max_connections ({})",
                pool.min_connections, pool.max_connections
            )));
        }
        if pool.statement_timeout_ms == 0 {
            return Err(ConfigError::Config("pool.statement_timeout_ms must be positive".into()));
        }

        let rls = &self.rls;
        // Postgres only accepts custom settings in the form prefix.name.
        if !rls.setting_name.contains('.')
            || rls.setting_name.starts_with('.')
            || rls.setting_name.ends_with('.')
        {
            return Err(ConfigError::Config(format!(
                "rls.setting_name '{}' must be of the form 'prefix.name'",
                rls.setting_name
            )));
        }
        if rls.global_admin_value == rls.cleared_value {
            return Err(ConfigError::Config(
                "rls.global_admin_value and rls.cleared_value must differ".into(),
            ));
        }
        for (field, value) in [
            ("rls.global_admin_value", &rls.global_admin_value),
            ("rls.cleared_value", &rls.cleared_value),
        ] {
            if value.trim().is_empty() || value.trim().parse::<i64>().is_ok() {
                return Err(ConfigError::Config(format!(
                    "{field} '{value}' must be a non-numeric sentinel"
                )));
            }
        }

        let search = &self.search;
        if search.default_limit == 0 || search.max_limit == 0 || search.candidate_limit == 0 {
            return Err(ConfigError::Config("search limits must be positive".into()));
        }
        if search.default_limit > search.max_limit {
            return Err(ConfigError::Config(format!(
                "search.default_limit ({}) exceeds search.max_limit ({})",
                search.default_limit, search.max_limit
            )));
        }

        let embedding = &self.embedding;
        if embedding.is_enabled() {
            if embedding.endpoint.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::Config(
                    "embedding.endpoint is required when a provider is configured".into(),
                ));
            }
            if embedding.model.is_empty() || embedding.dimensions == 0 {
                return Err(ConfigError::Config(
                    "embedding.model and embedding.dimensions are required".into(),
                ));
            }
        }

        self.default_identity()?;
        Ok(())
    }
}
