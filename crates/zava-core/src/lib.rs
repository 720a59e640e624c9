//! Core types shared by the Zava crates.
//!
//! - [`config`]: the YAML configuration (`zava.yaml`) and its validation
//! - [`identity`]: the tenant identity a request runs as

pub mod config;
pub mod identity;

pub use config::{
    ConfigError, EmbeddingConfig, EmbeddingProvider, McpConfig, PoolConfig, RlsConfig,
    SearchConfig, SslMode, Transport, UpstreamConfig, ZavaConfig,
};
pub use identity::{IdentityParseError, TenantIdentity};
