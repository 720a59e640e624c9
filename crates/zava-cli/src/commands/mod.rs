//! CLI command implementations for the Zava MCP server.

pub mod check;
pub mod search;
pub mod serve;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use zava_core::{Transport, ZavaConfig};
use zava_pg::{SessionProvider, verify_row_security};
use zava_search::{DisabledEmbedder, Embedder, ProductSearch, embedder};

/// Transport selectable on the command line.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum TransportArg {
    Stdio,
    Http,
}

impl From<TransportArg> for Transport {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Stdio => Transport::Stdio,
            TransportArg::Http => Transport::Http,
        }
    }
}

/// Read `path`, falling back to defaults when the file does not exist.
pub fn load_config(path: &Path) -> Result<ZavaConfig> {
    if !path.exists() {
        tracing::info!(config = %path.display(), "No configuration file found; using defaults");
        return Ok(ZavaConfig::default());
    }
    tracing::info!(config = %path.display(), "Loading configuration");
    ZavaConfig::from_file(path).with_context(|| format!("failed to load {}", path.display()))
}

/// Connect the session pool and run the row security check.
///
/// Fails when enforcement is required and any gap is found.
pub async fn connect(config: &ZavaConfig) -> Result<SessionProvider> {
    let provider = SessionProvider::connect(&config.upstream, &config.pool, &config.rls)
        .await
        .context("failed to connect to the upstream database")?;

    let report = verify_row_security(&provider, &config.rls)
        .await
        .context("failed to inspect row level security")?;
    if let Err(err) = report.require(config.rls.require_row_security) {
        provider.close().await;
        return Err(err).context("refusing to serve tenant data without row level security");
    }
    Ok(provider)
}

/// Build the search service. An embedder that cannot be built is replaced by
/// one that is always unavailable, so search degrades to keywords.
pub fn build_search(config: &ZavaConfig, provider: &SessionProvider) -> ProductSearch {
    let timeout = Duration::from_millis(config.search.embedding_timeout_ms);
    let embedder: Arc<dyn Embedder> = match embedder::from_config(&config.embedding, timeout) {
        Ok(embedder) => embedder,
        Err(err) => {
            tracing::warn!(error = %err, "Embedding provider unavailable; search will use keywords only");
            Arc::new(DisabledEmbedder::new(config.embedding.dimensions))
        }
    };
    ProductSearch::new(provider.clone(), embedder, config.search.clone())
}
