//! `zava serve` - start the MCP server on stdio or HTTP.

use anyhow::{Context, Result};
use std::path::Path;
use zava_core::{TenantIdentity, ZavaConfig};
use zava_mcp::{McpServer, RetailTools};

use super::TransportArg;

/// Command line values that take precedence over the configuration file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub transport: Option<TransportArg>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub identity: Option<TenantIdentity>,
}

impl Overrides {
    fn apply(self, config: &mut ZavaConfig) {
        if let Some(transport) = self.transport {
            config.mcp.transport = transport.into();
        }
        if let Some(host) = self.host {
            config.mcp.host = host;
        }
        if let Some(port) = self.port {
            config.mcp.port = port;
        }
        if let Some(identity) = self.identity {
            config.mcp.default_identity = Some(identity.to_string());
        }
    }
}

pub async fn run(config_path: &Path, overrides: Overrides) -> Result<()> {
    let mut config = super::load_config(config_path)?;
    overrides.apply(&mut config);
    config.validate().context("invalid configuration")?;
    let default_identity = config.default_identity()?;

    if !config.mcp.is_http() && default_identity.is_none() {
        tracing::warn!("No identity configured for stdio; tenant-scoped tools will fail until --identity is set");
    }

    let provider = super::connect(&config).await?;
    let search = super::build_search(&config, &provider);
    let retail = RetailTools::new(provider, search, config.search.clone());
    let server = McpServer::new(config.mcp.clone(), retail)?.with_default_identity(default_identity);

    tracing::info!(
        transport = ?config.mcp.transport,
        target = %config.upstream.display_target(),
        "Starting Zava MCP server"
    );
    server.run().await?;
    Ok(())
}
