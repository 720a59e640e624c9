//! `zava search` - run one tenant-scoped product search from the shell.

use anyhow::{Context, Result};
use std::path::Path;
use zava_core::TenantIdentity;

pub async fn run(config_path: &Path, query: &str, identity: TenantIdentity, limit: Option<u32>) -> Result<()> {
    let config = super::load_config(config_path)?;
    config.validate().context("invalid configuration")?;

    let provider = super::connect(&config).await?;
    let search = super::build_search(&config, &provider);
    let outcome = search.search(identity, query, limit).await;
    provider.close().await;

    let outcome = outcome.context("search failed")?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
