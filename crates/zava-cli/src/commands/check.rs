//! `zava check` - connect and report on row level security.
//!
//! Prints one line per protected table and every finding. Exits with an
//! error when findings exist and `rls.require_row_security` is on.

use anyhow::{Context, Result, bail};
use std::path::Path;
use zava_pg::{RowSecurityReport, SessionProvider, verify_row_security};

pub async fn run(config_path: &Path, json: bool) -> Result<()> {
    let config = super::load_config(config_path)?;
    config.validate().context("invalid configuration")?;

    let provider = SessionProvider::connect(&config.upstream, &config.pool, &config.rls)
        .await
        .context("failed to connect to the upstream database")?;
    let report = verify_row_security(&provider, &config.rls).await;
    provider.close().await;
    let report = report.context("failed to inspect row level security")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render(&report));
    }

    if !report.is_enforced() && config.rls.require_row_security {
        bail!("row level security is not enforced ({} findings)", report.findings.len());
    }
    Ok(())
}

fn render(report: &RowSecurityReport) -> String {
    let mut out = format!(
        "role: {} (superuser: {}, bypassrls: {})\n",
        report.role, report.superuser, report.bypass_rls
    );
    for table in &report.tables {
        let status = if !table.exists {
            "missing".to_string()
        } else {
            format!(
                "rls={} force={} policies={}",
                table.row_security, table.forced, table.policies
            )
        };
        out.push_str(&format!("  {:<28} {}\n", table.table, status));
    }
    if report.is_enforced() {
        out.push_str("✅ row level security is enforced\n");
    } else {
        for finding in &report.findings {
            out.push_str(&format!("❌ {}\n", finding));
        }
    }
    out
}
