use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use zava_core::TenantIdentity;

mod commands;

use commands::TransportArg;

#[derive(Parser, Debug)]
#[command(name = "zava", version, about = "Zava retail MCP server")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, short, global = true, env = "ZAVA_CONFIG", default_value = "zava.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the MCP server.
    Serve {
        /// Transport override: stdio or http
        #[arg(long, value_enum)]
        transport: Option<TransportArg>,

        /// HTTP host override
        #[arg(long)]
        host: Option<String>,

        /// HTTP port override
        #[arg(long)]
        port: Option<u16>,

        /// Identity for every stdio request: a store id, or "global"
        #[arg(long, env = "ZAVA_IDENTITY")]
        identity: Option<TenantIdentity>,
    },

    /// Connect and report whether row level security protects the tenant tables.
    Check {
        /// Print the report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Run one product search and print the result as JSON.
    Search {
        /// Search text
        query: String,

        /// Identity to search as: a store id, or "global"
        #[arg(long, env = "ZAVA_IDENTITY")]
        identity: TenantIdentity,

        /// Maximum number of products
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the stdio transport, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Serve {
            transport,
            host,
            port,
            identity,
        } => {
            commands::serve::run(
                &cli.config,
                commands::serve::Overrides {
                    transport,
                    host,
                    port,
                    identity,
                },
            )
            .await
        }
        Command::Check { json } => commands::check::run(&cli.config, json).await,
        Command::Search {
            query,
            identity,
            limit,
        } => commands::search::run(&cli.config, &query, identity, limit).await,
    }
}
