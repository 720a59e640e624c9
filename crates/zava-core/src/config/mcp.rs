//! MCP server configuration.
//!
//! Transport selection and how each transport learns the caller's identity.

use serde::{Deserialize, Serialize};

/// Configuration for the MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Transport type: "stdio" or "http".
    #[serde(default)]
    pub transport: Transport,

    /// HTTP host (only used when transport is HTTP).
    #[serde(default = "default_http_host")]
    pub host: String,

    /// HTTP port (only used when transport is HTTP).
    #[serde(default = "default_http_port")]
    pub port: u16,

    /// Request header carrying the caller's identity (HTTP transport).
    #[serde(default = "default_identity_header")]
    pub identity_header: String,

    /// Identity used for every request on the stdio transport.
    /// A store id, or `global` for the global admin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_identity: Option<String>,
}

/// MCP transport type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Standard input/output transport (one client, fixed identity).
    #[default]
    Stdio,
    /// HTTP transport (identity read from a header per request).
    Http,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            host: default_http_host(),
            port: default_http_port(),
            identity_header: default_identity_header(),
            default_identity: None,
        }
    }
}

impl McpConfig {
    /// Check if using HTTP transport.
    pub fn is_http(&self) -> bool {
        self.transport == Transport::Http
    }
}

fn default_http_host() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    3000
}

fn default_identity_header() -> String {
    "x-store-id".to_string()
}
