//! Error types for the MCP crate.

use serde_json::{Value, json};
use thiserror::Error;
use zava_pg::SessionError;
use zava_search::SearchError;

/// Errors that can occur in the MCP server.
#[derive(Debug, Error)]
pub enum McpError {
    /// Failed to start the server.
    #[error("failed to start MCP server: {0}")]
    StartupFailed(String),

    /// Tool not found.
    #[error("tool not found: {name}")]
    ToolNotFound { name: String },

    /// Invalid arguments for tool.
    #[error("invalid arguments for tool {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The request carried no tenant identity.
    #[error("no tenant identity supplied for this request")]
    MissingIdentity,

    /// The identity header could not be parsed.
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Search(#[from] SearchError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl McpError {
    fn session(&self) -> Option<&SessionError> {
        match self {
            Self::Session(err) | Self::Search(SearchError::Session(err)) => Some(err),
            _ => None,
        }
    }

    /// Stable machine readable code.
    pub fn kind(&self) -> &'static str {
        if let Some(err) = self.session() {
            return err.kind();
        }
        match self {
            Self::StartupFailed(_) => "startup_failed",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::MissingIdentity => "missing_identity",
            Self::InvalidIdentity(_) => "invalid_identity",
            Self::Search(SearchError::InvalidQuery(_)) => "invalid_arguments",
            Self::SerializationError(_) => "serialization",
            Self::IoError(_) => "io",
            _ => "internal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.session().is_some_and(SessionError::is_retryable)
    }

    pub fn is_access_denied(&self) -> bool {
        self.session().is_some_and(SessionError::is_access_denied)
    }

    /// Structured error returned to tool callers.
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "kind": self.kind(),
            "message": self.to_string(),
            "retryable": self.is_retryable(),
            "access_denied": self.is_access_denied(),
        });
        if let Some(SessionError::QueryFailed { class, sqlstate, .. }) = self.session() {
            payload["class"] = json!(class);
            payload["sqlstate"] = json!(sqlstate);
        }
        payload
    }
}
