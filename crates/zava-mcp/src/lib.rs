//! # zava-mcp
//!
//! MCP (Model Context Protocol) server for the Zava retail database.
//!
//! Every tool call runs as the caller's tenant identity: a store manager sees
//! only their store's rows, a global admin sees all of them. The server does
//! not filter rows itself; it applies the identity to a leased session and
//! PostgreSQL's row-level security policies do the rest.
//!
//! ```text
//! AI Agent
//!       │  MCP (tools/list, tools/call) + identity
//!       ▼
//! ┌──────────────────────┐
//! │  Zava MCP Server     │
//! │  1. Validate args    │  ← jsonschema
//! │  2. Embed query      │  ← zava-search
//! │  3. Acquire session  │  ← zava-pg
//! │  4. Apply identity   │
//! │  5. Execute SQL      │
//! │  6. Release session  │
//! │  7. Format result    │
//! └──────────┬───────────┘
//!            ▼
//!   PostgreSQL (RLS + pgvector)
//! ```

pub mod error;
pub mod handlers;
pub mod http_transport;
pub mod protocol;
pub mod server;
pub mod tools;

pub use error::McpError;
pub use handlers::RetailTools;
pub use protocol::{
    CallToolParams, CallToolResponse, JsonRpcRequest, JsonRpcResponse, RequestContext,
    ToolAnnotations, ToolContent, ToolDefinition,
};
pub use server::McpServer;
pub use tools::ToolRegistry;
