//! MCP server implementation.
//!
//! Dispatches JSON-RPC requests to the retail tools and runs the stdio or
//! HTTP transport.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use zava_core::config::mcp::{McpConfig, Transport};
use zava_core::TenantIdentity;

use crate::error::McpError;
use crate::handlers::RetailTools;
use crate::http_transport::HttpServer;
use crate::protocol::*;
use crate::tools::ToolRegistry;

/// The MCP server.
pub struct McpServer {
    config: McpConfig,
    tools: ToolRegistry,
    retail: RetailTools,
    default_identity: Option<TenantIdentity>,
}

impl McpServer {
    /// Create a server exposing the retail tools.
    pub fn new(config: McpConfig, retail: RetailTools) -> Result<Self, McpError> {
        Ok(Self {
            config,
            tools: ToolRegistry::retail()?,
            retail,
            default_identity: None,
        })
    }

    /// Identity used for stdio requests.
    pub fn with_default_identity(mut self, identity: Option<TenantIdentity>) -> Self {
        self.default_identity = identity;
        self
    }

    pub fn config(&self) -> &McpConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn retail(&self) -> &RetailTools {
        &self.retail
    }

    /// Start the configured transport and close the session pool when it stops.
    pub async fn run(self) -> Result<(), McpError> {
        let provider = self.retail.provider().clone();
        let transport = self.config.transport;
        let result = match transport {
            Transport::Stdio => self.run_stdio().await,
            Transport::Http => HttpServer::new(Arc::new(self)).run().await,
        };
        provider.close().await;
        result
    }

    /// Read newline-delimited JSON-RPC from stdin, answer on stdout.
    async fn run_stdio(&self) -> Result<(), McpError> {
        tracing::info!(
            identity = ?self.default_identity.map(|i| i.to_string()),
            "Starting MCP server with stdio transport"
        );
        let context = RequestContext::new(self.default_identity);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted; stopping stdio transport");
                    break;
                }
            };
            let Some(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<JsonRpcRequest>(line) {
                Ok(request) => self.handle_message(request, &context).await,
                Err(e) => Some(JsonRpcResponse::error(None, PARSE_ERROR, format!("Parse error: {}", e))),
            };

            if let Some(response) = response {
                let mut out = serde_json::to_vec(&response)?;
                out.push(b'\n');
                stdout.write_all(&out).await?;
                stdout.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle a request or notification. Notifications get no response.
    pub async fn handle_message(
        &self,
        request: JsonRpcRequest,
        context: &RequestContext,
    ) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            tracing::debug!(method = %request.method, "Notification received");
            return None;
        }
        Some(self.handle_request(request, context).await)
    }

    /// Handle a JSON-RPC request.
    pub async fn handle_request(&self, request: JsonRpcRequest, context: &RequestContext) -> JsonRpcResponse {
        let id = request.id.clone();

        if request.jsonrpc != "2.0" {
            return JsonRpcResponse::error(id, INVALID_REQUEST, "jsonrpc must be \"2.0\"");
        }

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "initialized" | "notifications/initialized" | "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => self.handle_list_tools(id),
            "tools/call" => self.handle_call_tool(id, request.params, context).await,
            "shutdown" => self.handle_shutdown(id),
            _ => JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        let result = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": "zava-mcp",
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "tools": {
                    "listChanged": false
                }
            }
        });
        JsonRpcResponse::success(id, result)
    }

    fn handle_list_tools(&self, id: Option<Value>) -> JsonRpcResponse {
        let tools = self.tools.list();
        JsonRpcResponse::success(id, json!({ "tools": tools }))
    }

    async fn handle_call_tool(
        &self,
        id: Option<Value>,
        params: Option<Value>,
        context: &RequestContext,
    ) -> JsonRpcResponse {
        let params: CallToolParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(id, INVALID_PARAMS, format!("Invalid params: {}", e));
                }
            },
            None => return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing params"),
        };

        if !self.tools.contains(&params.name) {
            return JsonRpcResponse::error(id, INVALID_PARAMS, format!("Tool not found: {}", params.name));
        }

        let arguments = match params.arguments {
            Value::Null => json!({}),
            other => other,
        };
        if let Err(err) = self.tools.validate(&params.name, &arguments) {
            return JsonRpcResponse::error(id, INVALID_PARAMS, err.to_string()).with_data(err.to_payload());
        }

        let started = std::time::Instant::now();
        let result = self.retail.call(&params.name, arguments, context.identity).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let identity = context.identity.map(|i| i.to_string());

        let response = match result {
            Ok(value) => {
                tracing::info!(tool = %params.name, identity = ?identity, elapsed_ms, "Tool call succeeded");
                CallToolResponse::json(value)
            }
            Err(err) => {
                if err.is_access_denied() {
                    tracing::info!(tool = %params.name, identity = ?identity, error = %err, "Tool call denied");
                } else {
                    tracing::warn!(
                        tool = %params.name,
                        identity = ?identity,
                        kind = err.kind(),
                        error = %err,
                        elapsed_ms,
                        "Tool call failed"
                    );
                }
                CallToolResponse::failure(err.to_string(), err.to_payload())
            }
        };

        match serde_json::to_value(response) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
        }
    }

    fn handle_shutdown(&self, id: Option<Value>) -> JsonRpcResponse {
        tracing::info!("MCP server shutdown requested");
        JsonRpcResponse::success(id, json!(null))
    }
}
