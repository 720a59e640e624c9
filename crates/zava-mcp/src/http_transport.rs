//! HTTP transport for MCP server.
//!
//! JSON-RPC is accepted on `POST /mcp`. The caller's identity travels in a
//! header (`x-store-id` by default): a store id, or `global` for the global
//! admin. `GET /health` reports pool usage.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use zava_core::TenantIdentity;

use crate::error::McpError;
use crate::protocol::{IDENTITY_ERROR, JsonRpcRequest, JsonRpcResponse, PARSE_ERROR, RequestContext};
use crate::server::McpServer;

/// Create the HTTP router for MCP.
pub fn create_router(server: Arc<McpServer>) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp_post))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

/// Handle POST requests to /mcp (JSON-RPC over HTTP).
async fn handle_mcp_post(
    State(server): State<Arc<McpServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::error(None, PARSE_ERROR, format!("Parse error: {}", e))),
            )
                .into_response();
        }
    };

    let identity = match identity_from_headers(&headers, &server.config().identity_header) {
        Ok(identity) => identity,
        Err(err) => {
            tracing::info!(error = %err, "Rejected request with invalid identity header");
            return (
                StatusCode::BAD_REQUEST,
                Json(
                    JsonRpcResponse::error(request.id, IDENTITY_ERROR, err.to_string())
                        .with_data(err.to_payload()),
                ),
            )
                .into_response();
        }
    };

    match server.handle_message(request, &RequestContext::new(identity)).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Read the caller identity from `header`. A missing header means no identity.
pub fn identity_from_headers(
    headers: &HeaderMap,
    header: &str,
) -> Result<Option<TenantIdentity>, McpError> {
    let Some(value) = headers.get(header) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| McpError::InvalidIdentity(format!("{} header is not valid text", header)))?;
    raw.parse::<TenantIdentity>()
        .map(Some)
        .map_err(|e| McpError::InvalidIdentity(e.to_string()))
}

/// Handle health check requests.
async fn handle_health(State(server): State<Arc<McpServer>>) -> impl IntoResponse {
    let provider = server.retail().provider();
    let status = if provider.is_closed() { "closing" } else { "ok" };
    Json(serde_json::json!({
        "status": status,
        "service": "zava-mcp",
        "version": env!("CARGO_PKG_VERSION"),
        "pool": provider.status(),
    }))
}

/// HTTP server for MCP transport.
pub struct HttpServer {
    server: Arc<McpServer>,
}

impl HttpServer {
    pub fn new(server: Arc<McpServer>) -> Self {
        Self { server }
    }

    /// Serve until Ctrl-C.
    pub async fn run(self) -> Result<(), McpError> {
        let address = format!("{}:{}", self.server.config().host, self.server.config().port);
        let app = create_router(self.server);

        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .map_err(|e| McpError::StartupFailed(format!("Failed to bind to {}: {}", address, e)))?;

        tracing::info!(address = %address, "MCP HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                }
                tracing::info!("Shutting down MCP HTTP server");
            })
            .await?;

        Ok(())
    }
}
