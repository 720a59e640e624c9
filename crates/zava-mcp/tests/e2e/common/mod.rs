//! Shared test infrastructure for Zava MCP end-to-end tests.
//!
//! This module provides:
//! - Docker container management for PostgreSQL with pgvector
//! - Schema and seed data with row level security policies
//! - Deterministic embedders and helpers to build providers and servers

use async_trait::async_trait;
use serde_json::{Value, json};
use sqlx::PgPool;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use zava_core::{McpConfig, PoolConfig, RlsConfig, SearchConfig, TenantIdentity, UpstreamConfig};
use zava_mcp::protocol::{JsonRpcRequest, RequestContext};
use zava_mcp::{McpServer, RetailTools};
use zava_pg::SessionProvider;
use zava_search::{Embedder, EmbeddingError, ProductSearch};

// =============================================================================
// DOCKER CONTAINER CONFIGURATION
// =============================================================================

pub const CONTAINER_NAME: &str = "zava_test_postgres";
pub const POSTGRES_PORT: u16 = 5433;
pub const POSTGRES_PASSWORD: &str = "zava_test_password";
pub const DATABASE_NAME: &str = "zava_test";
pub const APP_ROLE: &str = "store_manager";
pub const APP_PASSWORD: &str = "store_manager_password";

/// Superuser connection used only for setup.
pub fn admin_database_url() -> String {
    format!(
        "postgres://postgres:{}@localhost:{}/{}",
        POSTGRES_PASSWORD, POSTGRES_PORT, DATABASE_NAME
    )
}

pub fn app_upstream() -> UpstreamConfig {
    UpstreamConfig {
        database_url: Some(format!(
            "postgres://{}:{}@localhost:{}/{}",
            APP_ROLE, APP_PASSWORD, POSTGRES_PORT, DATABASE_NAME
        )),
        ..Default::default()
    }
}

// =============================================================================
// DOCKER CONTAINER MANAGEMENT
// =============================================================================

/// Start a pgvector PostgreSQL container for testing
pub fn start_postgres_container() -> Result<(), String> {
    let output = Command::new("docker")
        .args(["ps", "-a", "-q", "-f", &format!("name={}", CONTAINER_NAME)])
        .output()
        .map_err(|e| format!("Failed to check existing container: {}", e))?;

    if !String::from_utf8_lossy(&output.stdout).trim().is_empty() {
        let _ = Command::new("docker").args(["rm", "-f", CONTAINER_NAME]).output();
    }

    let status = Command::new("docker")
        .args([
            "run",
            "-d",
            "--name",
            CONTAINER_NAME,
            "-e",
            &format!("POSTGRES_PASSWORD={}", POSTGRES_PASSWORD),
            "-e",
            &format!("POSTGRES_DB={}", DATABASE_NAME),
            "-p",
            &format!("{}:5432", POSTGRES_PORT),
            "pgvector/pgvector:pg16",
        ])
        .status()
        .map_err(|e| format!("Failed to start container: {}", e))?;

    if !status.success() {
        return Err("Failed to start PostgreSQL container".to_string());
    }
    Ok(())
}

/// Stop and remove the PostgreSQL container
pub fn stop_postgres_container() {
    let _ = Command::new("docker").args(["rm", "-f", CONTAINER_NAME]).output();
}

/// Wait for PostgreSQL to be ready
pub async fn wait_for_postgres() -> Result<PgPool, String> {
    for attempt in 1..=60 {
        match PgPool::connect(&admin_database_url()).await {
            Ok(pool) => {
                if sqlx::query("SELECT 1").fetch_one(&pool).await.is_ok() {
                    println!("✅ PostgreSQL ready after {} attempts", attempt);
                    return Ok(pool);
                }
            }
            Err(_) => {
                if attempt % 5 == 0 {
                    println!("⏳ Waiting for PostgreSQL... (attempt {})", attempt);
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Err("PostgreSQL did not become ready in time".to_string())
}

// =============================================================================
// DATABASE INITIALIZATION
// =============================================================================

const SCHEMA_SQL: &str = include_str!("../fixtures/schema.sql");
const SEED_SQL: &str = include_str!("../fixtures/seed.sql");

pub async fn initialize_database(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    sqlx::raw_sql(SEED_SQL).execute(pool).await?;
    println!("✅ Database initialized with schema and seed data");
    Ok(())
}

// =============================================================================
// EMBEDDERS
// =============================================================================

/// Maps query words onto the axes used by the seed embeddings.
pub struct KeywordAxisEmbedder;

#[async_trait]
impl Embedder for KeywordAxisEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let text = text.to_lowercase();
        let mut vector = vec![0.0_f32; 4];
        if text.contains("hose") || text.contains("water") {
            vector[0] = 1.0;
        }
        if text.contains("hammer") || text.contains("tool") {
            vector[1] = 1.0;
        }
        if text.contains("paint") {
            vector[2] = 1.0;
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[3] = 1.0;
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        4
    }
}

/// Always fails, as an unreachable embedding service would.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::ApiError {
            status: 503,
            message: "service unavailable".to_string(),
        })
    }

    fn dimensions(&self) -> usize {
        4
    }
}

// =============================================================================
// TEST CONTEXT
// =============================================================================

pub struct TestContext {
    pub admin: PgPool,
}

impl TestContext {
    pub async fn setup() -> Result<Self, String> {
        start_postgres_container()?;
        let admin = wait_for_postgres().await?;
        initialize_database(&admin)
            .await
            .map_err(|e| format!("Failed to initialize database: {}", e))?;
        Ok(Self { admin })
    }

    /// Provider connected as the application role.
    pub async fn provider_with(&self, pool: PoolConfig) -> SessionProvider {
        SessionProvider::connect(&app_upstream(), &pool, &RlsConfig::default())
            .await
            .expect("provider should connect as the application role")
    }

    pub async fn provider(&self) -> SessionProvider {
        self.provider_with(PoolConfig::default()).await
    }

    /// Provider with exactly one connection.
    pub async fn single_connection_provider(&self, acquire_timeout_ms: u64) -> SessionProvider {
        self.provider_with(PoolConfig {
            max_connections: 1,
            acquire_timeout_ms,
            ..Default::default()
        })
        .await
    }

    pub fn search(&self, provider: &SessionProvider, embedder: Arc<dyn Embedder>) -> ProductSearch {
        ProductSearch::new(provider.clone(), embedder, SearchConfig::default())
    }

    pub async fn server(&self) -> McpServer {
        let provider = self.provider().await;
        let search = self.search(&provider, Arc::new(KeywordAxisEmbedder));
        let retail = RetailTools::new(provider, search, SearchConfig::default());
        McpServer::new(McpConfig::default(), retail).expect("server should build")
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        stop_postgres_container();
        println!("🧹 Cleaned up PostgreSQL container");
    }
}

// =============================================================================
// RESULT HELPERS
// =============================================================================

pub fn seattle() -> TenantIdentity {
    TenantIdentity::Store(1)
}

pub fn bellevue() -> TenantIdentity {
    TenantIdentity::Store(2)
}

/// Call `name` through the JSON-RPC layer. Returns the JSON content and the
/// `isError` flag.
pub async fn call_tool(
    server: &McpServer,
    identity: Option<TenantIdentity>,
    name: &str,
    arguments: Value,
) -> (Value, bool) {
    let request = JsonRpcRequest::new(
        1,
        "tools/call",
        Some(json!({ "name": name, "arguments": arguments })),
    );
    let response = server.handle_request(request, &RequestContext::new(identity)).await;
    let result = response.result.unwrap_or_else(|| panic!("{} returned a protocol error: {:?}", name, response.error));
    let is_error = result["isError"].as_bool().unwrap_or(false);
    let payload = result["content"]
        .as_array()
        .and_then(|content| content.iter().find(|item| item["type"] == "json"))
        .map(|item| item["json"].clone())
        .unwrap_or(Value::Null);
    (payload, is_error)
}

/// Store ids found in a `products[].stores[]` or `results[].stores[]` listing.
pub fn store_ids(items: &Value) -> Vec<i64> {
    let mut ids: Vec<i64> = items
        .as_array()
        .into_iter()
        .flatten()
        .flat_map(|item| item["stores"].as_array().cloned().unwrap_or_default())
        .filter_map(|store| store["store_id"].as_i64())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}
