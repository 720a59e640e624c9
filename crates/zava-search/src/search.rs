//! Tenant-scoped product search.
//!
//! Search runs in two phases. The query text is embedded first, before any
//! session is leased, so a slow embedder never holds a pooled connection.
//! Then one statement runs under the caller's security context:
//!
//! - **Hybrid**: reciprocal rank fusion of vector distance and full-text rank
//! - **Vector**: nearest neighbours by cosine distance
//! - **Keyword**: full-text plus name matching, used whenever no embedding is
//!   available
//!
//! Only products stocked in a store the caller can see are returned, one
//! result per product with its per-store stock. Ordering is total, so equal
//! input over equal data always yields the same list.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use zava_core::{SearchConfig, TenantIdentity};
use zava_pg::format::collapse_inventory;
use zava_pg::{ProductInventory, QueryExecutor, SessionError, SessionProvider, Statement};

use crate::embedder::{Embedder, EmbeddingError};

const MAX_QUERY_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid search query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Which ranking produced the results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Hybrid,
    Vector,
    Keyword,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub query: String,
    pub mode: SearchMode,
    /// True when semantic search was wanted but the embedder was unavailable.
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub results: Vec<ProductInventory>,
}

/// Product search over the RLS-scoped catalog.
#[derive(Clone)]
pub struct ProductSearch {
    provider: SessionProvider,
    executor: QueryExecutor,
    embedder: Arc<dyn Embedder>,
    config: SearchConfig,
}

impl ProductSearch {
    pub fn new(provider: SessionProvider, embedder: Arc<dyn Embedder>, config: SearchConfig) -> Self {
        let executor = QueryExecutor::new(&provider);
        Self {
            provider,
            executor,
            embedder,
            config,
        }
    }

    /// Search products visible to `identity`.
    pub async fn search(
        &self,
        identity: TenantIdentity,
        query: &str,
        limit: Option<u32>,
    ) -> Result<SearchOutcome, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::InvalidQuery("query must not be empty".into()));
        }
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(SearchError::InvalidQuery(format!(
                "query must be at most {MAX_QUERY_CHARS} characters"
            )));
        }
        let limit = self.config.effective_limit(limit);

        let (statement, mode, fallback_reason) = match self.embed(query).await {
            Ok(embedding) if self.config.hybrid => (
                hybrid_statement(&self.config, embedding, query, limit),
                SearchMode::Hybrid,
                None,
            ),
            Ok(embedding) => (vector_statement(embedding, limit), SearchMode::Vector, None),
            Err(err) => {
                tracing::warn!(error = %err, "Embedding unavailable; falling back to keyword search");
                (
                    keyword_statement(&self.config, query, limit),
                    SearchMode::Keyword,
                    Some(err.to_string()),
                )
            }
        };

        let rows = self
            .provider
            .run_scoped(&self.executor, identity, &statement)
            .await?;
        let results = collapse_inventory(&rows, true)?;

        tracing::info!(
            identity = %identity,
            mode = ?mode,
            results = results.len(),
            "Product search completed"
        );
        Ok(SearchOutcome {
            query: query.to_string(),
            mode,
            degraded: fallback_reason.is_some(),
            fallback_reason,
            results,
        })
    }

    async fn embed(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        let timeout_ms = self.config.embedding_timeout_ms;
        let embedding = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.embedder.embed(query),
        )
        .await
        .map_err(|_| EmbeddingError::Timeout(timeout_ms))??;

        let expected = self.embedder.dimensions();
        if embedding.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite);
        }
        Ok(embedding)
    }
}

/// OR-join the alphanumeric terms of `query` into `to_tsquery` syntax.
///
/// Operators and punctuation never reach the tsquery parser, so arbitrary
/// user input cannot produce a syntax error.
pub fn tsquery_terms(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// `%query%` with LIKE wildcards escaped.
pub fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Expand ranked product ids to one row per visible store.
const EXPAND_TO_STORES: &str = r#"
SELECT p.product_id, p.sku, p.product_name, c.category_name,
       p.base_price, r.score::float8 AS score,
       s.store_id, s.store_name, i.stock_level
FROM ranked r
JOIN retail.products p ON p.product_id = r.product_id
LEFT JOIN retail.categories c ON c.category_id = p.category_id
JOIN retail.inventory i ON i.product_id = p.product_id
JOIN retail.stores s ON s.store_id = i.store_id
ORDER BY r.score DESC, p.product_name ASC, p.product_id ASC, s.store_id ASC
"#;

fn vector_statement(embedding: Vec<f32>, limit: u32) -> Statement {
    let sql = format!(
        r#"
WITH ranked AS (
    SELECT p.product_id,
           1 - (pde.description_embedding <=> $1::vector) AS score
    FROM retail.products p
    JOIN retail.product_description_embeddings pde ON pde.product_id = p.product_id
    WHERE pde.description_embedding IS NOT NULL
      AND EXISTS (SELECT 1 FROM retail.inventory i WHERE i.product_id = p.product_id)
    ORDER BY pde.description_embedding <=> $1::vector ASC, p.product_name ASC, p.product_id ASC
    LIMIT $2
)
{EXPAND_TO_STORES}"#
    );
    Statement::new(sql).bind(embedding).bind(limit as i32)
}

fn keyword_statement(config: &SearchConfig, query: &str, limit: u32) -> Statement {
    let sql = format!(
        r#"
WITH ranked AS (
    SELECT p.product_id,
           ts_rank_cd(
               to_tsvector($2::regconfig, p.product_name || ' ' || COALESCE(p.product_description, '')),
               to_tsquery($2::regconfig, $1), 2)
           + CASE WHEN p.product_name ILIKE $3 THEN 1.0 ELSE 0.0 END AS score
    FROM retail.products p
    WHERE (to_tsvector($2::regconfig, p.product_name || ' ' || COALESCE(p.product_description, ''))
               @@ to_tsquery($2::regconfig, $1)
           OR p.product_name ILIKE $3)
      AND EXISTS (SELECT 1 FROM retail.inventory i WHERE i.product_id = p.product_id)
    ORDER BY score DESC, p.product_name ASC, p.product_id ASC
    LIMIT $4
)
{EXPAND_TO_STORES}"#
    );
    Statement::new(sql)
        .bind(tsquery_terms(query))
        .bind(config.text_search_config.as_str())
        .bind(like_pattern(query))
        .bind(limit as i32)
}

fn hybrid_statement(config: &SearchConfig, embedding: Vec<f32>, query: &str, limit: u32) -> Statement {
    let sql = format!(
        r#"
WITH visible AS (
    SELECT DISTINCT i.product_id FROM retail.inventory i
),
vector_ranked AS (
    SELECT p.product_id,
           RANK() OVER (ORDER BY pde.description_embedding <=> $1::vector) AS vector_rank
    FROM retail.products p
    JOIN visible v ON v.product_id = p.product_id
    JOIN retail.product_description_embeddings pde ON pde.product_id = p.product_id
    WHERE pde.description_embedding IS NOT NULL
    ORDER BY pde.description_embedding <=> $1::vector, p.product_name, p.product_id
    LIMIT $4
),
keyword_ranked AS (
    SELECT p.product_id,
           RANK() OVER (ORDER BY ts_rank_cd(
               to_tsvector($3::regconfig, p.product_name || ' ' || COALESCE(p.product_description, '')),
               to_tsquery($3::regconfig, $2), 2) DESC) AS keyword_rank
    FROM retail.products p
    JOIN visible v ON v.product_id = p.product_id
    WHERE to_tsvector($3::regconfig, p.product_name || ' ' || COALESCE(p.product_description, ''))
          @@ to_tsquery($3::regconfig, $2)
    ORDER BY keyword_rank, p.product_name, p.product_id
    LIMIT $4
),
fused AS (
    SELECT COALESCE(vr.product_id, kr.product_id) AS product_id,
           COALESCE(1.0 / ($5 + vr.vector_rank), 0.0)
         + COALESCE(1.0 / ($5 + kr.keyword_rank), 0.0) AS score
    FROM vector_ranked vr
    FULL OUTER JOIN keyword_ranked kr ON vr.product_id = kr.product_id
),
ranked AS (
    SELECT f.product_id, f.score
    FROM fused f
    JOIN retail.products p ON p.product_id = f.product_id
    ORDER BY f.score DESC, p.product_name ASC, p.product_id ASC
    LIMIT $6
)
{EXPAND_TO_STORES}"#
    );
    Statement::new(sql)
        .bind(embedding)
        .bind(tsquery_terms(query))
        .bind(config.text_search_config.as_str())
        .bind(config.candidate_limit as i32)
        .bind(config.rrf_k as i32)
        .bind(limit as i32)
}
