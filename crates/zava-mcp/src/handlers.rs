//! Retail tool execution.
//!
//! Every tenant-scoped tool follows the same path: lease a session, apply
//! the caller's identity, run one parameterized statement, release, then
//! format the rows.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use zava_core::{SearchConfig, TenantIdentity};
use zava_pg::format::{ResponseShape, format};
use zava_pg::{PoolStatus, QueryExecutor, SessionProvider, SqlParam, Statement};
use zava_search::ProductSearch;
use zava_search::search::like_pattern;

use crate::error::McpError;
use crate::tools::{
    GET_CURRENT_UTC_DATE, GET_PRODUCTS_BY_NAME, GET_SALES_BY_DATE_RANGE, GET_STORE_INVENTORY,
    SEMANTIC_SEARCH_PRODUCTS,
};

const DEFAULT_PRODUCT_LIMIT: u32 = 20;
const DEFAULT_INVENTORY_LIMIT: u32 = 50;
const DEFAULT_SALES_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
struct ProductsByNameArgs {
    name: String,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SemanticSearchArgs {
    query: String,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StoreInventoryArgs {
    product_name: Option<String>,
    low_stock_threshold: Option<i32>,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SalesByDateArgs {
    start_date: NaiveDate,
    end_date: NaiveDate,
    limit: Option<u32>,
}

/// Executes retail tools against the RLS-scoped database.
#[derive(Clone)]
pub struct RetailTools {
    provider: SessionProvider,
    executor: QueryExecutor,
    search: ProductSearch,
    search_config: SearchConfig,
}

impl RetailTools {
    pub fn new(provider: SessionProvider, search: ProductSearch, search_config: SearchConfig) -> Self {
        let executor = QueryExecutor::new(&provider);
        Self {
            provider,
            executor,
            search,
            search_config,
        }
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.provider.status()
    }

    pub fn provider(&self) -> &SessionProvider {
        &self.provider
    }

    /// Run tool `name`. Arguments must already have passed schema validation.
    pub async fn call(
        &self,
        name: &str,
        arguments: Value,
        identity: Option<TenantIdentity>,
    ) -> Result<Value, McpError> {
        if name == GET_CURRENT_UTC_DATE {
            return Ok(current_utc_date(Utc::now()));
        }

        let identity = identity.ok_or(McpError::MissingIdentity)?;
        let mut result = match name {
            GET_PRODUCTS_BY_NAME => self.products_by_name(identity, parse_args(name, arguments)?).await?,
            SEMANTIC_SEARCH_PRODUCTS => {
                let args: SemanticSearchArgs = parse_args(name, arguments)?;
                let outcome = self.search.search(identity, &args.query, args.limit).await?;
                serde_json::to_value(outcome)?
            }
            GET_STORE_INVENTORY => self.store_inventory(identity, parse_args(name, arguments)?).await?,
            GET_SALES_BY_DATE_RANGE => self.sales_by_date(identity, parse_args(name, arguments)?).await?,
            other => {
                return Err(McpError::ToolNotFound {
                    name: other.to_string(),
                });
            }
        };

        if let Value::Object(map) = &mut result {
            map.insert("identity".to_string(), Value::String(identity.to_string()));
        }
        Ok(result)
    }

    async fn products_by_name(
        &self,
        identity: TenantIdentity,
        args: ProductsByNameArgs,
    ) -> Result<Value, McpError> {
        let statement = products_by_name_statement(&args.name, args.limit.unwrap_or(DEFAULT_PRODUCT_LIMIT));
        let rows = self.provider.run_scoped(&self.executor, identity, &statement).await?;
        Ok(format(&rows, ResponseShape::ProductListing)?)
    }

    async fn store_inventory(
        &self,
        identity: TenantIdentity,
        args: StoreInventoryArgs,
    ) -> Result<Value, McpError> {
        let statement = store_inventory_statement(
            args.product_name.as_deref(),
            args.low_stock_threshold,
            args.limit.unwrap_or(DEFAULT_INVENTORY_LIMIT),
        );
        let rows = self.provider.run_scoped(&self.executor, identity, &statement).await?;
        Ok(format(&rows, ResponseShape::InventoryByProduct)?)
    }

    async fn sales_by_date(
        &self,
        identity: TenantIdentity,
        args: SalesByDateArgs,
    ) -> Result<Value, McpError> {
        if args.start_date > args.end_date {
            return Err(McpError::InvalidArguments {
                tool: GET_SALES_BY_DATE_RANGE.to_string(),
                reason: format!(
                    "start_date {} is after end_date {}",
                    args.start_date, args.end_date
                ),
            });
        }
        let statement = sales_statement(
            args.start_date,
            args.end_date,
            args.limit.unwrap_or(DEFAULT_SALES_LIMIT),
        );
        let rows = self.provider.run_scoped(&self.executor, identity, &statement).await?;
        let mut value = format(&rows, ResponseShape::SalesRows)?;
        value["start_date"] = json!(args.start_date.to_string());
        value["end_date"] = json!(args.end_date.to_string());
        Ok(value)
    }

    pub fn search_config(&self) -> &SearchConfig {
        &self.search_config
    }
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, McpError> {
    serde_json::from_value(arguments).map_err(|e| McpError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

fn current_utc_date(now: DateTime<Utc>) -> Value {
    json!({
        "utc_now": now.to_rfc3339(),
        "date": now.date_naive().to_string(),
    })
}

fn products_by_name_statement(name: &str, limit: u32) -> Statement {
    Statement::new(
        r#"
SELECT p.product_id, p.sku, p.product_name, c.category_name,
       p.base_price, p.product_description
FROM retail.products p
LEFT JOIN retail.categories c ON c.category_id = p.category_id
WHERE p.product_name ILIKE $1
ORDER BY p.product_name ASC, p.product_id ASC
LIMIT $2
"#,
    )
    .bind(like_pattern(name.trim()))
    .bind(limit as i32)
}

fn store_inventory_statement(product_name: Option<&str>, low_stock_threshold: Option<i32>, limit: u32) -> Statement {
    let name = match product_name {
        Some(name) => SqlParam::Text(like_pattern(name.trim())),
        None => SqlParam::Null,
    };
    Statement::new(
        r#"
WITH matched AS (
    SELECT DISTINCT p.product_id, p.product_name
    FROM retail.inventory i
    JOIN retail.products p ON p.product_id = i.product_id
    WHERE ($1::text IS NULL OR p.product_name ILIKE $1::text)
      AND i.stock_level <= $2
    ORDER BY p.product_name ASC, p.product_id ASC
    LIMIT $3
)
SELECT p.product_id, p.sku, p.product_name, c.category_name, p.base_price,
       s.store_id, s.store_name, i.stock_level
FROM matched m
JOIN retail.products p ON p.product_id = m.product_id
LEFT JOIN retail.categories c ON c.category_id = p.category_id
JOIN retail.inventory i ON i.product_id = p.product_id
JOIN retail.stores s ON s.store_id = i.store_id
WHERE i.stock_level <= $2
ORDER BY p.product_name ASC, p.product_id ASC, s.store_id ASC
"#,
    )
    .bind(name)
    .bind(low_stock_threshold.unwrap_or(i32::MAX))
    .bind(limit as i32)
}

fn sales_statement(start: NaiveDate, end: NaiveDate, limit: u32) -> Statement {
    Statement::new(
        r#"
SELECT o.store_id, s.store_name,
       to_char(o.order_date, 'YYYY-MM-DD') AS sale_date,
       COUNT(DISTINCT o.order_id) AS orders,
       COALESCE(SUM(oi.quantity), 0)::int8 AS units,
       COALESCE(SUM(oi.total_amount), 0)::float8 AS revenue,
       COUNT(*) OVER () AS range_rows,
       (SUM(COUNT(DISTINCT o.order_id)) OVER ())::int8 AS range_orders,
       (SUM(COALESCE(SUM(oi.quantity), 0)) OVER ())::int8 AS range_units,
       (SUM(COALESCE(SUM(oi.total_amount), 0)) OVER ())::float8 AS range_revenue
FROM retail.orders o
JOIN retail.stores s ON s.store_id = o.store_id
LEFT JOIN retail.order_items oi ON oi.order_id = o.order_id
WHERE o.order_date >= $1 AND o.order_date <= $2
GROUP BY o.store_id, s.store_name, sale_date
ORDER BY sale_date ASC, o.store_id ASC
LIMIT $3
"#,
    )
    .bind(start)
    .bind(end)
    .bind(limit as i32)
}
