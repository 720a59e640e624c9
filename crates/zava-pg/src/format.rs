//! Result formatter.
//!
//! Pure functions that turn executor rows into the response shapes the tools
//! return. Nothing here touches the database; the only failure is a row that
//! is missing a column or carries a value of the wrong type.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::SessionError;
use crate::executor::JsonRow;

/// The response contract a caller expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// One entry per product row.
    ProductListing,
    /// Store-joined inventory rows collapsed into one product with a
    /// per-store stock list.
    InventoryByProduct,
    /// Like `InventoryByProduct`, in rank order with a relevance score.
    RankedProducts,
    /// Per-store, per-day sales aggregates. Rows may carry `range_*`
    /// window totals computed before `LIMIT`; without them the totals cover
    /// only the returned rows.
    SalesRows,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub product_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStock {
    pub store_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_name: Option<String>,
    pub stock_level: i64,
}

/// A product with its stock in every store the caller can see.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductInventory {
    pub product_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub product_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_price: Option<f64>,
    /// Relevance for ranked results; higher is better.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub total_stock: i64,
    pub stores: Vec<StoreStock>,
}

#[derive(Debug, Deserialize)]
struct InventoryRow {
    product_id: i64,
    #[serde(default)]
    sku: Option<String>,
    product_name: String,
    #[serde(default)]
    category_name: Option<String>,
    #[serde(default)]
    base_price: Option<f64>,
    #[serde(default)]
    score: Option<f64>,
    store_id: i64,
    #[serde(default)]
    store_name: Option<String>,
    stock_level: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesRow {
    pub store_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_name: Option<String>,
    pub sale_date: String,
    pub orders: i64,
    pub units: i64,
    pub revenue: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SalesTotals {
    pub orders: i64,
    pub units: i64,
    pub revenue: f64,
}

/// Whole-range totals repeated on every sales row.
#[derive(Debug, Deserialize)]
struct RangeTotals {
    range_rows: i64,
    range_orders: i64,
    range_units: i64,
    range_revenue: f64,
}

/// Shape `rows` for the caller.
pub fn format(rows: &[JsonRow], shape: ResponseShape) -> Result<Value, SessionError> {
    let value = match shape {
        ResponseShape::ProductListing => {
            let products: Vec<Product> = decode_rows(rows)?;
            json!({ "count": products.len(), "products": products })
        }
        ResponseShape::InventoryByProduct => {
            let products = collapse_inventory(rows, false)?;
            json!({ "count": products.len(), "products": products })
        }
        ResponseShape::RankedProducts => {
            let results = collapse_inventory(rows, true)?;
            json!({ "count": results.len(), "results": results })
        }
        ResponseShape::SalesRows => {
            let sales: Vec<SalesRow> = decode_rows(rows)?;
            let range = match rows.first() {
                Some(first) if first.contains_key("range_rows") => {
                    decode_rows::<RangeTotals>(std::slice::from_ref(first))?.pop()
                }
                _ => None,
            };
            let (totals, range_rows) = match range {
                Some(range) => (
                    SalesTotals {
                        orders: range.range_orders,
                        units: range.range_units,
                        revenue: range.range_revenue,
                    },
                    range.range_rows,
                ),
                None => {
                    let totals = sales.iter().fold(SalesTotals::default(), |mut acc, row| {
                        acc.orders += row.orders;
                        acc.units += row.units;
                        acc.revenue += row.revenue;
                        acc
                    });
                    (totals, sales.len() as i64)
                }
            };
            json!({
                "count": sales.len(),
                "rows": sales,
                "totals": totals,
                "range_rows": range_rows,
                "truncated": range_rows > sales.len() as i64,
            })
        }
    };
    Ok(value)
}

/// Collapse store-joined rows into one entry per product.
///
/// Products keep the order of their first row, so ranked input stays
/// ranked. Store lists are ordered by store id.
pub fn collapse_inventory(
    rows: &[JsonRow],
    ranked: bool,
) -> Result<Vec<ProductInventory>, SessionError> {
    let decoded: Vec<InventoryRow> = decode_rows(rows)?;
    let mut products: Vec<ProductInventory> = Vec::new();
    let mut index: HashMap<i64, usize> = HashMap::new();

    for (position, row) in decoded.into_iter().enumerate() {
        if ranked && row.score.is_none() {
            return Err(SessionError::MalformedRow(format!(
                "row {position}: ranked result without a score"
            )));
        }
        if row.stock_level < 0 {
            return Err(SessionError::MalformedRow(format!(
                "row {position}: negative stock level {}",
                row.stock_level
            )));
        }

        let slot = match index.get(&row.product_id) {
            Some(&slot) => {
                let existing = &products[slot];
                if existing.product_name != row.product_name {
                    return Err(SessionError::MalformedRow(format!(
                        "row {position}: product {} has conflicting names '{}' and '{}'",
                        row.product_id, existing.product_name, row.product_name
                    )));
                }
                if existing.stores.iter().any(|s| s.store_id == row.store_id) {
                    return Err(SessionError::MalformedRow(format!(
                        "row {position}: duplicate stock entry for product {} in store {}",
                        row.product_id, row.store_id
                    )));
                }
                slot
            }
            None => {
                index.insert(row.product_id, products.len());
                products.push(ProductInventory {
                    product_id: row.product_id,
                    sku: row.sku,
                    product_name: row.product_name,
                    category_name: row.category_name,
                    base_price: row.base_price,
                    score: row.score,
                    total_stock: 0,
                    stores: Vec::new(),
                });
                products.len() - 1
            }
        };

        let product = &mut products[slot];
        product.total_stock += row.stock_level;
        product.stores.push(StoreStock {
            store_id: row.store_id,
            store_name: row.store_name,
            stock_level: row.stock_level,
        });
    }

    for product in &mut products {
        product.stores.sort_by_key(|s| s.store_id);
    }
    Ok(products)
}

fn decode_rows<T: DeserializeOwned>(rows: &[JsonRow]) -> Result<Vec<T>, SessionError> {
    rows.iter()
        .enumerate()
        .map(|(position, row)| {
            serde_json::from_value(Value::Object(row.clone()))
                .map_err(|e| SessionError::MalformedRow(format!("row {position}: {e}")))
        })
        .collect()
}
