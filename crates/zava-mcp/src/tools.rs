//! Tool registry and the retail tool definitions.
//!
//! Each tool's input schema is compiled once at registration; arguments are
//! validated against it before any database session is leased.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::error::McpError;
use crate::protocol::{ToolAnnotations, ToolDefinition};

pub const GET_PRODUCTS_BY_NAME: &str = "get_products_by_name";
pub const SEMANTIC_SEARCH_PRODUCTS: &str = "semantic_search_products";
pub const GET_STORE_INVENTORY: &str = "get_store_inventory";
pub const GET_SALES_BY_DATE_RANGE: &str = "get_sales_by_date_range";
pub const GET_CURRENT_UTC_DATE: &str = "get_current_utc_date";

struct RegisteredTool {
    definition: ToolDefinition,
    validator: jsonschema::Validator,
}

/// Registry of available MCP tools, listed in name order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every retail tool.
    pub fn retail() -> Result<Self, McpError> {
        let mut registry = Self::new();
        for tool in retail_tools() {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    /// Register a tool, compiling its input schema.
    pub fn register(&mut self, tool: ToolDefinition) -> Result<(), McpError> {
        let validator = jsonschema::validator_for(&tool.input_schema).map_err(|e| {
            McpError::StartupFailed(format!("invalid input schema for tool {}: {}", tool.name, e))
        })?;
        self.tools.insert(
            tool.name.clone(),
            RegisteredTool {
                definition: tool,
                validator,
            },
        );
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|t| &t.definition)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all tools.
    pub fn list(&self) -> Vec<&ToolDefinition> {
        self.tools.values().map(|t| &t.definition).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Check `arguments` against the tool's input schema.
    pub fn validate(&self, name: &str, arguments: &Value) -> Result<(), McpError> {
        let tool = self.tools.get(name).ok_or_else(|| McpError::ToolNotFound {
            name: name.to_string(),
        })?;
        let problems: Vec<String> = tool
            .validator
            .iter_errors(arguments)
            .take(5)
            .map(|e| {
                let path = e.instance_path().to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(McpError::InvalidArguments {
                tool: name.to_string(),
                reason: problems.join("; "),
            })
        }
    }
}

fn read_only(tenant_scoped: bool) -> Option<ToolAnnotations> {
    Some(ToolAnnotations {
        read_only: Some(true),
        tenant_scoped: Some(tenant_scoped),
    })
}

fn limit_schema(max: u32) -> Value {
    json!({
        "type": "integer",
        "minimum": 1,
        "maximum": max,
        "description": "Maximum number of results"
    })
}

/// The retail tools exposed to agents.
pub fn retail_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: GET_PRODUCTS_BY_NAME.to_string(),
            description: Some(
                "Find catalog products whose name contains the given text.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "minLength": 1, "maxLength": 200 },
                    "limit": limit_schema(100)
                },
                "required": ["name"],
                "additionalProperties": false
            }),
            annotations: read_only(true),
        },
        ToolDefinition {
            name: SEMANTIC_SEARCH_PRODUCTS.to_string(),
            description: Some(
                "Search products by meaning. Returns ranked products with stock in the stores \
                 you manage. Falls back to keyword matching when embeddings are unavailable."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "minLength": 1, "maxLength": 500 },
                    "limit": limit_schema(100)
                },
                "required": ["query"],
                "additionalProperties": false
            }),
            annotations: read_only(true),
        },
        ToolDefinition {
            name: GET_STORE_INVENTORY.to_string(),
            description: Some(
                "Stock levels per product across the stores you manage, optionally filtered \
                 by product name or a low-stock threshold."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "product_name": { "type": "string", "minLength": 1, "maxLength": 200 },
                    "low_stock_threshold": { "type": "integer", "minimum": 0 },
                    "limit": limit_schema(500)
                },
                "additionalProperties": false
            }),
            annotations: read_only(true),
        },
        ToolDefinition {
            name: GET_SALES_BY_DATE_RANGE.to_string(),
            description: Some(
                "Orders, units and revenue per store per day between two dates (inclusive)."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "start_date": { "type": "string", "pattern": "^\\d{4}-\\d{2}-\\d{2}$" },
                    "end_date": { "type": "string", "pattern": "^\\d{4}-\\d{2}-\\d{2}$" },
                    "limit": limit_schema(1000)
                },
                "required": ["start_date", "end_date"],
                "additionalProperties": false
            }),
            annotations: read_only(true),
        },
        ToolDefinition {
            name: GET_CURRENT_UTC_DATE.to_string(),
            description: Some("Current UTC date and time, for resolving relative dates.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
            annotations: read_only(false),
        },
    ]
}
