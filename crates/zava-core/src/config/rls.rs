//! Row-level security settings.
//!
//! These describe how a tenant identity is communicated to the database's
//! RLS policies: the name of the session setting, the sentinel values for
//! global admin and for "no tenant", and where known store ids live.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RlsConfig {
    /// Custom session setting read by the policies (`current_setting(...)`).
    #[serde(default = "default_setting_name")]
    pub setting_name: String,

    /// Value meaning "all stores".
    #[serde(default = "default_global_admin_value")]
    pub global_admin_value: String,

    /// Value left on a connection between requests. Matches no store.
    #[serde(default = "default_cleared_value")]
    pub cleared_value: String,

    /// Table holding the store directory, optionally schema qualified.
    #[serde(default = "default_store_table")]
    pub store_table: String,

    #[serde(default = "default_store_id_column")]
    pub store_id_column: String,

    /// Tables that must have row security enabled.
    #[serde(default = "default_protected_tables")]
    pub protected_tables: Vec<String>,

    /// Refuse to serve when any protected table is not covered by a policy.
    #[serde(default = "default_true")]
    pub require_row_security: bool,
}

impl Default for RlsConfig {
    fn default() -> Self {
        Self {
            setting_name: default_setting_name(),
            global_admin_value: default_global_admin_value(),
            cleared_value: default_cleared_value(),
            store_table: default_store_table(),
            store_id_column: default_store_id_column(),
            protected_tables: default_protected_tables(),
            require_row_security: true,
        }
    }
}

fn default_setting_name() -> String {
    "app.current_store_id".to_string()
}

fn default_global_admin_value() -> String {
    "all".to_string()
}

fn default_cleared_value() -> String {
    "none".to_string()
}

fn default_store_table() -> String {
    "retail.stores".to_string()
}

fn default_store_id_column() -> String {
    "store_id".to_string()
}

fn default_protected_tables() -> Vec<String> {
    ["retail.stores", "retail.inventory", "retail.orders", "retail.order_items", "retail.customers"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_true() -> bool {
    true
}
