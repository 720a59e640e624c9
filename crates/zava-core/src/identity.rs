//! Tenant identity.
//!
//! Every request runs as exactly one identity: a store manager bound to a
//! single store, or a global admin that is not bound to any store. The
//! identity is immutable for the lifetime of a request and is only ever used
//! to parameterize the session's security context.

use std::fmt;
use std::str::FromStr;

use crate::config::RlsConfig;

/// Who a request is executed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TenantIdentity {
    /// A store manager; row visibility is limited to this store.
    Store(i32),
    /// Unrestricted access across all stores.
    GlobalAdmin,
}

/// Error returned when a textual identity cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tenant identity '{0}': expected a positive store id or 'global'")]
pub struct IdentityParseError(pub String);

impl TenantIdentity {
    /// Identity bound to a single store.
    pub fn store(store_id: i32) -> Self {
        Self::Store(store_id)
    }

    pub fn is_global_admin(&self) -> bool {
        matches!(self, Self::GlobalAdmin)
    }

    /// The bound store id, if any.
    pub fn store_id(&self) -> Option<i32> {
        match self {
            Self::Store(id) => Some(*id),
            Self::GlobalAdmin => None,
        }
    }

    /// The value written into the session setting for this identity.
    pub fn context_value(&self, rls: &RlsConfig) -> String {
        match self {
            Self::Store(id) => id.to_string(),
            Self::GlobalAdmin => rls.global_admin_value.clone(),
        }
    }
}

impl FromStr for TenantIdentity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "global" | "global-admin" | "global_admin" | "admin" | "*" => {
                return Ok(Self::GlobalAdmin);
            }
            _ => {}
        }

        let id = trimmed
            .strip_prefix("store:")
            .unwrap_or(trimmed)
            .parse::<i32>()
            .map_err(|_| IdentityParseError(s.to_string()))?;
        if id <= 0 {
            return Err(IdentityParseError(s.to_string()));
        }
        Ok(Self::Store(id))
    }
}

impl fmt::Display for TenantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(id) => write!(f, "store:{}", id),
            Self::GlobalAdmin => write!(f, "global-admin"),
        }
    }
}
