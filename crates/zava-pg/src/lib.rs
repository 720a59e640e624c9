//! Row-level-security scoped Postgres sessions.
//!
//! A request follows one fixed path:
//!
//! 1. [`SessionProvider::acquire`] leases a connection from the bounded pool
//! 2. [`SecurityContext::apply`] binds it to the caller's [`TenantIdentity`](zava_core::TenantIdentity)
//! 3. [`QueryExecutor::execute`] runs parameterized statements, refusing to
//!    run on a session bound to anyone else
//! 4. [`format::format`] shapes the rows for the caller
//! 5. [`SessionProvider::release`] clears the context and returns the
//!    connection, or closes it if the context cannot be verified

pub mod context;
pub mod enforcement;
pub mod error;
pub mod executor;
pub mod format;
pub mod provider;
pub mod session;

pub use context::SecurityContext;
pub use enforcement::{RowSecurityReport, TableSecurity, verify_row_security};
pub use error::{DbErrorClass, SessionError};
pub use executor::{JsonRow, QueryExecutor, SqlParam, Statement, Transaction, row_to_json, vector_literal};
pub use format::{ProductInventory, ResponseShape, StoreStock};
pub use provider::{PoolStatus, ReleaseOutcome, SessionProvider};
pub use session::Session;

/// Quote a single identifier. Only plain ASCII identifiers are accepted.
pub fn quote_ident(ident: &str) -> Result<String, SessionError> {
    if ident.is_empty() {
        return Err(SessionError::Configuration("empty identifier".to_string()));
    }
    if !ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SessionError::Configuration(format!("invalid identifier '{}'", ident)));
    }
    Ok(format!("\"{}\"", ident))
}

/// Split `schema.table` (or a bare `table`) after validating both parts.
pub fn split_qualified(name: &str) -> Result<(Option<&str>, &str), SessionError> {
    let (schema, object) = match name.split_once('.') {
        Some((schema, object)) => (Some(schema), object),
        None => (None, name),
    };
    if let Some(schema) = schema {
        quote_ident(schema)?;
    }
    quote_ident(object)?;
    Ok((schema, object))
}

/// Quote `schema.table` (or a bare name) for interpolation into SQL.
pub fn quote_qualified(name: &str) -> Result<String, SessionError> {
    match split_qualified(name)? {
        (Some(schema), object) => Ok(format!("{}.{}", quote_ident(schema)?, quote_ident(object)?)),
        (None, object) => quote_ident(object),
    }
}
