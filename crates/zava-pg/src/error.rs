//! Error types for session handling and query execution.
//!
//! Every failure distinguishes "the caller has no access" from "the system is
//! broken": permission errors raised by row-level security are reported as
//! [`SessionError::QueryFailed`] with [`DbErrorClass::PermissionDenied`], and
//! [`SessionError::is_access_denied`] is the single place that answers the
//! question.

use thiserror::Error;

/// Broad class of a database error, derived from its SQLSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DbErrorClass {
    /// `42501 insufficient_privilege`, including RLS `WITH CHECK` violations.
    PermissionDenied,
    /// Class 23.
    ConstraintViolation,
    /// Class 42 other than 42501.
    Syntax,
    /// Class 22.
    DataException,
    /// Class 40: serialization failures and deadlocks.
    TransactionRollback,
    /// `57014 query_canceled`, raised for statement timeouts and cancel requests.
    QueryCanceled,
    /// Class 08 and client side I/O failures.
    Connection,
    Other,
}

impl DbErrorClass {
    /// Classify an optional SQLSTATE code.
    pub fn from_sqlstate(code: Option<&str>) -> Self {
        let Some(code) = code else {
            return Self::Other;
        };
        match code {
            "42501" => Self::PermissionDenied,
            "57014" => Self::QueryCanceled,
            _ => match code.get(..2) {
                Some("23") => Self::ConstraintViolation,
                Some("42") => Self::Syntax,
                Some("22") => Self::DataException,
                Some("40") => Self::TransactionRollback,
                Some("08") => Self::Connection,
                _ => Self::Other,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::ConstraintViolation => "constraint_violation",
            Self::Syntax => "syntax",
            Self::DataException => "data_exception",
            Self::TransactionRollback => "transaction_rollback",
            Self::QueryCanceled => "query_canceled",
            Self::Connection => "connection",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for DbErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while leasing sessions, applying security contexts,
/// executing statements and formatting their results.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Could not establish the pool or a connection.
    #[error("failed to connect to database: {0}")]
    Connect(String),

    /// No connection became free within the acquire timeout.
    #[error("no database session available after waiting {waited_ms}ms")]
    ResourceExhausted { waited_ms: u64 },

    /// The tenant identifier does not resolve to a known store.
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// A statement was attempted on a session whose security context does
    /// not belong to the caller.
    #[error("security context for {expected} is not applied to this session (applied: {applied})")]
    ContextNotApplied { expected: String, applied: String },

    /// The security context cannot change while a transaction is open.
    #[error("cannot change the security context inside an open transaction")]
    TransactionOpen,

    /// The database rejected the statement.
    #[error("query failed ({class}): {message}")]
    QueryFailed {
        class: DbErrorClass,
        sqlstate: Option<String>,
        message: String,
    },

    /// The statement exceeded its timeout and was cancelled.
    #[error("query exceeded the {timeout_ms}ms statement timeout and was cancelled")]
    QueryTimeout { timeout_ms: u64 },

    /// The session was left in an unknown state and can no longer be used.
    #[error("session is no longer usable and will be discarded")]
    SessionPoisoned,

    /// A result row did not have the expected columns or types.
    #[error("malformed row: {0}")]
    MalformedRow(String),

    /// Row-level security is not in force for the configured tables or role.
    #[error("row level security is not enforced: {}", .0.join("; "))]
    RowSecurityNotEnforced(Vec<String>),

    /// Invalid configuration detected at runtime.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SessionError {
    /// Stable machine readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::InvalidIdentity(_) => "invalid_identity",
            Self::ContextNotApplied { .. } => "context_not_applied",
            Self::TransactionOpen => "transaction_open",
            Self::QueryFailed { .. } => "query_failed",
            Self::QueryTimeout { .. } => "query_timeout",
            Self::SessionPoisoned => "session_poisoned",
            Self::MalformedRow(_) => "malformed_row",
            Self::RowSecurityNotEnforced(_) => "row_security_not_enforced",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Whether the same request may succeed if retried later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ResourceExhausted { .. } | Self::QueryTimeout { .. } | Self::Connect(_) => true,
            Self::QueryFailed { class, .. } => {
                matches!(class, DbErrorClass::TransactionRollback | DbErrorClass::Connection)
            }
            _ => false,
        }
    }

    /// The database refused access. This is an expected outcome under RLS,
    /// not a malfunction.
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            Self::QueryFailed {
                class: DbErrorClass::PermissionDenied,
                ..
            }
        )
    }

    /// The error left the connection in a state that must not be reused.
    pub(crate) fn breaks_connection(&self) -> bool {
        match self {
            Self::SessionPoisoned | Self::QueryTimeout { .. } => true,
            Self::QueryFailed { class, .. } => *class == DbErrorClass::Connection,
            _ => false,
        }
    }
}

impl From<sqlx::Error> for SessionError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Self::ResourceExhausted { waited_ms: 0 },
            sqlx::Error::PoolClosed => Self::Connect("session pool is closed".to_string()),
            sqlx::Error::Database(db) => {
                let sqlstate = db.code().map(|c| c.into_owned());
                Self::QueryFailed {
                    class: DbErrorClass::from_sqlstate(sqlstate.as_deref()),
                    sqlstate,
                    message: db.message().to_string(),
                }
            }
            sqlx::Error::ColumnDecode { index, source } => {
                Self::MalformedRow(format!("column {index}: {source}"))
            }
            sqlx::Error::ColumnNotFound(column) => {
                Self::MalformedRow(format!("missing column '{column}'"))
            }
            sqlx::Error::Decode(source) => Self::MalformedRow(source.to_string()),
            err @ (sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_)) => {
                Self::QueryFailed {
                    class: DbErrorClass::Connection,
                    sqlstate: None,
                    message: err.to_string(),
                }
            }
            other => Self::QueryFailed {
                class: DbErrorClass::Other,
                sqlstate: None,
                message: other.to_string(),
            },
        }
    }
}
