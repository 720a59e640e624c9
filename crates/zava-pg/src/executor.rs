//! Guarded statement execution.
//!
//! Statements only run on a session whose applied identity equals the
//! caller's. Each statement is bounded twice: by the server-side
//! `statement_timeout` installed on every pooled connection, and by a client
//! deadline slightly past it. When the client deadline fires (or the future
//! is dropped mid-statement) the caller gets its answer at once, the backend
//! is cancelled with `pg_cancel_backend` from a separate, time-bounded
//! connection in the background, and the session is marked so that release
//! discards it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgColumn, PgConnectOptions, PgRow};
use sqlx::{Arguments, Column, Connection, PgConnection, Row, TypeInfo};
use zava_core::TenantIdentity;

use crate::context::within;
use crate::error::{DbErrorClass, SessionError};
use crate::provider::SessionProvider;
use crate::session::Session;

/// A result row: column name to JSON value.
pub type JsonRow = Map<String, Value>;

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// Text-typed NULL; cast it in SQL (`$1::int`) when another type is needed.
    Null,
    Bool(bool),
    Int(i32),
    BigInt(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    /// Sent as a pgvector text literal; cast with `$n::vector` in SQL.
    Vector(Vec<f32>),
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        SqlParam::Int(v)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::BigInt(v)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Float(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Bool(v)
    }
}

impl From<NaiveDate> for SqlParam {
    fn from(v: NaiveDate) -> Self {
        SqlParam::Date(v)
    }
}

impl From<Vec<f32>> for SqlParam {
    fn from(v: Vec<f32>) -> Self {
        SqlParam::Vector(v)
    }
}

/// Render a vector as the text form pgvector accepts: `[0.1,0.2,0.3]`.
pub fn vector_literal(values: &[f32]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// A SQL template plus its bound parameters.
///
/// Values are never interpolated into the SQL text.
#[derive(Debug, Clone)]
pub struct Statement {
    sql: String,
    params: Vec<SqlParam>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Bind the next positional parameter.
    pub fn bind(mut self, param: impl Into<SqlParam>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    fn arguments(&self) -> Result<PgArguments, SessionError> {
        let mut args = PgArguments::default();
        for param in &self.params {
            match param {
                SqlParam::Null => args_add(&mut args, Option::<String>::None)?,
                SqlParam::Bool(v) => args_add(&mut args, *v)?,
                SqlParam::Int(v) => args_add(&mut args, *v)?,
                SqlParam::BigInt(v) => args_add(&mut args, *v)?,
                SqlParam::Float(v) => args_add(&mut args, *v)?,
                SqlParam::Text(v) => args_add(&mut args, v.clone())?,
                SqlParam::Date(v) => args_add(&mut args, *v)?,
                SqlParam::Timestamp(v) => args_add(&mut args, *v)?,
                SqlParam::Vector(v) => args_add(&mut args, vector_literal(v))?,
            }
        }
        Ok(args)
    }
}

fn args_add<T>(args: &mut PgArguments, v: T) -> Result<(), SessionError>
where
    T: Send + Sync + 'static,
    for<'q> T: sqlx::Encode<'q, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    args.add(v).map_err(|e| SessionError::QueryFailed {
        class: DbErrorClass::DataException,
        sqlstate: None,
        message: format!("failed to encode parameter: {e}"),
    })
}

/// Runs statements on security-scoped sessions.
#[derive(Clone)]
pub struct QueryExecutor {
    statement_timeout: Duration,
    cancel_grace: Duration,
    connect_options: Arc<PgConnectOptions>,
}

impl QueryExecutor {
    pub fn new(provider: &SessionProvider) -> Self {
        let config = provider.pool_config();
        Self {
            statement_timeout: Duration::from_millis(config.statement_timeout_ms),
            cancel_grace: Duration::from_millis(config.cancel_grace_ms),
            connect_options: provider.connect_options(),
        }
    }

    /// Run one statement as its own implicit transaction and return its rows.
    pub async fn execute(
        &self,
        session: &mut Session,
        caller: &TenantIdentity,
        statement: &Statement,
    ) -> Result<Vec<JsonRow>, SessionError> {
        ensure_context(session, caller)?;
        self.run(session, statement).await
    }

    /// Open an explicit transaction. Statements run through the returned
    /// handle share one snapshot and commit or roll back together.
    pub async fn begin<'s>(
        &'s self,
        session: &'s mut Session,
        caller: &TenantIdentity,
    ) -> Result<Transaction<'s>, SessionError> {
        ensure_context(session, caller)?;
        self.run(session, &Statement::new("BEGIN")).await?;
        session.in_transaction = true;
        Ok(Transaction {
            executor: self,
            session,
            caller: *caller,
            open: true,
        })
    }

    /// Run `statements` in order inside one transaction.
    pub async fn execute_in_transaction(
        &self,
        session: &mut Session,
        caller: &TenantIdentity,
        statements: &[Statement],
    ) -> Result<Vec<Vec<JsonRow>>, SessionError> {
        let mut tx = self.begin(session, caller).await?;
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            match tx.execute(statement).await {
                Ok(rows) => results.push(rows),
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::warn!(error = %rollback_err, "Rollback failed");
                    }
                    return Err(err);
                }
            }
        }
        tx.commit().await?;
        Ok(results)
    }

    async fn run(
        &self,
        session: &mut Session,
        statement: &Statement,
    ) -> Result<Vec<JsonRow>, SessionError> {
        let args = statement.arguments()?;
        let started = Instant::now();
        let backend_pid = session.backend_pid;
        let session_id = session.id;

        let Some(conn) = session.conn.as_deref_mut() else {
            return Err(SessionError::SessionPoisoned);
        };
        session.in_flight = true;
        let deadline = self.statement_timeout + self.cancel_grace;
        let mut cancel = CancelOnDrop {
            backend_pid,
            options: self.connect_options.clone(),
            deadline,
            armed: true,
        };

        let outcome = tokio::time::timeout(
            deadline,
            sqlx::query_with(statement.sql(), args).fetch_all(conn),
        )
        .await;

        let timeout_ms = self.statement_timeout.as_millis() as u64;
        let rows = match outcome {
            Err(_elapsed) => {
                // The cancel request runs on its own; the caller is not held
                // up by a database that has stopped answering.
                drop(cancel);
                session.poisoned = true;
                tracing::warn!(
                    %session_id,
                    backend_pid,
                    timeout_ms,
                    "Statement exceeded client deadline; cancelling backend"
                );
                return Err(SessionError::QueryTimeout { timeout_ms });
            }
            Ok(result) => {
                cancel.armed = false;
                session.in_flight = false;
                result
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let rows = match rows {
            Ok(rows) => rows,
            Err(err) => {
                let err = match SessionError::from(err) {
                    SessionError::QueryFailed {
                        class: DbErrorClass::QueryCanceled,
                        ..
                    } => SessionError::QueryTimeout { timeout_ms },
                    other => other,
                };
                if err.breaks_connection() && !matches!(err, SessionError::QueryTimeout { .. }) {
                    session.poisoned = true;
                }
                tracing::debug!(%session_id, elapsed_ms, error = %err, "Statement failed");
                return Err(err);
            }
        };

        tracing::trace!(%session_id, elapsed_ms, rows = rows.len(), "Statement completed");
        rows.iter().map(row_to_json).collect()
    }
}

/// The executor's half of the apply-then-execute contract.
fn ensure_context(session: &Session, caller: &TenantIdentity) -> Result<(), SessionError> {
    if session.is_poisoned() {
        return Err(SessionError::SessionPoisoned);
    }
    match session.applied {
        Some(applied) if applied == *caller => Ok(()),
        Some(applied) => Err(SessionError::ContextNotApplied {
            expected: caller.to_string(),
            applied: applied.to_string(),
        }),
        None => Err(SessionError::ContextNotApplied {
            expected: caller.to_string(),
            applied: "none".to_string(),
        }),
    }
}

/// An explicit multi-statement transaction on one session.
///
/// Dropping it without `commit` or `rollback` marks the session so release
/// discards the connection, which aborts the transaction server side.
pub struct Transaction<'s> {
    executor: &'s QueryExecutor,
    session: &'s mut Session,
    caller: TenantIdentity,
    open: bool,
}

impl Transaction<'_> {
    pub async fn execute(&mut self, statement: &Statement) -> Result<Vec<JsonRow>, SessionError> {
        ensure_context(self.session, &self.caller)?;
        self.executor.run(self.session, statement).await
    }

    pub async fn commit(mut self) -> Result<(), SessionError> {
        self.finish("COMMIT").await
    }

    pub async fn rollback(mut self) -> Result<(), SessionError> {
        self.finish("ROLLBACK").await
    }

    async fn finish(&mut self, command: &str) -> Result<(), SessionError> {
        self.open = false;
        let result = self.executor.run(self.session, &Statement::new(command)).await;
        match result {
            Ok(_) => {
                self.session.in_transaction = false;
                Ok(())
            }
            Err(err) => {
                self.session.poisoned = true;
                Err(err)
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.open {
            self.session.poisoned = true;
            tracing::warn!(session_id = %self.session.id, "Transaction dropped while open");
        }
    }
}

/// Cancels the backend if dropped while armed: the statement future was
/// abandoned, or the client deadline fired.
struct CancelOnDrop {
    backend_pid: i32,
    options: Arc<PgConnectOptions>,
    deadline: Duration,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let backend_pid = self.backend_pid;
        let options = self.options.clone();
        let deadline = self.deadline;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match cancel_backend(&options, backend_pid, deadline).await {
                        Ok(cancelled) => {
                            tracing::info!(backend_pid, cancelled, "Cancelled backend statement")
                        }
                        Err(err) => tracing::warn!(
                            backend_pid,
                            error = %err,
                            "Failed to cancel backend statement"
                        ),
                    }
                });
            }
            Err(_) => tracing::warn!(backend_pid, "No runtime available to cancel statement"),
        }
    }
}

/// Ask the server to cancel `backend_pid`'s current statement. The whole
/// exchange, connection handshake included, is bounded by `deadline`.
async fn cancel_backend(
    options: &PgConnectOptions,
    backend_pid: i32,
    deadline: Duration,
) -> Result<bool, SessionError> {
    within(deadline, async {
        let mut conn = PgConnection::connect_with(options).await?;
        let cancelled: bool = sqlx::query_scalar("SELECT pg_cancel_backend($1)")
            .bind(backend_pid)
            .fetch_one(&mut conn)
            .await?;
        conn.close().await?;
        Ok(cancelled)
    })
    .await
}

/// Convert a row into a JSON object keyed by column name.
pub fn row_to_json(row: &PgRow) -> Result<JsonRow, SessionError> {
    let mut map = Map::with_capacity(row.columns().len());
    for column in row.columns() {
        let value = column_value(row, column)?;
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

fn column_value(row: &PgRow, column: &PgColumn) -> Result<Value, SessionError> {
    let idx = column.ordinal();
    let value = match column.type_info().name() {
        "BOOL" => row.try_get::<Option<bool>, _>(idx)?.map(Value::Bool),
        "INT2" => row.try_get::<Option<i16>, _>(idx)?.map(Value::from),
        "INT4" => row.try_get::<Option<i32>, _>(idx)?.map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(Value::from),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)?
            .and_then(|v| serde_json::Number::from_f64(v as f64))
            .map(Value::Number),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(idx)?
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        "NUMERIC" => row
            .try_get::<Option<bigdecimal::BigDecimal>, _>(idx)?
            .and_then(|v| bigdecimal::ToPrimitive::to_f64(&v))
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(idx)?.map(Value::String)
        }
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(idx)?
            .map(|d| Value::String(d.to_string())),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)?
            .map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)?
            .map(|d| Value::String(d.to_rfc3339())),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(idx)?
            .map(|u| Value::String(u.to_string())),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(idx)?,
        other => {
            return Err(SessionError::MalformedRow(format!(
                "column '{}' has unsupported type {}",
                column.name(),
                other
            )));
        }
    };
    Ok(value.unwrap_or(Value::Null))
}
