//! Security-context setter.
//!
//! The tenant identity reaches the database as a custom, session-scoped
//! setting (`app.current_store_id` by default) that the RLS policies read
//! with `current_setting(...)`. This module only sets, verifies and clears
//! that value; the filtering itself is done by the policies.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgConnection;
use zava_core::{PoolConfig, RlsConfig, TenantIdentity};

use crate::error::SessionError;
use crate::quote_qualified;
use crate::session::Session;

/// Applies and clears the per-session security context.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    rls: Arc<RlsConfig>,
    store_lookup_sql: Arc<str>,
    deadline: Duration,
}

/// Run one session round trip, giving up after `deadline`.
///
/// Expiry is reported as `QueryTimeout`, which marks the connection broken:
/// the round trip may still be pending on it.
pub(crate) async fn within<T, F>(deadline: Duration, round_trip: F) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    tokio::time::timeout(deadline, round_trip)
        .await
        .map_err(|_| SessionError::QueryTimeout {
            timeout_ms: deadline.as_millis() as u64,
        })?
}

impl SecurityContext {
    pub fn new(rls: RlsConfig) -> Result<Self, SessionError> {
        let store_lookup_sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {} = $1)",
            quote_qualified(&rls.store_table)?,
            quote_qualified(&rls.store_id_column)?
        );
        Ok(Self {
            rls: Arc::new(rls),
            store_lookup_sql: store_lookup_sql.into(),
            deadline: PoolConfig::default().client_deadline(),
        })
    }

    /// Bound every apply, clear and read by `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn rls(&self) -> &RlsConfig {
        &self.rls
    }

    /// Bind `session` to `identity`.
    ///
    /// The setting is session scoped (`set_config(.., false)`), so it
    /// survives across the statements of the request but never leaves the
    /// connection. A store identity must name a store that is visible once
    /// the context is applied; otherwise the context is cleared again and
    /// `InvalidIdentity` is returned.
    pub async fn apply(
        &self,
        session: &mut Session,
        identity: TenantIdentity,
    ) -> Result<(), SessionError> {
        if session.in_transaction {
            return Err(SessionError::TransactionOpen);
        }
        if session.is_poisoned() {
            return Err(SessionError::SessionPoisoned);
        }

        // Fail closed while switching.
        session.applied = None;
        let value = identity.context_value(&self.rls);

        let result = within(
            self.deadline,
            self.set_and_verify(session.connection()?, &value, identity),
        )
        .await;
        match result {
            Ok(true) => {
                session.applied = Some(identity);
                tracing::debug!(
                    session_id = %session.id(),
                    identity = %identity,
                    "Security context applied"
                );
                Ok(())
            }
            Ok(false) => {
                self.clear(session).await?;
                tracing::info!(identity = %identity, "Rejected unknown store identity");
                Err(SessionError::InvalidIdentity(format!(
                    "store {} does not exist",
                    identity.store_id().unwrap_or_default()
                )))
            }
            Err(err) => {
                session.poisoned = true;
                Err(err)
            }
        }
    }

    /// Returns whether the identity resolved to a known store.
    async fn set_and_verify(
        &self,
        conn: &mut PgConnection,
        value: &str,
        identity: TenantIdentity,
    ) -> Result<bool, SessionError> {
        let applied: String = sqlx::query_scalar("SELECT set_config($1, $2, false)")
            .bind(&self.rls.setting_name)
            .bind(value)
            .fetch_one(&mut *conn)
            .await?;
        if applied != value {
            return Err(SessionError::ContextNotApplied {
                expected: value.to_string(),
                applied,
            });
        }

        match identity {
            TenantIdentity::GlobalAdmin => Ok(true),
            TenantIdentity::Store(store_id) => {
                let exists: bool = sqlx::query_scalar(&*self.store_lookup_sql)
                    .bind(store_id)
                    .fetch_one(&mut *conn)
                    .await?;
                Ok(exists)
            }
        }
    }

    /// Reset `session` to the safe default that matches no tenant.
    pub async fn clear(&self, session: &mut Session) -> Result<(), SessionError> {
        session.applied = None;
        let result = within(self.deadline, self.reset_connection(session.connection()?)).await;
        if result.is_err() {
            session.poisoned = true;
        }
        result
    }

    /// Current value of the setting on `session`'s connection.
    pub async fn current_value(&self, session: &mut Session) -> Result<Option<String>, SessionError> {
        let conn = session.connection()?;
        let result = within(self.deadline, async { Ok(self.read_setting(conn).await?) }).await;
        if result.is_err() {
            session.poisoned = true;
        }
        result
    }

    pub(crate) async fn reset_connection(&self, conn: &mut PgConnection) -> Result<(), SessionError> {
        sqlx::query("SELECT set_config($1, $2, false)")
            .bind(&self.rls.setting_name)
            .bind(&self.rls.cleared_value)
            .execute(&mut *conn)
            .await?;

        let current = self.read_setting(conn).await?;
        if !self.is_cleared(current.as_deref()) {
            return Err(SessionError::ContextNotApplied {
                expected: self.rls.cleared_value.clone(),
                applied: current.unwrap_or_default(),
            });
        }
        Ok(())
    }

    pub(crate) async fn read_setting(
        &self,
        conn: &mut PgConnection,
    ) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT current_setting($1, true)")
            .bind(&self.rls.setting_name)
            .fetch_one(conn)
            .await
    }

    pub(crate) fn is_cleared(&self, value: Option<&str>) -> bool {
        value == Some(self.rls.cleared_value.as_str())
    }
}
