//! Session provider: the process-wide bounded connection pool.
//!
//! The pool is created once at startup and closed at shutdown. Every
//! connection it opens starts with the cleared security context and the
//! configured `statement_timeout`, and is checked for the cleared context
//! again each time it is leased.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use zava_core::{PoolConfig, RlsConfig, TenantIdentity, UpstreamConfig};

use crate::context::{SecurityContext, within};
use crate::error::SessionError;
use crate::executor::{JsonRow, QueryExecutor, Statement};
use crate::session::Session;

/// What happened to a session's connection on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Context cleared and verified; the connection went back to the pool.
    Returned,
    /// The connection was closed.
    Discarded,
}

/// Snapshot of pool usage.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStatus {
    pub max_connections: u32,
    pub open: u32,
    pub idle: usize,
}

/// Leases RLS-ready sessions from a bounded pool.
#[derive(Clone)]
pub struct SessionProvider {
    pool: PgPool,
    context: SecurityContext,
    config: Arc<PoolConfig>,
}

impl SessionProvider {
    /// Create the pool and open the first connection, failing fast if the
    /// database is unreachable.
    pub async fn connect(
        upstream: &UpstreamConfig,
        pool: &PoolConfig,
        rls: &RlsConfig,
    ) -> Result<Self, SessionError> {
        let options = connect_options(upstream)?;
        let provider = Self::build(options, pool, rls, false).await?;
        tracing::info!(
            target = %upstream.display_target(),
            max_connections = pool.max_connections,
            "Session pool connected"
        );
        Ok(provider)
    }

    /// Create the pool without opening any connection.
    pub async fn connect_lazy(
        upstream: &UpstreamConfig,
        pool: &PoolConfig,
        rls: &RlsConfig,
    ) -> Result<Self, SessionError> {
        let options = connect_options(upstream)?;
        Self::build(options, pool, rls, true).await
    }

    async fn build(
        options: PgConnectOptions,
        pool_config: &PoolConfig,
        rls: &RlsConfig,
        lazy: bool,
    ) -> Result<Self, SessionError> {
        let context = SecurityContext::new(rls.clone())?.with_deadline(pool_config.client_deadline());
        let statement_timeout = pool_config.statement_timeout_ms.to_string();

        let on_connect = context.clone();
        let on_acquire = context.clone();
        let pool_options = PgPoolOptions::new()
            .max_connections(pool_config.max_connections)
            .min_connections(pool_config.min_connections)
            .acquire_timeout(Duration::from_millis(pool_config.acquire_timeout_ms))
            .idle_timeout(Some(Duration::from_secs(pool_config.idle_timeout_secs)))
            .test_before_acquire(false)
            .after_connect(move |conn, _meta| {
                let context = on_connect.clone();
                let statement_timeout = statement_timeout.clone();
                Box::pin(async move {
                    sqlx::query("SELECT set_config('statement_timeout', $1, false)")
                        .bind(&statement_timeout)
                        .execute(&mut *conn)
                        .await?;
                    context
                        .reset_connection(conn)
                        .await
                        .map_err(|e| sqlx::Error::Protocol(e.to_string()))?;
                    Ok(())
                })
            })
            .before_acquire(move |conn, _meta| {
                let context = on_acquire.clone();
                Box::pin(async move {
                    let value = context.read_setting(conn).await?;
                    let clean = context.is_cleared(value.as_deref());
                    if !clean {
                        tracing::warn!(
                            value = value.as_deref().unwrap_or("<unset>"),
                            "Pooled connection carried a security context; discarding it"
                        );
                    }
                    Ok(clean)
                })
            });

        let pool = if lazy {
            pool_options.connect_lazy_with(options)
        } else {
            pool_options
                .connect_with(options)
                .await
                .map_err(|e| SessionError::Connect(e.to_string()))?
        };

        Ok(Self {
            pool,
            context,
            config: Arc::new(pool_config.clone()),
        })
    }

    /// Lease a session, waiting at most the configured acquire timeout.
    pub async fn acquire(&self) -> Result<Session, SessionError> {
        let started = Instant::now();
        let mut conn = self.pool.acquire().await.map_err(|err| match err {
            sqlx::Error::PoolTimedOut => SessionError::ResourceExhausted {
                waited_ms: started.elapsed().as_millis() as u64,
            },
            sqlx::Error::PoolClosed => SessionError::Connect("session pool is closed".to_string()),
            other => SessionError::Connect(other.to_string()),
        })?;

        let deadline = self.config.client_deadline();
        let backend_pid = within(deadline, async {
            let pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
                .fetch_one(&mut *conn)
                .await?;
            Ok(pid)
        })
        .await;
        let backend_pid = match backend_pid {
            Ok(pid) => pid,
            Err(err) => {
                conn.close_on_drop();
                return Err(err);
            }
        };

        let session = Session::new(conn, backend_pid);
        tracing::debug!(
            session_id = %session.id(),
            backend_pid,
            waited_ms = started.elapsed().as_millis() as u64,
            "Session acquired"
        );
        Ok(session)
    }

    /// Give a session back. The connection returns to the pool only after
    /// its security context has been cleared and read back; otherwise it is
    /// closed.
    pub async fn release(&self, mut session: Session) -> ReleaseOutcome {
        let cleared = if session.is_poisoned() || session.in_transaction {
            Err(SessionError::SessionPoisoned)
        } else {
            self.context.clear(&mut session).await
        };

        let Some(mut conn) = session.conn.take() else {
            return ReleaseOutcome::Discarded;
        };
        let held_ms = session.acquired_at.elapsed().as_millis() as u64;

        match cleared {
            Ok(()) => {
                drop(conn);
                tracing::debug!(session_id = %session.id(), held_ms, "Session released");
                ReleaseOutcome::Returned
            }
            Err(err) => {
                conn.close_on_drop();
                drop(conn);
                tracing::warn!(
                    session_id = %session.id(),
                    backend_pid = session.backend_pid(),
                    held_ms,
                    error = %err,
                    "Session discarded on release"
                );
                ReleaseOutcome::Discarded
            }
        }
    }

    /// Run one statement for `identity` on a freshly leased session.
    ///
    /// The session is released on every path, including errors from
    /// `apply`, which leave nothing to execute.
    pub async fn run_scoped(
        &self,
        executor: &QueryExecutor,
        identity: TenantIdentity,
        statement: &Statement,
    ) -> Result<Vec<JsonRow>, SessionError> {
        let mut session = self.acquire().await?;
        let result = async {
            self.context.apply(&mut session, identity).await?;
            executor.execute(&mut session, &identity, statement).await
        }
        .await;
        self.release(session).await;
        result
    }

    /// The security-context setter bound to this pool's settings.
    pub fn security_context(&self) -> &SecurityContext {
        &self.context
    }

    pub fn rls(&self) -> &RlsConfig {
        self.context.rls()
    }

    pub fn pool_config(&self) -> &PoolConfig {
        &self.config
    }

    pub(crate) fn connect_options(&self) -> Arc<PgConnectOptions> {
        self.pool.connect_options()
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            max_connections: self.config.max_connections,
            open: self.pool.size(),
            idle: self.pool.num_idle(),
        }
    }

    /// Close the pool, waiting for leased sessions to come back.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Session pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

fn connect_options(upstream: &UpstreamConfig) -> Result<PgConnectOptions, SessionError> {
    let invalid = |e: sqlx::Error| SessionError::Connect(format!("invalid connection settings: {e}"));

    let options = match upstream.database_url() {
        Some(url) => url.parse::<PgConnectOptions>().map_err(invalid)?,
        None => {
            let ssl_mode = upstream.ssl_mode.as_str().parse::<PgSslMode>().map_err(invalid)?;
            let options = PgConnectOptions::new()
                .host(&upstream.host)
                .port(upstream.port)
                .username(&upstream.username)
                .database(&upstream.database)
                .ssl_mode(ssl_mode);
            match upstream.password() {
                Some(password) => options.password(&password),
                None => options,
            }
        }
    };
    Ok(options.application_name("zava"))
}
