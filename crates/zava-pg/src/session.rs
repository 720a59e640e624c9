//! A leased connection plus the identity applied to it.

use std::time::Instant;

use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, Postgres};
use uuid::Uuid;
use zava_core::TenantIdentity;

use crate::error::SessionError;

/// A pooled connection leased for one request.
///
/// A session is created by [`SessionProvider::acquire`](crate::SessionProvider::acquire)
/// and must be handed back through
/// [`SessionProvider::release`](crate::SessionProvider::release). A session
/// dropped without being released closes its connection instead of
/// returning it to the pool.
pub struct Session {
    pub(crate) id: Uuid,
    pub(crate) conn: Option<PoolConnection<Postgres>>,
    pub(crate) applied: Option<TenantIdentity>,
    pub(crate) backend_pid: i32,
    /// The connection is in an unknown state and must be discarded.
    pub(crate) poisoned: bool,
    /// A statement was started and has not completed. Stays set if the
    /// future driving it is dropped.
    pub(crate) in_flight: bool,
    pub(crate) in_transaction: bool,
    pub(crate) acquired_at: Instant,
}

impl Session {
    pub(crate) fn new(conn: PoolConnection<Postgres>, backend_pid: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            conn: Some(conn),
            applied: None,
            backend_pid,
            poisoned: false,
            in_flight: false,
            in_transaction: false,
            acquired_at: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Identity currently applied to the connection, if any.
    pub fn applied_identity(&self) -> Option<TenantIdentity> {
        self.applied
    }

    /// Server process id of the underlying connection.
    pub fn backend_pid(&self) -> i32 {
        self.backend_pid
    }

    /// Whether the connection will be discarded on release.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned || self.in_flight
    }

    pub(crate) fn connection(&mut self) -> Result<&mut PgConnection, SessionError> {
        self.conn.as_deref_mut().ok_or(SessionError::SessionPoisoned)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("applied", &self.applied)
            .field("backend_pid", &self.backend_pid)
            .field("poisoned", &self.poisoned)
            .field("in_flight", &self.in_flight)
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.as_mut() {
            // Never hand a connection with an unknown context back to the pool.
            conn.close_on_drop();
            tracing::warn!(
                session_id = %self.id,
                backend_pid = self.backend_pid,
                held_ms = self.acquired_at.elapsed().as_millis() as u64,
                "Session dropped without release; closing connection"
            );
        }
    }
}
