//! Startup check that row security actually protects the tenant tables.
//!
//! Setting a session variable only isolates tenants if the tables carry
//! policies that read it and the connecting role cannot bypass them. This
//! check reads the catalog and reports every gap instead of silently
//! running unprotected.

use serde::Serialize;
use zava_core::RlsConfig;

use crate::error::SessionError;
use crate::provider::SessionProvider;
use crate::split_qualified;

/// Catalog facts for one protected table.
#[derive(Debug, Clone, Serialize)]
pub struct TableSecurity {
    pub table: String,
    pub exists: bool,
    pub row_security: bool,
    pub forced: bool,
    pub owned_by_role: bool,
    pub policies: i64,
}

/// Result of [`verify_row_security`].
#[derive(Debug, Clone, Serialize)]
pub struct RowSecurityReport {
    pub role: String,
    pub superuser: bool,
    pub bypass_rls: bool,
    pub tables: Vec<TableSecurity>,
    pub findings: Vec<String>,
}

impl RowSecurityReport {
    pub fn is_enforced(&self) -> bool {
        self.findings.is_empty()
    }

    /// Turn findings into an error when enforcement is required; otherwise
    /// log each one.
    pub fn require(self, required: bool) -> Result<Self, SessionError> {
        if self.is_enforced() {
            return Ok(self);
        }
        if required {
            return Err(SessionError::RowSecurityNotEnforced(self.findings));
        }
        for finding in &self.findings {
            tracing::warn!(finding = %finding, "Row level security gap (require_row_security is off)");
        }
        Ok(self)
    }

    fn evaluate(mut self) -> Self {
        let mut findings = Vec::new();
        if self.superuser {
            findings.push(format!("role '{}' is a superuser and bypasses all policies", self.role));
        }
        if self.bypass_rls {
            findings.push(format!("role '{}' has BYPASSRLS", self.role));
        }
        for table in &self.tables {
            if !table.exists {
                findings.push(format!("table {} does not exist", table.table));
                continue;
            }
            if !table.row_security {
                findings.push(format!("table {} does not have row level security enabled", table.table));
            }
            if table.policies == 0 {
                findings.push(format!("table {} has no policies", table.table));
            }
            if table.owned_by_role && !table.forced {
                findings.push(format!(
                    "table {} is owned by '{}' without FORCE ROW LEVEL SECURITY",
                    table.table, self.role
                ));
            }
        }
        self.findings = findings;
        self
    }
}

const ROLE_SQL: &str =
    "SELECT current_user::text, rolsuper, rolbypassrls FROM pg_roles WHERE rolname = current_user";

const TABLE_SQL: &str = r#"
SELECT c.relrowsecurity,
       c.relforcerowsecurity,
       pg_get_userbyid(c.relowner) = current_user AS owned,
       (SELECT count(*) FROM pg_policies p
         WHERE p.schemaname = n.nspname AND p.tablename = c.relname) AS policies
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = COALESCE($1, current_schema())
  AND c.relname = $2
  AND c.relkind IN ('r', 'p')
"#;

/// Inspect the catalog for the role and every `rls.protected_tables` entry.
pub async fn verify_row_security(
    provider: &SessionProvider,
    rls: &RlsConfig,
) -> Result<RowSecurityReport, SessionError> {
    let mut session = provider.acquire().await?;
    let result = inspect(&mut session, rls).await;
    provider.release(session).await;
    result.map(RowSecurityReport::evaluate)
}

async fn inspect(
    session: &mut crate::Session,
    rls: &RlsConfig,
) -> Result<RowSecurityReport, SessionError> {
    let conn = session.connection()?;
    let (role, superuser, bypass_rls): (String, bool, bool) =
        sqlx::query_as(ROLE_SQL).fetch_one(&mut *conn).await?;

    let mut tables = Vec::with_capacity(rls.protected_tables.len());
    for name in &rls.protected_tables {
        let (schema, table) = split_qualified(name)?;
        let row: Option<(bool, bool, bool, i64)> = sqlx::query_as(TABLE_SQL)
            .bind(schema)
            .bind(table)
            .fetch_optional(&mut *conn)
            .await?;
        tables.push(match row {
            Some((row_security, forced, owned_by_role, policies)) => TableSecurity {
                table: name.clone(),
                exists: true,
                row_security,
                forced,
                owned_by_role,
                policies,
            },
            None => TableSecurity {
                table: name.clone(),
                exists: false,
                row_security: false,
                forced: false,
                owned_by_role: false,
                policies: 0,
            },
        });
    }

    Ok(RowSecurityReport {
        role,
        superuser,
        bypass_rls,
        tables,
        findings: Vec::new(),
    })
}
