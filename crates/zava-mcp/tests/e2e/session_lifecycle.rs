//! Session lifecycle tests.
//!
//! Tests the lease / apply / execute / release path including:
//! - Context cleared on release, even after failed statements
//! - Pool exhaustion and fairness with a single connection
//! - Unknown store identities
//! - Statement timeouts and cancellation
//! - Explicit transactions
//! - The row security startup check

use super::common::*;
use std::time::Duration;
use zava_core::{PoolConfig, RlsConfig, TenantIdentity};
use zava_pg::{
    DbErrorClass, QueryExecutor, ReleaseOutcome, SessionError, SqlParam, Statement,
    verify_row_security,
};

// =============================================================================
// RELEASE CLEARS THE CONTEXT
// =============================================================================

pub async fn test_release_clears_context(ctx: &TestContext) {
    println!("  🧪 test_release_clears_context");

    let provider = ctx.single_connection_provider(2_000).await;
    let executor = QueryExecutor::new(&provider);

    let mut session = provider.acquire().await.unwrap();
    let pid = session.backend_pid();
    provider.security_context().apply(&mut session, seattle()).await.unwrap();
    assert_eq!(session.applied_identity(), Some(seattle()));
    let rows = executor
        .execute(&mut session, &seattle(), &Statement::new("SELECT count(*) AS n FROM retail.inventory"))
        .await
        .unwrap();
    assert_eq!(rows[0]["n"], 4);
    assert_eq!(provider.release(session).await, ReleaseOutcome::Returned);

    // Same physical connection, context back at the cleared default
    let mut session = provider.acquire().await.unwrap();
    assert_eq!(session.backend_pid(), pid);
    assert_eq!(session.applied_identity(), None);
    let value = provider.security_context().current_value(&mut session).await.unwrap();
    assert_eq!(value.as_deref(), Some("none"));

    // A leased but unapplied session refuses to run statements
    let err = executor
        .execute(&mut session, &seattle(), &Statement::new("SELECT 1 AS one"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::ContextNotApplied { .. }));
    provider.release(session).await;

    provider.close().await;
    println!("     ✓ Release restores the cleared default on the reused connection");
}

pub async fn test_failed_statement_does_not_leak_context(ctx: &TestContext) {
    println!("  🧪 test_failed_statement_does_not_leak_context");

    let provider = ctx.single_connection_provider(2_000).await;
    let executor = QueryExecutor::new(&provider);

    let err = provider
        .run_scoped(&executor, seattle(), &Statement::new("SELECT 1 / 0 AS boom"))
        .await
        .unwrap_err();
    match &err {
        SessionError::QueryFailed { class, sqlstate, .. } => {
            assert_eq!(*class, DbErrorClass::DataException);
            assert_eq!(sqlstate.as_deref(), Some("22012"));
        }
        other => panic!("expected QueryFailed, got {:?}", other),
    }

    let err = provider
        .run_scoped(&executor, seattle(), &Statement::new("SELECT * FROM retail.no_such_table"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::QueryFailed { class: DbErrorClass::Syntax, .. }));

    // Writes are refused by grants, not by the application
    let err = provider
        .run_scoped(
            &executor,
            seattle(),
            &Statement::new("DELETE FROM retail.inventory WHERE store_id = $1").bind(1),
        )
        .await
        .unwrap_err();
    assert!(err.is_access_denied(), "expected permission denied, got {:?}", err);

    let mut session = provider.acquire().await.unwrap();
    let value = provider.security_context().current_value(&mut session).await.unwrap();
    assert_eq!(value.as_deref(), Some("none"));
    provider.release(session).await;

    // A store 2 request on the reused connection sees only store 2
    let rows = provider
        .run_scoped(&executor, bellevue(), &Statement::new("SELECT DISTINCT store_id FROM retail.inventory"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["store_id"], 2);

    provider.close().await;
    println!("     ✓ Failed statements release a cleared session");
}

// =============================================================================
// POOL LIMITS
// =============================================================================

pub async fn test_pool_exhaustion(ctx: &TestContext) {
    println!("  🧪 test_pool_exhaustion");

    let provider = ctx.single_connection_provider(300).await;
    let held = provider.acquire().await.unwrap();

    let err = provider.acquire().await.unwrap_err();
    match err {
        SessionError::ResourceExhausted { waited_ms } => assert!(waited_ms >= 250, "waited {}ms", waited_ms),
        other => panic!("expected ResourceExhausted, got {:?}", other),
    }
    assert!(SessionError::ResourceExhausted { waited_ms: 0 }.is_retryable());

    provider.release(held).await;
    let session = provider.acquire().await.unwrap();
    provider.release(session).await;

    provider.close().await;
    println!("     ✓ Acquire fails with ResourceExhausted after the timeout");
}

pub async fn test_single_connection_two_tenants(ctx: &TestContext) {
    println!("  🧪 test_single_connection_two_tenants");

    let provider = ctx.single_connection_provider(5_000).await;
    let executor = QueryExecutor::new(&provider);
    let statement = Statement::new("SELECT DISTINCT store_id FROM retail.inventory ORDER BY store_id");

    let both = async {
        tokio::join!(
            provider.run_scoped(&executor, seattle(), &statement),
            provider.run_scoped(&executor, bellevue(), &statement),
        )
    };
    let (first, second) = tokio::time::timeout(Duration::from_secs(10), both)
        .await
        .expect("two tenants sharing one connection must not deadlock");

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0]["store_id"], 1);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0]["store_id"], 2);

    provider.close().await;
    println!("     ✓ Requests for two tenants serialize on one connection");
}

// =============================================================================
// IDENTITY
// =============================================================================

pub async fn test_unknown_store_rejected(ctx: &TestContext) {
    println!("  🧪 test_unknown_store_rejected");

    let provider = ctx.single_connection_provider(2_000).await;
    let mut session = provider.acquire().await.unwrap();

    let err = provider
        .security_context()
        .apply(&mut session, TenantIdentity::Store(99))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidIdentity(_)));
    assert_eq!(session.applied_identity(), None);
    let value = provider.security_context().current_value(&mut session).await.unwrap();
    assert_eq!(value.as_deref(), Some("none"));

    // The session is still good for a valid identity
    provider.security_context().apply(&mut session, bellevue()).await.unwrap();
    assert_eq!(provider.release(session).await, ReleaseOutcome::Returned);

    provider.close().await;
    println!("     ✓ Unknown store ids fail with InvalidIdentity");
}

pub async fn test_context_mismatch_refused(ctx: &TestContext) {
    println!("  🧪 test_context_mismatch_refused");

    let provider = ctx.provider().await;
    let executor = QueryExecutor::new(&provider);
    let mut session = provider.acquire().await.unwrap();
    provider.security_context().apply(&mut session, seattle()).await.unwrap();

    let err = executor
        .execute(&mut session, &bellevue(), &Statement::new("SELECT 1 AS one"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::ContextNotApplied { .. }));

    // Re-applying switches the tenant for the next statement
    provider.security_context().apply(&mut session, bellevue()).await.unwrap();
    let rows = executor
        .execute(&mut session, &bellevue(), &Statement::new("SELECT store_name FROM retail.stores"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["store_name"], "Zava Bellevue");
    provider.release(session).await;

    provider.close().await;
    println!("     ✓ Statements for a different caller are refused");
}

// =============================================================================
// TIMEOUTS AND TRANSACTIONS
// =============================================================================

pub async fn test_statement_timeout_cancels(ctx: &TestContext) {
    println!("  🧪 test_statement_timeout_cancels");

    let provider = ctx
        .provider_with(PoolConfig {
            max_connections: 1,
            statement_timeout_ms: 300,
            cancel_grace_ms: 300,
            acquire_timeout_ms: 5_000,
            ..Default::default()
        })
        .await;
    let executor = QueryExecutor::new(&provider);

    let err = provider
        .run_scoped(&executor, seattle(), &Statement::new("SELECT 1 AS one FROM pg_sleep(5)"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::QueryTimeout { timeout_ms: 300 }), "got {:?}", err);

    // The pool recovers and the next request is unaffected
    let rows = provider
        .run_scoped(&executor, bellevue(), &Statement::new("SELECT count(*) AS n FROM retail.inventory"))
        .await
        .unwrap();
    assert_eq!(rows[0]["n"], 3);

    provider.close().await;
    println!("     ✓ Slow statements fail with QueryTimeout and are cancelled");
}

/// Backend pid running `pattern`, as seen by the admin connection.
async fn active_backend(ctx: &TestContext, pattern: &str) -> Option<i32> {
    sqlx::query_scalar::<_, i32>(
        "SELECT pid FROM pg_stat_activity \
         WHERE state = 'active' AND query LIKE $1 AND pid <> pg_backend_pid() \
         LIMIT 1",
    )
    .bind(pattern)
    .fetch_optional(&ctx.admin)
    .await
    .unwrap()
}

pub async fn test_dropped_request_cancels_backend(ctx: &TestContext) {
    println!("  🧪 test_dropped_request_cancels_backend");

    let provider = ctx.single_connection_provider(5_000).await;
    let executor = QueryExecutor::new(&provider);

    let request = {
        let provider = provider.clone();
        let executor = executor.clone();
        tokio::spawn(async move {
            provider
                .run_scoped(&executor, seattle(), &Statement::new("SELECT 1 AS one FROM pg_sleep(30)"))
                .await
        })
    };

    let mut sleeping = None;
    for _ in 0..50 {
        sleeping = active_backend(ctx, "%pg_sleep(30)%").await;
        if sleeping.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let pid = sleeping.expect("statement never reached the database");

    // Client goes away mid-statement
    request.abort();
    assert!(request.await.unwrap_err().is_cancelled());

    let mut gone = false;
    for _ in 0..50 {
        let still_running: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM pg_stat_activity WHERE pid = $1 AND state = 'active'",
        )
        .bind(pid)
        .fetch_one(&ctx.admin)
        .await
        .unwrap();
        if still_running == 0 {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(gone, "backend {pid} still running the abandoned statement");

    // The abandoned connection is never leased again
    let session = provider.acquire().await.unwrap();
    assert_ne!(session.backend_pid(), pid);
    assert_eq!(session.applied_identity(), None);
    assert_eq!(provider.release(session).await, ReleaseOutcome::Returned);

    provider.close().await;
    println!("     ✓ Dropping a request cancels its statement and retires the connection");
}

pub async fn test_explicit_transaction(ctx: &TestContext) {
    println!("  🧪 test_explicit_transaction");

    let provider = ctx.provider().await;
    let executor = QueryExecutor::new(&provider);
    let mut session = provider.acquire().await.unwrap();
    provider.security_context().apply(&mut session, seattle()).await.unwrap();

    let results = executor
        .execute_in_transaction(
            &mut session,
            &seattle(),
            &[
                Statement::new("SELECT count(*) AS n FROM retail.orders"),
                Statement::new("SELECT COALESCE(SUM(total_amount), 0)::float8 AS revenue FROM retail.order_items WHERE store_id = $1")
                    .bind(SqlParam::Int(1)),
            ],
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0][0]["n"], 2);
    assert_eq!(results[1][0]["revenue"], 107.96);

    // A failing statement rolls the whole transaction back
    let err = executor
        .execute_in_transaction(
            &mut session,
            &seattle(),
            &[Statement::new("SELECT 1 AS one"), Statement::new("SELECT 1 / 0 AS boom")],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::QueryFailed { .. }));
    assert_eq!(provider.release(session).await, ReleaseOutcome::Returned);

    provider.close().await;
    println!("     ✓ Explicit transactions commit and roll back as a unit");
}

// =============================================================================
// ROW SECURITY CHECK
// =============================================================================

pub async fn test_row_security_check(ctx: &TestContext) {
    println!("  🧪 test_row_security_check");

    let provider = ctx.provider().await;
    let report = verify_row_security(&provider, &RlsConfig::default()).await.unwrap();
    assert_eq!(report.role, APP_ROLE);
    assert!(!report.superuser);
    assert!(report.is_enforced(), "findings: {:?}", report.findings);
    assert_eq!(report.tables.len(), 5);

    // A table without policies is reported
    let rls = RlsConfig {
        protected_tables: vec!["retail.products".to_string()],
        ..Default::default()
    };
    let report = verify_row_security(&provider, &rls).await.unwrap();
    assert!(!report.is_enforced());
    let err = report.require(true).unwrap_err();
    assert!(matches!(err, SessionError::RowSecurityNotEnforced(_)));
    provider.close().await;

    // The superuser bypasses every policy
    let upstream = zava_core::UpstreamConfig {
        database_url: Some(admin_database_url()),
        ..Default::default()
    };
    let admin = zava_pg::SessionProvider::connect(&upstream, &PoolConfig::default(), &RlsConfig::default())
        .await
        .unwrap();
    let report = verify_row_security(&admin, &RlsConfig::default()).await.unwrap();
    assert!(report.superuser);
    assert!(!report.is_enforced());
    assert!(report.require(false).is_ok());
    admin.close().await;

    println!("     ✓ Row security gaps are detected");
}

pub async fn run_all_tests(ctx: &TestContext) {
    println!("\n📦 Session Lifecycle Tests");
    test_release_clears_context(ctx).await;
    test_failed_statement_does_not_leak_context(ctx).await;
    test_pool_exhaustion(ctx).await;
    test_single_connection_two_tenants(ctx).await;
    test_unknown_store_rejected(ctx).await;
    test_context_mismatch_refused(ctx).await;
    test_statement_timeout_cancels(ctx).await;
    test_dropped_request_cancels_backend(ctx).await;
    test_explicit_transaction(ctx).await;
    test_row_security_check(ctx).await;
}
