//! Deadlines, cancellation, store failures and concurrent use

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{engine, engine_with, fast_config, request, seeded_source};
use tenant_authz::engine::{DegradedCause, MemoryAuditEmitter};
use tenant_authz::{
    AuthzError, CallContext, DecisionReason, HealthStatus, PolicyEngine, Subject, VersionScope,
};
use tokio_util::sync::CancellationToken;

// ============================================================================
// DEADLINES AND CANCELLATION
// ============================================================================

#[tokio::test]
async fn test_deadline_yields_degraded_deny() {
    let source = seeded_source();
    source.set_latency(Duration::from_millis(300));
    let (engine, audit) = engine(source);
    let req = request(Subject::new("alice").with_role("viewer"), "document", "1", "read");

    let decision = engine
        .check_access_with(&req, CallContext::with_timeout(Duration::from_millis(20)))
        .await
        .unwrap();

    assert!(!decision.allowed);
    assert!(decision.degraded);
    assert_eq!(
        decision.reason,
        DecisionReason::Degraded {
            cause: DegradedCause::DeadlineExceeded
        }
    );

    // Degraded decisions are audited but never cached
    assert_eq!(engine.cache_stats().size, 0);
    let records = audit.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].degraded);
    assert_eq!(records[0].action, "authz.check.degraded:read");
    assert_eq!(engine.metrics().degraded_decisions, 1);
}

#[tokio::test]
async fn test_default_deadline_from_config() {
    let source = seeded_source();
    source.set_latency(Duration::from_millis(300));
    let mut config = fast_config();
    config.default_deadline_ms = Some(20);
    let (engine, _) = engine_with(source, config);

    let decision = engine
        .check_access(&request(Subject::new("alice").with_role("viewer"), "document", "1", "read"))
        .await
        .unwrap();
    assert!(decision.degraded);
}

#[tokio::test]
async fn test_cancelled_call_denies() {
    let (engine, _) = engine(seeded_source());
    let token = CancellationToken::new();
    token.cancel();

    let decision = engine
        .check_access_with(
            &request(Subject::new("alice").with_role("editor"), "document", "1", "edit"),
            CallContext::default().with_cancel(token),
        )
        .await
        .unwrap();

    assert!(!decision.allowed);
    assert_eq!(
        decision.reason,
        DecisionReason::Degraded {
            cause: DegradedCause::Cancelled
        }
    );
}

#[tokio::test]
async fn test_shutdown_denies_later_checks() {
    let (engine, _) = engine(seeded_source());
    let req = request(Subject::new("alice").with_role("editor"), "document", "1", "edit");
    assert!(engine.check_access(&req).await.unwrap().allowed);

    engine.shutdown();
    assert!(engine.is_shut_down());
    assert_eq!(engine.cache_stats().size, 0);

    let decision = engine.check_access(&req).await.unwrap();
    assert!(!decision.allowed);
    assert!(decision.degraded);
}

// ============================================================================
// STORE FAILURES
// ============================================================================

#[tokio::test]
async fn test_unavailable_store_is_surfaced() {
    let source = seeded_source();
    source.set_unavailable(true);
    let (engine, audit) = engine(source.clone());

    let result = engine
        .check_access(&request(Subject::new("alice").with_role("viewer"), "document", "1", "read"))
        .await;

    assert!(matches!(result, Err(AuthzError::StoreUnavailable(_))));
    assert_eq!(source.load_count(), 3);
    assert!(audit.is_empty());

    let health = engine.health();
    assert_eq!(health.status, HealthStatus::Degraded);
    assert!(health.last_error.is_some());
    assert_eq!(engine.metrics().store_errors, 1);
}

#[tokio::test]
async fn test_transient_failures_retried() {
    let source = seeded_source();
    source.fail_next(2);
    let (engine, _) = engine(source.clone());

    let decision = engine
        .check_access(&request(Subject::new("alice").with_role("viewer"), "document", "1", "read"))
        .await
        .unwrap();

    assert!(decision.allowed);
    assert_eq!(source.load_count(), 3);
    assert_eq!(engine.health().status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_stale_snapshot_served_when_reload_fails() {
    let source = seeded_source();
    let mut config = fast_config();
    config.cache.enabled = false;
    config.refresh.interval_secs = 1;
    let (engine, _) = engine_with(source.clone(), config);
    let req = request(Subject::new("alice").with_role("viewer"), "document", "1", "read");

    assert!(engine.check_access(&req).await.unwrap().allowed);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    source.set_unavailable(true);

    let decision = engine.check_access(&req).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(engine.health().status, HealthStatus::Degraded);
}

#[tokio::test]
async fn test_version_bump_with_failed_reload_is_unavailable() {
    let source = seeded_source();
    let (engine, _) = engine(source.clone());
    let req = request(Subject::new("alice").with_role("viewer"), "document", "1", "read");

    engine.check_access(&req).await.unwrap();

    source.set_unavailable(true);
    engine.on_scope_mutation(VersionScope::Global);

    let result = engine.check_access(&req).await;
    assert!(matches!(result, Err(AuthzError::StoreUnavailable(_))));

    source.set_unavailable(false);
    assert!(engine.check_access(&req).await.unwrap().allowed);
}

// ============================================================================
// CONCURRENT USE
// ============================================================================

#[tokio::test]
async fn test_batch_preserves_order() {
    let (engine, _) = engine(seeded_source());
    let viewer = Subject::new("alice").with_role("viewer");

    let requests = vec![
        request(viewer.clone(), "document", "1", "read"),
        request(viewer.clone(), "document", "1", "edit"),
        request(viewer.clone(), "document", "2", "read"),
        request(viewer, "document", "", "read"),
    ];

    let results = engine.check_batch_access(&requests).await;
    let allowed: Vec<bool> = results.into_iter().map(|r| r.unwrap().allowed).collect();
    assert_eq!(allowed, vec![true, false, true, false]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checks_share_one_load() {
    let source = seeded_source();
    source.set_latency(Duration::from_millis(50));
    let audit = Arc::new(MemoryAuditEmitter::new());
    let engine = Arc::new(PolicyEngine::new(fast_config(), source.clone(), audit.clone()).unwrap());

    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let role = if i % 2 == 0 { "editor" } else { "viewer" };
            let req = request(Subject::new(format!("user-{}", i)).with_role(role), "document", "1", "edit");
            engine.check_access(&req).await.unwrap().allowed == (i % 2 == 0)
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap());
    }
    assert_eq!(source.load_count(), 1);
    assert_eq!(audit.len(), 32);
}

#[tokio::test]
async fn test_refresh_task_reloads_until_cancelled() {
    let source = seeded_source();
    let mut config = fast_config();
    config.refresh.interval_secs = 1;
    let audit = Arc::new(MemoryAuditEmitter::new());
    let engine = Arc::new(PolicyEngine::new(config, source.clone(), audit).unwrap());

    engine
        .check_access(&request(Subject::new("alice").with_role("viewer"), "document", "1", "read"))
        .await
        .unwrap();
    assert_eq!(source.load_count(), 1);

    let cancel = CancellationToken::new();
    let handle = engine.spawn_refresh_task(cancel.clone());

    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert!(source.load_count() >= 2);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("refresh task stops")
        .unwrap();
}
