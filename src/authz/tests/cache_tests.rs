//! Decision cache behaviour through the engine

mod common;

use std::time::Duration;

use common::{engine, engine_with, fast_config, request, seeded_source};
use tenant_authz::{CheckOptions, PolicyEffect, PolicyRecord, ScopeFilter, Subject, VersionScope};

#[tokio::test]
async fn test_second_check_is_cache_hit() {
    let (engine, _) = engine(seeded_source());
    let req = request(Subject::new("alice").with_role("viewer"), "document", "1", "read");

    let first = engine.check_access(&req).await.unwrap();
    assert!(!first.cache_hit);

    let second = engine.check_access(&req).await.unwrap();
    assert!(second.cache_hit);
    assert_eq!(first.allowed, second.allowed);
    assert_eq!(first.decision_id, second.decision_id);

    let stats = engine.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.size, 1);
    assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);

    let metrics = engine.metrics();
    assert_eq!(metrics.total_requests, 2);
    assert_eq!(metrics.cache_hits, 1);
}

#[tokio::test]
async fn test_role_order_shares_cache_entry() {
    let (engine, _) = engine(seeded_source());

    let a = Subject::new("alice").with_role("viewer").with_role("editor");
    let b = Subject::new("alice").with_role("editor").with_role("viewer");

    engine.check_access(&request(a, "document", "1", "edit")).await.unwrap();
    let second = engine
        .check_access(&request(b, "document", "1", "edit"))
        .await
        .unwrap();
    assert!(second.cache_hit);
}

#[tokio::test]
async fn test_scope_mutation_forces_recompute() {
    let source = seeded_source();
    let (engine, _) = engine(source.clone());
    let req = request(Subject::new("alice").with_role("editor"), "document", "1", "edit");

    assert!(engine.check_access(&req).await.unwrap().allowed);

    source.add_policy(PolicyRecord::new("freeze", "freeze edits", PolicyEffect::Deny).with_actions(["edit"]));

    // Without a version bump the cached allow is still served
    let stale = engine.check_access(&req).await.unwrap();
    assert!(stale.cache_hit);
    assert!(stale.allowed);

    engine.on_scope_mutation(VersionScope::Global);

    let fresh = engine.check_access(&req).await.unwrap();
    assert!(!fresh.cache_hit);
    assert!(!fresh.allowed);
    assert_eq!(fresh.matched_policy_ids, vec!["freeze"]);
}

#[tokio::test]
async fn test_org_mutation_leaves_other_orgs_cached() {
    let (engine, _) = engine(seeded_source());
    let acme = request(Subject::new("a").with_role("viewer").in_org("acme"), "document", "1", "read");
    let globex = request(Subject::new("g").with_role("viewer").in_org("globex"), "document", "1", "read");

    engine.check_access(&acme).await.unwrap();
    engine.check_access(&globex).await.unwrap();

    engine.on_scope_mutation(VersionScope::Org("acme".into()));

    assert!(!engine.check_access(&acme).await.unwrap().cache_hit);
    assert!(engine.check_access(&globex).await.unwrap().cache_hit);
}

#[tokio::test]
async fn test_clear_cache_filters() {
    let (engine, _) = engine(seeded_source());

    for (subject, org, client) in [
        ("a", "acme", "pms"),
        ("b", "acme", "crm"),
        ("c", "globex", "pms"),
    ] {
        let s = Subject::new(subject).with_role("viewer").in_org(org).for_client(client);
        engine.check_access(&request(s, "document", "1", "read")).await.unwrap();
    }
    assert_eq!(engine.cache_stats().size, 3);

    assert_eq!(engine.clear_cache(Some(&ScopeFilter::subject("c"))), 1);
    assert_eq!(engine.clear_cache(Some(&ScopeFilter::client("crm"))), 1);
    assert_eq!(engine.clear_cache(Some(&ScopeFilter::org("globex"))), 0);
    assert_eq!(engine.cache_stats().size, 1);

    assert_eq!(engine.clear_cache(None), 1);
    assert_eq!(engine.cache_stats().size, 0);
}

#[tokio::test]
async fn test_expired_entries_recomputed() {
    let mut config = fast_config();
    config.cache.ttl_secs = 1;
    let (engine, _) = engine_with(seeded_source(), config);
    let req = request(Subject::new("alice").with_role("viewer"), "document", "1", "read");

    engine.check_access(&req).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let decision = engine.check_access(&req).await.unwrap();
    assert!(!decision.cache_hit);
    assert_eq!(engine.cache_stats().expirations, 1);
}

#[tokio::test]
async fn test_disabled_cache_never_hits() {
    let mut config = fast_config();
    config.cache.enabled = false;
    let (engine, audit) = engine_with(seeded_source(), config);
    let req = request(Subject::new("alice").with_role("viewer"), "document", "1", "read");

    engine.check_access(&req).await.unwrap();
    let second = engine.check_access(&req).await.unwrap();

    assert!(!second.cache_hit);
    assert_eq!(engine.cache_stats().size, 0);
    assert_eq!(audit.len(), 2);
}

#[tokio::test]
async fn test_environment_is_part_of_the_key() {
    let (engine, _) = engine(seeded_source());
    let subject = Subject::new("alice").with_role("viewer");

    let office = request(subject.clone(), "document", "1", "read")
        .with_environment(tenant_authz::Environment::default().with_ip("10.0.0.1"));
    let home = request(subject, "document", "1", "read")
        .with_environment(tenant_authz::Environment::default().with_ip("192.168.1.5"));

    engine.check_access(&office).await.unwrap();
    assert!(!engine.check_access(&home).await.unwrap().cache_hit);
    assert!(engine.check_access(&office).await.unwrap().cache_hit);
}

#[tokio::test]
async fn test_options_are_part_of_the_key() {
    let (engine, _) = engine(seeded_source());
    let req = request(Subject::new("alice").with_role("viewer"), "document", "1", "read");

    assert!(engine.check_access(&req).await.unwrap().allowed);

    let without_roles = engine
        .check_access(&req.clone().with_options(CheckOptions::default().skip_rbac()))
        .await
        .unwrap();
    assert!(!without_roles.cache_hit);
    assert!(!without_roles.allowed);

    assert!(engine.check_access(&req).await.unwrap().cache_hit);
}
