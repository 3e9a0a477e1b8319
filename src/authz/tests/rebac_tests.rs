//! Relationship-based access through the graph and the engine

mod common;

use std::sync::Arc;

use common::{engine, engine_with, fast_config, request, seeded_source};
use tenant_authz::config::GraphConfig;
use tenant_authz::engine::{Model, Vote};
use tenant_authz::graph::{RelationRule, RelationRules};
use tenant_authz::{
    DecisionReason, Direction, EntityRef, InMemoryDataSource, PolicyEffect, PolicyRecord,
    Relationship, ScopeKey, Subject,
};

/// alice -member_of-> g1 -> g2 -> g3 -> g4 -owner-> document:plan
fn group_chain(source: &InMemoryDataSource) {
    let alice = EntityRef::user("alice");
    let groups: Vec<EntityRef> = (1..=4).map(|i| EntityRef::group(format!("g{}", i))).collect();

    source.add_relationship(Relationship::new("e0", &alice, "member_of", &groups[0]));
    for (i, pair) in groups.windows(2).enumerate() {
        source.add_relationship(Relationship::new(format!("e{}", i + 1), &pair[0], "member_of", &pair[1]));
    }
    source.add_relationship(Relationship::new(
        "e-owner",
        &groups[3],
        "owner",
        &EntityRef::resource("document", "plan"),
    ));
}

#[tokio::test]
async fn test_graph_depth_bound() {
    let source = Arc::new(InMemoryDataSource::new());
    group_chain(&source);
    let (engine, _) = engine(source);

    let snapshot = engine.snapshot(&ScopeKey::global()).await.unwrap();
    let alice = EntityRef::user("alice");
    let plan = EntityRef::resource("document", "plan");

    let deep = snapshot.graph.check_transitive_access(&alice, "owner", &plan, 5, None);
    assert!(deep.found);
    assert_eq!(deep.path.len(), 5);
    assert_eq!(deep.path[0].from, alice);
    assert_eq!(deep.path[4].relation, "owner");

    let shallow = snapshot.graph.check_transitive_access(&alice, "owner", &plan, 4, None);
    assert!(!shallow.found);
    assert!(shallow.depth_exceeded);
}

#[tokio::test]
async fn test_engine_grants_through_owner_chain() {
    let source = Arc::new(InMemoryDataSource::new());
    group_chain(&source);
    let (engine, _) = engine(source);

    let decision = engine
        .check_access(&request(Subject::new("alice"), "document", "plan", "read"))
        .await
        .unwrap();

    assert!(decision.allowed);
    assert_eq!(
        decision.reason,
        DecisionReason::RelationshipGrant {
            relation: "owner".into(),
            hops: 5
        }
    );
    assert_eq!(decision.vote_of(Model::Rebac), Some(Vote::Allow));

    let stranger = engine
        .check_access(&request(Subject::new("mallory"), "document", "plan", "read"))
        .await
        .unwrap();
    assert!(!stranger.allowed);
}

#[tokio::test]
async fn test_engine_respects_configured_depth() {
    let source = Arc::new(InMemoryDataSource::new());
    group_chain(&source);

    let mut config = fast_config();
    config.graph.max_depth = 3;
    let (engine, _) = engine_with(source, config);

    let decision = engine
        .check_access(&request(Subject::new("alice"), "document", "plan", "read"))
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason, DecisionReason::NoGrant);
}

#[tokio::test]
async fn test_custom_rule_and_skip_without_rule() {
    let source = seeded_source();
    source.add_relationship(Relationship::new(
        "r1",
        &EntityRef::user("bob"),
        "editor",
        &EntityRef::resource("document", "d1"),
    ));

    let mut config = fast_config();
    config.graph = GraphConfig {
        rules: RelationRules::none().with_rule(RelationRule::new("document", "edit", ["editor"])),
        ..GraphConfig::default()
    };
    let (engine, _) = engine_with(source, config);

    let edit = engine
        .check_access(&request(Subject::new("bob"), "document", "d1", "edit"))
        .await
        .unwrap();
    assert!(edit.allowed);

    // No rule for "read" in this table
    let read = engine
        .check_access(&request(Subject::new("bob"), "document", "d1", "read"))
        .await
        .unwrap();
    assert!(!read.allowed);
    assert_eq!(read.vote_of(Model::Rebac), Some(Vote::Skipped));
}

#[tokio::test]
async fn test_policy_deny_beats_relationship() {
    let source = Arc::new(InMemoryDataSource::new());
    group_chain(&source);
    source.add_policy(
        PolicyRecord::new("lockdown", "lockdown", PolicyEffect::Deny).with_resources(["document:plan"]),
    );
    let (engine, _) = engine(source);

    let decision = engine
        .check_access(&request(Subject::new("alice"), "document", "plan", "read"))
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.vote_of(Model::Rebac), Some(Vote::Skipped));
}

#[tokio::test]
async fn test_inactive_edges_never_traversed() {
    let source = Arc::new(InMemoryDataSource::new());
    group_chain(&source);
    let (engine, _) = engine(source.clone());
    let req = request(Subject::new("alice"), "document", "plan", "read");

    assert!(engine.check_access(&req).await.unwrap().allowed);

    source.deactivate_relationship("e2");
    engine.on_scope_mutation(tenant_authz::VersionScope::Global);

    assert!(!engine.check_access(&req).await.unwrap().allowed);
    let snapshot = engine.snapshot(&ScopeKey::global()).await.unwrap();
    assert_eq!(snapshot.graph.edge_count(), 4);
}

#[tokio::test]
async fn test_org_edges_only_visible_in_their_org() {
    let source = Arc::new(InMemoryDataSource::new());
    source.add_relationship(
        Relationship::new(
            "r1",
            &EntityRef::user("carol"),
            "can_view",
            &EntityRef::resource("report", "q3"),
        )
        .in_org("acme"),
    );
    let (engine, _) = engine(source);

    let in_acme = Subject::new("carol").in_org("acme");
    let in_globex = Subject::new("carol").in_org("globex");

    assert!(engine.check_access(&request(in_acme, "report", "q3", "read")).await.unwrap().allowed);
    assert!(!engine.check_access(&request(in_globex, "report", "q3", "read")).await.unwrap().allowed);
    assert!(!engine
        .check_access(&request(Subject::new("carol"), "report", "q3", "read"))
        .await
        .unwrap()
        .allowed);
}

#[tokio::test]
async fn test_direct_lookups() {
    let source = Arc::new(InMemoryDataSource::new());
    group_chain(&source);
    let (engine, _) = engine(source);
    let snapshot = engine.snapshot(&ScopeKey::global()).await.unwrap();
    let graph = &snapshot.graph;

    let g1 = EntityRef::group("g1");
    assert!(graph.has_relationship(&EntityRef::user("alice"), "member_of", &g1, None));
    assert!(!graph.has_relationship(&EntityRef::user("alice"), "owner", &g1, None));

    assert_eq!(graph.relationships_of(&g1, None, Direction::Both, None).len(), 2);
    assert_eq!(graph.relationships_of(&g1, None, Direction::Incoming, None).len(), 1);
    assert_eq!(
        graph
            .relationships_of(&EntityRef::group("g4"), Some("owner"), Direction::Outgoing, None)
            .len(),
        1
    );
}

// ============================================================================
// DEFAULT RULE CHAINS
// ============================================================================

#[tokio::test]
async fn test_org_member_reads_org_owned_resource() {
    let source = Arc::new(InMemoryDataSource::new());
    let acme = EntityRef::organization("acme");
    source.add_relationship(Relationship::new("m1", &EntityRef::user("u"), "member", &acme));
    source.add_relationship(Relationship::new("o1", &acme, "owns", &EntityRef::resource("document", "1")));
    let (engine, _) = engine(source);

    let decision = engine
        .check_access(&request(Subject::new("u"), "document", "1", "read"))
        .await
        .unwrap();

    assert!(decision.allowed);
    assert_eq!(
        decision.reason,
        DecisionReason::RelationshipGrant {
            relation: "owns".into(),
            hops: 2
        }
    );
}

#[tokio::test]
async fn test_role_holder_reaches_role_access() {
    let source = Arc::new(InMemoryDataSource::new());
    let auditor = EntityRef::role("r");
    source.add_relationship(Relationship::new("h1", &EntityRef::user("u"), "has_role", &auditor));
    source.add_relationship(Relationship::new(
        "a1",
        &auditor,
        "can_access",
        &EntityRef::resource("document", "1"),
    ));
    let (engine, _) = engine(source);

    let read = engine
        .check_access(&request(Subject::new("u"), "document", "1", "read"))
        .await
        .unwrap();
    assert!(read.allowed);
    assert_eq!(
        read.reason,
        DecisionReason::RelationshipGrant {
            relation: "can_access".into(),
            hops: 2
        }
    );

    let archive = engine
        .check_access(&request(Subject::new("u"), "document", "1", "archive"))
        .await
        .unwrap();
    assert!(archive.allowed);
}

#[tokio::test]
async fn test_owner_granted_every_action() {
    let source = Arc::new(InMemoryDataSource::new());
    source.add_relationship(Relationship::new(
        "o1",
        &EntityRef::user("u"),
        "owner",
        &EntityRef::resource("document", "1"),
    ));
    let (engine, _) = engine(source);

    for action in ["read", "edit", "delete", "share"] {
        let decision = engine
            .check_access(&request(Subject::new("u"), "document", "1", action))
            .await
            .unwrap();
        assert!(decision.allowed, "owner denied {}", action);
        assert_eq!(
            decision.reason,
            DecisionReason::RelationshipGrant {
                relation: "owner".into(),
                hops: 1
            }
        );
    }
}

#[tokio::test]
async fn test_owns_needs_a_transitive_lead_in() {
    let source = Arc::new(InMemoryDataSource::new());
    let acme = EntityRef::organization("acme");
    // "likes" is not transitive, so the chain stops at acme
    source.add_relationship(Relationship::new("l1", &EntityRef::user("u"), "likes", &acme));
    source.add_relationship(Relationship::new("o1", &acme, "owns", &EntityRef::resource("document", "1")));
    let (engine, _) = engine(source);

    let decision = engine
        .check_access(&request(Subject::new("u"), "document", "1", "read"))
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.vote_of(Model::Rebac), Some(Vote::Abstain));
}
