//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use tenant_authz::engine::MemoryAuditEmitter;
use tenant_authz::{
    AccessRequest, EngineConfig, InMemoryDataSource, Permission, PolicyEngine, ResourceRef, Role,
    Subject,
};

pub fn role(id: &str, org_id: Option<&str>, client_id: Option<&str>) -> Role {
    Role {
        id: id.to_string(),
        name: id.to_string(),
        org_id: org_id.map(str::to_string),
        client_id: client_id.map(str::to_string),
        is_system: org_id.is_none() && client_id.is_none(),
    }
}

pub fn permission(id: &str, name: &str, client_id: Option<&str>) -> Permission {
    let mut parts = name.splitn(2, ':');
    Permission {
        id: id.to_string(),
        name: name.to_string(),
        resource: parts.next().unwrap_or_default().to_string(),
        action: parts.next().unwrap_or_default().to_string(),
        client_id: client_id.map(str::to_string),
    }
}

/// Global "viewer" role with `document:read`, "editor" with
/// `document:read` and `document:edit`
pub fn seeded_source() -> Arc<InMemoryDataSource> {
    let source = InMemoryDataSource::new();
    source.add_role(role("viewer", None, None));
    source.add_role(role("editor", None, None));
    source.add_permission(permission("p-read", "document:read", None));
    source.add_permission(permission("p-edit", "document:edit", None));
    source.grant("viewer", "p-read");
    source.grant("editor", "p-read");
    source.grant("editor", "p-edit");
    Arc::new(source)
}

pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.refresh.backoff_ms = 1;
    config
}

pub fn engine_with(
    source: Arc<InMemoryDataSource>,
    config: EngineConfig,
) -> (PolicyEngine, Arc<MemoryAuditEmitter>) {
    let audit = Arc::new(MemoryAuditEmitter::new());
    let engine = PolicyEngine::new(config, source, audit.clone()).expect("valid config");
    (engine, audit)
}

pub fn engine(source: Arc<InMemoryDataSource>) -> (PolicyEngine, Arc<MemoryAuditEmitter>) {
    engine_with(source, fast_config())
}

pub fn request(subject: Subject, resource_type: &str, resource_id: &str, action: &str) -> AccessRequest {
    AccessRequest::new(subject, ResourceRef::new(resource_type, resource_id), action)
}
