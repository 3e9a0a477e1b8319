//! # Tenant Authorization Engine
//!
//! Authorization decisions for a multi-tenant identity platform, combining
//! three models under a deny-override, fail-closed policy:
//!
//! - **RBAC**: roles resolve to client-prefixed permission keys
//! - **ABAC**: priority-ordered policies with condition trees over subject,
//!   resource and environment attributes
//! - **ReBAC**: bounded breadth-first traversal of a relationship graph
//!
//! Data is read through an [`AuthzDataSource`] into immutable per-scope
//! snapshots. Decisions are cached under a scope-versioned fingerprint and
//! handed to an [`AuditEmitter`].
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tenant_authz::{
//!     AccessRequest, InMemoryDataSource, Permission, PolicyEngine, ResourceRef, Role, Subject,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = Arc::new(InMemoryDataSource::new());
//!     source.add_role(Role {
//!         id: "editor".into(),
//!         name: "editor".into(),
//!         org_id: None,
//!         client_id: None,
//!         is_system: true,
//!     });
//!     source.add_permission(Permission {
//!         id: "p1".into(),
//!         name: "document:edit".into(),
//!         resource: "document".into(),
//!         action: "edit".into(),
//!         client_id: None,
//!     });
//!     source.grant("editor", "p1");
//!
//!     let engine = PolicyEngine::with_defaults(source)?;
//!     let request = AccessRequest::new(
//!         Subject::new("alice").with_role("editor"),
//!         ResourceRef::new("document", "42"),
//!         "edit",
//!     );
//!
//!     let decision = engine.check_access(&request).await?;
//!     assert!(decision.allowed);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod policy;
pub mod rbac;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use engine::{
    AuditEmitter, AuditRecord, CallContext, Decision, DecisionReason, HealthReport, HealthStatus,
    PolicyEngine, ScopeFilter,
};
pub use error::{AuthzError, Result};
pub use graph::{Direction, RelationshipGraph, TraversalResult};
pub use policy::{Condition, PolicyEffect, PolicyRecord, PolicyStore};
pub use rbac::{PermissionKey, RoleResolver};
pub use store::{AuthzDataSource, InMemoryDataSource, SnapshotData, VersionScope};
pub use types::{
    AccessRequest, CheckOptions, Classification, EntityRef, EntityType, Environment, Permission, PermissionId,
    PolicyId, Relationship, ResourceAttribute, ResourceRef, Role, RoleId, RolePermission, ScopeKey,
    Subject,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
