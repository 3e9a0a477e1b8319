//! Data sources and per-scope snapshots
//!
//! The engine never queries its backing store on the decision path. An
//! [`AuthzDataSource`] is asked for a [`SnapshotData`] of one scope, which
//! [`SnapshotManager`] compiles into an immutable [`Snapshot`] and shares
//! across concurrent checks until the scope version changes or the refresh
//! interval lapses.

mod snapshot;
mod versions;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use snapshot::{Snapshot, SnapshotManager, SnapshotStatus};
pub use versions::{ScopeVersions, VersionScope, VersionStamp};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{AuthzError, Result};
use crate::policy::PolicyRecord;
use crate::types::{Permission, Relationship, ResourceAttribute, Role, RolePermission, ScopeKey};

/// Raw tables of one scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotData {
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub role_permissions: Vec<RolePermission>,
    #[serde(default)]
    pub policies: Vec<PolicyRecord>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub resource_attributes: Vec<ResourceAttribute>,
}

impl SnapshotData {
    /// Read a JSON fixture
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Rows visible to a scope
    ///
    /// Org-less rows are shared by every org; client-less rows by every
    /// client.
    pub fn filter_for(&self, scope: &ScopeKey) -> SnapshotData {
        let org_ok = |org: &Option<String>| org.is_none() || *org == scope.org_id;
        let client_ok = |client: &Option<String>| client.is_none() || *client == scope.client_id;

        SnapshotData {
            roles: self
                .roles
                .iter()
                .filter(|r| org_ok(&r.org_id) && client_ok(&r.client_id))
                .cloned()
                .collect(),
            permissions: self
                .permissions
                .iter()
                .filter(|p| client_ok(&p.client_id))
                .cloned()
                .collect(),
            role_permissions: self.role_permissions.clone(),
            policies: self
                .policies
                .iter()
                .filter(|p| p.applies_to(scope))
                .cloned()
                .collect(),
            relationships: self
                .relationships
                .iter()
                .filter(|r| org_ok(&r.org_id))
                .cloned()
                .collect(),
            resource_attributes: self
                .resource_attributes
                .iter()
                .filter(|a| org_ok(&a.org_id))
                .cloned()
                .collect(),
        }
    }
}

/// Read-only access to the authorization tables
#[async_trait]
pub trait AuthzDataSource: Send + Sync {
    /// Load everything a scope's decisions depend on
    async fn load_snapshot(&self, scope: &ScopeKey) -> Result<SnapshotData>;

    /// Short name for logs and health output
    fn name(&self) -> &str {
        "unknown"
    }
}

/// In-memory data source for tests, fixtures and embedding
#[derive(Debug, Default)]
pub struct InMemoryDataSource {
    data: RwLock<SnapshotData>,
    failures_remaining: AtomicUsize,
    unavailable: std::sync::atomic::AtomicBool,
    latency_ms: AtomicU64,
    loads: AtomicUsize,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: SnapshotData) -> Self {
        Self {
            data: RwLock::new(data),
            ..Self::default()
        }
    }

    /// Replace every table
    pub fn replace(&self, data: SnapshotData) {
        *self.data.write() = data;
    }

    pub fn add_role(&self, role: Role) {
        self.data.write().roles.push(role);
    }

    pub fn add_permission(&self, permission: Permission) {
        self.data.write().permissions.push(permission);
    }

    pub fn grant(&self, role_id: impl Into<String>, permission_id: impl Into<String>) {
        self.data.write().role_permissions.push(RolePermission {
            role_id: role_id.into(),
            permission_id: permission_id.into(),
        });
    }

    pub fn add_policy(&self, policy: PolicyRecord) {
        self.data.write().policies.push(policy);
    }

    pub fn add_relationship(&self, relationship: Relationship) {
        self.data.write().relationships.push(relationship);
    }

    /// Insert or replace the attributes of a resource
    pub fn set_resource_attribute(&self, attribute: ResourceAttribute) {
        let mut data = self.data.write();
        data.resource_attributes.retain(|a| {
            !(a.resource_type == attribute.resource_type && a.resource_id == attribute.resource_id)
        });
        data.resource_attributes.push(attribute);
    }

    /// Mark a relationship inactive
    pub fn deactivate_relationship(&self, id: &str) {
        for rel in self.data.write().relationships.iter_mut().filter(|r| r.id == id) {
            rel.is_active = false;
        }
    }

    /// Fail the next `count` loads
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Fail every load until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay each load
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of load attempts so far
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthzDataSource for InMemoryDataSource {
    async fn load_snapshot(&self, scope: &ScopeKey) -> Result<SnapshotData> {
        self.loads.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthzError::Database("data source offline".into()));
        }

        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(AuthzError::Database("transient load failure".into()));
        }

        Ok(self.data.read().filter_for(scope))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
