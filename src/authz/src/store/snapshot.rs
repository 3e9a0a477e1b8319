//! Compiled per-scope snapshots and their refresh

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::versions::{ScopeVersions, VersionStamp};
use super::{AuthzDataSource, SnapshotData};
use crate::config::{GraphConfig, RefreshConfig};
use crate::error::{AuthzError, Result};
use crate::graph::RelationshipGraph;
use crate::policy::PolicyStore;
use crate::rbac::RoleResolver;
use crate::types::{ResourceAttribute, ScopeKey};

/// Immutable view of one scope's authorization data
#[derive(Debug)]
pub struct Snapshot {
    pub scope: ScopeKey,
    pub stamp: VersionStamp,
    pub loaded_at: DateTime<Utc>,
    loaded: Instant,
    pub roles: RoleResolver,
    pub policies: PolicyStore,
    pub graph: RelationshipGraph,
    resources: HashMap<(String, String), ResourceAttribute>,
}

impl Snapshot {
    /// Compile raw tables
    pub fn build(scope: ScopeKey, stamp: VersionStamp, data: &SnapshotData, graph: &GraphConfig) -> Self {
        let resources = data
            .resource_attributes
            .iter()
            .map(|a| ((a.resource_type.clone(), a.resource_id.clone()), a.clone()))
            .collect();

        Self {
            roles: RoleResolver::new(&data.roles, &data.permissions, &data.role_permissions),
            policies: PolicyStore::from_records(&data.policies),
            graph: RelationshipGraph::new(&data.relationships, graph.transitive_relations.iter().cloned()),
            resources,
            scope,
            stamp,
            loaded_at: Utc::now(),
            loaded: Instant::now(),
        }
    }

    pub fn resource_attribute(&self, resource_type: &str, resource_id: &str) -> Option<&ResourceAttribute> {
        self.resources
            .get(&(resource_type.to_string(), resource_id.to_string()))
    }

    pub fn age(&self) -> Duration {
        self.loaded.elapsed()
    }
}

/// Loaded-snapshot summary for health reporting
#[derive(Debug, Clone, Default)]
pub struct SnapshotStatus {
    pub scopes: usize,
    pub policies_loaded: usize,
    pub policies_skipped: usize,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Loads, caches and refreshes snapshots per scope
///
/// Loads for the same scope are serialized; other scopes proceed
/// concurrently. A snapshot is reloaded when its version stamp no longer
/// matches the registry or when it is older than the refresh interval.
pub struct SnapshotManager {
    source: Arc<dyn AuthzDataSource>,
    versions: Arc<ScopeVersions>,
    snapshots: DashMap<ScopeKey, Arc<Snapshot>>,
    gates: DashMap<ScopeKey, Arc<Mutex<()>>>,
    refresh: RefreshConfig,
    graph: GraphConfig,
    last_refresh_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
}

impl SnapshotManager {
    pub fn new(
        source: Arc<dyn AuthzDataSource>,
        versions: Arc<ScopeVersions>,
        refresh: RefreshConfig,
        graph: GraphConfig,
    ) -> Self {
        Self {
            source,
            versions,
            snapshots: DashMap::new(),
            gates: DashMap::new(),
            refresh,
            graph,
            last_refresh_at: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    pub fn versions(&self) -> &Arc<ScopeVersions> {
        &self.versions
    }

    fn is_current(&self, snapshot: &Snapshot, stamp: &VersionStamp) -> bool {
        snapshot.stamp == *stamp && snapshot.age() < self.refresh.interval()
    }

    /// Current snapshot for a scope, loading it if missing or stale
    ///
    /// When only the refresh interval has lapsed and the reload fails, the
    /// previous snapshot keeps serving. A version mismatch with a failed
    /// reload is [`AuthzError::StoreUnavailable`].
    pub async fn get(&self, scope: &ScopeKey) -> Result<Arc<Snapshot>> {
        let stamp = self.versions.stamp(scope);

        if let Some(existing) = self.snapshots.get(scope) {
            if self.is_current(&existing, &stamp) {
                return Ok(Arc::clone(&existing));
            }
        }

        let gate = self
            .gates
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = gate.lock().await;

        // Another caller may have loaded while we waited
        let stamp = self.versions.stamp(scope);
        let previous = self.snapshots.get(scope).map(|s| Arc::clone(&s));
        if let Some(existing) = &previous {
            if self.is_current(existing, &stamp) {
                return Ok(Arc::clone(existing));
            }
        }

        match self.load_with_retry(scope).await {
            Ok(data) => Ok(self.install(scope, stamp, &data)),
            Err(e) => match previous {
                Some(stale) if stale.stamp == stamp => {
                    warn!(
                        "Serving snapshot for {} aged {:?} after failed reload: {}",
                        scope,
                        stale.age(),
                        e
                    );
                    Ok(stale)
                }
                _ => Err(e),
            },
        }
    }

    fn install(&self, scope: &ScopeKey, stamp: VersionStamp, data: &SnapshotData) -> Arc<Snapshot> {
        let snapshot = Arc::new(Snapshot::build(scope.clone(), stamp, data, &self.graph));

        debug!(
            "Loaded snapshot for {}: {} roles, {} policies ({} skipped), {} edges",
            scope,
            snapshot.roles.role_count(),
            snapshot.policies.len(),
            snapshot.policies.skipped().len(),
            snapshot.graph.edge_count()
        );

        self.snapshots.insert(scope.clone(), Arc::clone(&snapshot));
        *self.last_refresh_at.write() = Some(snapshot.loaded_at);
        *self.last_error.write() = None;
        snapshot
    }

    async fn load_with_retry(&self, scope: &ScopeKey) -> Result<SnapshotData> {
        let attempts = self.refresh.max_attempts.max(1);
        let mut backoff = self.refresh.backoff();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.source.load_snapshot(scope).await {
                Ok(data) => return Ok(data),
                Err(e) => {
                    warn!(
                        "Snapshot load for {} from {} failed (attempt {}/{}): {}",
                        scope,
                        self.source.name(),
                        attempt,
                        attempts,
                        e
                    );
                    let transient = e.is_transient();
                    last_error = e.to_string();
                    if !transient {
                        break;
                    }
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }

        *self.last_error.write() = Some(last_error.clone());
        Err(AuthzError::StoreUnavailable(format!("{}: {}", scope, last_error)))
    }

    /// Reload every known scope, returning how many succeeded
    ///
    /// Scopes that fail keep their previous snapshot.
    pub async fn refresh_all(&self) -> usize {
        let scopes: Vec<ScopeKey> = self.snapshots.iter().map(|e| e.key().clone()).collect();
        let mut refreshed = 0;

        for scope in scopes {
            let gate = self
                .gates
                .entry(scope.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let _guard = gate.lock().await;

            let stamp = self.versions.stamp(&scope);
            match self.load_with_retry(&scope).await {
                Ok(data) => {
                    self.install(&scope, stamp, &data);
                    refreshed += 1;
                }
                Err(e) => warn!("Refresh of {} failed, keeping previous snapshot: {}", scope, e),
            }
        }

        info!("Refreshed {} snapshot(s)", refreshed);
        refreshed
    }

    /// Drop every cached snapshot
    pub fn clear(&self) {
        self.snapshots.clear();
    }

    pub fn status(&self) -> SnapshotStatus {
        let mut status = SnapshotStatus {
            scopes: self.snapshots.len(),
            last_refresh_at: *self.last_refresh_at.read(),
            last_error: self.last_error.read().clone(),
            ..SnapshotStatus::default()
        };
        for entry in self.snapshots.iter() {
            status.policies_loaded += entry.policies.len();
            status.policies_skipped += entry.policies.skipped().len();
        }
        status
    }
}
