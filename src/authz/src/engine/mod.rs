//! Policy engine: RBAC, ABAC and ReBAC under deny-override
//!
//! Orchestrates snapshot lookup, permission resolution, policy matching and
//! relationship traversal with a decision cache, audit emission and metrics.
//!
//! ```text
//! Request → Cache ─hit────────────────────────────────────┐
//!             │ miss                                      │
//!             ▼                                           │
//!          Snapshot → RBAC → ABAC → ReBAC → Combine → Cache & Audit → Decision
//! ```
//!
//! Every call is bound to an optional deadline and cancellation token. On
//! expiry the in-flight evaluation is dropped and a degraded deny is
//! returned; degraded denies are audited but never cached.

pub mod audit;
pub mod cache;
pub mod decision;
pub mod metrics;

pub use audit::{
    sanitize, AuditEmitter, AuditRecord, ChannelAuditEmitter, MemoryAuditEmitter, TracingAuditEmitter,
};
pub use cache::{CacheKey, CacheStats, DecisionCache, ScopeFilter};
pub use decision::{Decision, DecisionReason, DegradedCause, Model, ModelVote, Vote};
pub use metrics::{EngineMetrics, MetricsCollector};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{AuthzError, Result};
use crate::policy::{AbacInput, AbacOutcome, PolicyEffect};
use crate::rbac::RoleResolver;
use crate::store::{AuthzDataSource, ScopeVersions, Snapshot, SnapshotManager, VersionScope};
use crate::types::{AccessRequest, EntityRef, ScopeKey};

/// Per-call deadline and cancellation
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub deadline: Option<Instant>,
    pub cancel: Option<CancellationToken>,
}

impl CallContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Overall engine health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Last snapshot load failed; stale data may be serving
    Degraded,
}

/// Introspection for operational tooling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub cache_stats: CacheStats,
    pub last_policy_refresh_at: Option<DateTime<Utc>>,
    pub scopes_loaded: usize,
    pub policies_loaded: usize,
    pub policies_skipped: usize,
    pub last_error: Option<String>,
}

/// Remaining time and cancellation state of one call
struct Budget {
    deadline: Option<Instant>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
}

impl Budget {
    fn exhausted(&self) -> Option<DegradedCause> {
        if self.cancel.is_cancelled() || self.shutdown.is_cancelled() {
            return Some(DegradedCause::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(DegradedCause::DeadlineExceeded),
            _ => None,
        }
    }
}

enum Outcome {
    Computed(Decision, Option<CacheKey>),
    CacheHit(Decision),
    Interrupted(DegradedCause),
}

/// Authorization decision engine
pub struct PolicyEngine {
    config: EngineConfig,
    versions: Arc<ScopeVersions>,
    snapshots: Arc<SnapshotManager>,
    cache: Arc<DecisionCache>,
    audit: Arc<dyn AuditEmitter>,
    metrics: Arc<MetricsCollector>,
    shutdown: CancellationToken,
}

impl PolicyEngine {
    /// Create an engine over a data source
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn AuthzDataSource>,
        audit: Arc<dyn AuditEmitter>,
    ) -> Result<Self> {
        config.validate()?;

        let versions = Arc::new(ScopeVersions::new());
        let snapshots = Arc::new(SnapshotManager::new(
            source,
            Arc::clone(&versions),
            config.refresh.clone(),
            config.graph.clone(),
        ));
        let cache = Arc::new(DecisionCache::new(config.cache.clone()));

        info!(
            "PolicyEngine initialized with cache={}, max_depth={}, audit={}",
            config.cache.enabled, config.graph.max_depth, config.audit_enabled
        );

        Ok(Self {
            config,
            versions,
            snapshots,
            cache,
            audit,
            metrics: Arc::new(MetricsCollector::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Engine with default configuration and tracing audit output
    pub fn with_defaults(source: Arc<dyn AuthzDataSource>) -> Result<Self> {
        Self::new(EngineConfig::default(), source, Arc::new(TracingAuditEmitter))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check a request with the configured default deadline
    pub async fn check_access(&self, request: &AccessRequest) -> Result<Decision> {
        self.check_access_with(request, CallContext::default()).await
    }

    /// Check a request under a caller deadline and cancellation token
    ///
    /// Only [`AuthzError::StoreUnavailable`] is returned as an error; every
    /// other failure is a deny.
    pub async fn check_access_with(&self, request: &AccessRequest, ctx: CallContext) -> Result<Decision> {
        let start = std::time::Instant::now();

        let budget = Budget {
            deadline: ctx
                .deadline
                .or_else(|| self.config.default_deadline().map(|d| Instant::now() + d)),
            cancel: ctx.cancel.unwrap_or_default(),
            shutdown: self.shutdown.clone(),
        };

        debug!(
            "Authorization request: subject={}, resource={}, action={}",
            request.subject.id,
            request.resource.qualified_id(),
            request.action
        );

        let outcome = tokio::select! {
            biased;
            _ = budget.cancel.cancelled() => Ok(Outcome::Interrupted(DegradedCause::Cancelled)),
            _ = budget.shutdown.cancelled() => Ok(Outcome::Interrupted(DegradedCause::Cancelled)),
            _ = sleep_until(budget.deadline) => Ok(Outcome::Interrupted(DegradedCause::DeadlineExceeded)),
            result = self.evaluate(request, &budget) => result,
        };

        let decision = match outcome {
            Ok(Outcome::CacheHit(decision)) => {
                self.metrics.record_cache_hit();
                self.metrics.record_decision(decision.allowed, false);
                self.metrics.record_latency(start.elapsed());
                return Ok(decision.as_cache_hit());
            }
            Ok(Outcome::Computed(decision, key)) => {
                if let Some(key) = key {
                    self.cache.put(key, request, decision.clone(), None);
                }
                decision
            }
            Ok(Outcome::Interrupted(cause)) => {
                warn!(
                    "Authorization for subject={} resource={} {}; denying",
                    request.subject.id,
                    request.resource.qualified_id(),
                    cause
                );
                Decision::degraded(cause)
            }
            Err(e) => {
                self.metrics.record_store_error();
                warn!("Authorization failed for subject={}: {}", request.subject.id, e);
                return Err(e);
            }
        };

        self.metrics.record_decision(decision.allowed, decision.degraded);
        self.metrics.record_latency(start.elapsed());
        self.emit_audit(request, &decision).await;

        Ok(decision)
    }

    /// Check several requests concurrently, preserving order
    pub async fn check_batch_access(&self, requests: &[AccessRequest]) -> Vec<Result<Decision>> {
        join_all(requests.iter().map(|r| self.check_access(r))).await
    }

    async fn evaluate(&self, request: &AccessRequest, budget: &Budget) -> Result<Outcome> {
        if let Some(decision) = Self::validate_request(request) {
            return Ok(Outcome::Computed(decision, None));
        }

        let scope = request.subject.scope();
        let stamp = self.versions.stamp(&scope);
        let key = CacheKey::compute(request, &stamp);

        let mut cacheable = self.cache.is_enabled();
        if cacheable {
            match self.cache.get(&key) {
                Ok(Some(decision)) => return Ok(Outcome::CacheHit(decision)),
                Ok(None) => self.metrics.record_cache_miss(),
                Err(e) => {
                    warn!("Bypassing decision cache: {}", e);
                    self.metrics.record_cache_miss();
                    cacheable = false;
                }
            }
        }

        let snapshot = self.snapshots.get(&scope).await?;

        if let Some(cause) = budget.exhausted() {
            return Ok(Outcome::Interrupted(cause));
        }

        let decision = match self.decide(request, &snapshot, budget) {
            Ok(decision) => decision,
            Err(cause) => return Ok(Outcome::Interrupted(cause)),
        };

        Ok(Outcome::Computed(decision, cacheable.then_some(key)))
    }

    /// Reject requests that cannot name a subject or resource
    fn validate_request(request: &AccessRequest) -> Option<Decision> {
        let missing = if request.subject.id.trim().is_empty() {
            Some("subject id is empty")
        } else if request.resource.resource_type.trim().is_empty() || request.resource.id.trim().is_empty() {
            Some("resource reference is incomplete")
        } else if request.action.trim().is_empty() {
            Some("action is empty")
        } else {
            None
        };

        missing.map(|detail| {
            Decision::deny(DecisionReason::NotFound {
                detail: AuthzError::NotFound(detail.to_string()).to_string(),
            })
        })
    }

    /// Run the three models and combine under deny-override
    fn decide(
        &self,
        request: &AccessRequest,
        snapshot: &Snapshot,
        budget: &Budget,
    ) -> std::result::Result<Decision, DegradedCause> {
        let subject = &request.subject;
        let resource = &request.resource;
        let options = request.options;
        let required = request.required_permission();
        let mut trace = Vec::with_capacity(3);

        // RBAC
        let role_grant = if options.skip_rbac {
            trace.push(ModelVote::new(Model::Rbac, Vote::Skipped, "skipped by request"));
            None
        } else {
            let effective = snapshot
                .roles
                .resolve_effective_permissions(&subject.roles, subject.client_id.as_deref());
            let grant = RoleResolver::grants(&effective, subject.client_id.as_deref(), &required);
            trace.push(match &grant {
                Some(key) => ModelVote::new(Model::Rbac, Vote::Allow, format!("granted by {}", key)),
                None => ModelVote::new(
                    Model::Rbac,
                    Vote::Abstain,
                    format!("{} not in {} effective permission(s)", required, effective.len()),
                ),
            });
            grant
        };

        // ABAC runs even after an RBAC allow so a deny can override it
        let abac = if options.skip_abac {
            trace.push(ModelVote::new(Model::Abac, Vote::Skipped, "skipped by request"));
            AbacOutcome::from_matches(Vec::new())
        } else {
            let abac = snapshot.policies.evaluate(&AbacInput {
                subject,
                resource,
                action: &request.action,
                environment: &request.environment,
                stored: snapshot.resource_attribute(&resource.resource_type, &resource.id),
            });
            trace.push(match (&abac.effect, &abac.deciding) {
                (Some(PolicyEffect::Deny), Some(p)) => {
                    ModelVote::new(Model::Abac, Vote::Deny, format!("denied by policy {}", p.policy_id))
                }
                (Some(PolicyEffect::Allow), Some(p)) => {
                    ModelVote::new(Model::Abac, Vote::Allow, format!("allowed by policy {}", p.policy_id))
                }
                _ => ModelVote::new(Model::Abac, Vote::Abstain, "no policy matched"),
            });
            abac
        };

        if let Some(cause) = budget.exhausted() {
            return Err(cause);
        }

        let denied = abac.effect == Some(PolicyEffect::Deny);
        let abac_allowed = abac.effect == Some(PolicyEffect::Allow);

        // First evaluated model that did not allow, for require_all
        let mut failed_model = if !options.skip_rbac && role_grant.is_none() {
            Some(Model::Rbac)
        } else if !options.skip_abac && !abac_allowed {
            Some(Model::Abac)
        } else {
            None
        };
        let allowed_so_far = role_grant.is_some() || abac_allowed;

        // ReBAC
        let mut rebac_evaluated = false;
        let mut relationship_grant = None;
        let relations = if options.skip_rebac {
            None
        } else {
            self.config
                .graph
                .rules
                .relations_for(&resource.resource_type, &request.action)
        };
        match relations {
            None if options.skip_rebac => {
                trace.push(ModelVote::new(Model::Rebac, Vote::Skipped, "skipped by request"))
            }
            None => trace.push(ModelVote::new(Model::Rebac, Vote::Skipped, "no relation rule")),
            Some(_) if denied => {
                trace.push(ModelVote::new(Model::Rebac, Vote::Skipped, "overridden by policy deny"))
            }
            Some(_) if options.require_all && failed_model.is_some() => {
                trace.push(ModelVote::new(Model::Rebac, Vote::Skipped, "required model already failed"))
            }
            Some(_) if !options.require_all && allowed_so_far => {
                trace.push(ModelVote::new(Model::Rebac, Vote::Skipped, "already granted"))
            }
            Some(relations) => {
                let from = EntityRef::user(subject.id.clone());
                let to = resource.entity_ref();
                let mut depth_exceeded = false;
                rebac_evaluated = true;

                for relation in &relations {
                    let result = snapshot.graph.check_transitive_access_with(
                        &from,
                        relation,
                        &to,
                        self.config.graph.max_depth,
                        subject.org_id.as_deref(),
                        || budget.exhausted().is_some(),
                    );
                    if result.aborted {
                        return Err(budget.exhausted().unwrap_or(DegradedCause::Cancelled));
                    }
                    if result.found {
                        relationship_grant = Some((relation.clone(), result.path.len()));
                        break;
                    }
                    depth_exceeded |= result.depth_exceeded;
                }

                trace.push(match &relationship_grant {
                    Some((relation, hops)) => ModelVote::new(
                        Model::Rebac,
                        Vote::Allow,
                        format!("{} via {} hop(s)", relation, hops),
                    ),
                    None if depth_exceeded => ModelVote::new(
                        Model::Rebac,
                        Vote::Abstain,
                        AuthzError::DepthExceeded(self.config.graph.max_depth).to_string(),
                    ),
                    None => ModelVote::new(
                        Model::Rebac,
                        Vote::Abstain,
                        format!("no {} relationship", relations.join("/")),
                    ),
                });
            }
        }
        if rebac_evaluated && relationship_grant.is_none() && failed_model.is_none() {
            failed_model = Some(Model::Rebac);
        }
        let any_evaluated = !options.skip_rbac || !options.skip_abac || rebac_evaluated;

        let matched = abac.matched_ids();
        let decision = if denied {
            let policy_id = abac
                .deciding
                .map(|p| p.policy_id)
                .unwrap_or_default();
            Decision::deny(DecisionReason::PolicyDeny { policy_id })
        } else if let Some(model) = failed_model.filter(|_| options.require_all) {
            Decision::deny(DecisionReason::RequiredModelDenied { model })
        } else if options.require_all && !any_evaluated {
            Decision::deny(DecisionReason::NoGrant)
        } else if let Some(key) = role_grant {
            Decision::allow(DecisionReason::RoleGrant {
                permission: key.to_string(),
            })
        } else if let (Some(PolicyEffect::Allow), Some(p)) = (abac.effect, abac.deciding) {
            Decision::allow(DecisionReason::PolicyAllow {
                policy_id: p.policy_id,
            })
        } else if let Some((relation, hops)) = relationship_grant {
            Decision::allow(DecisionReason::RelationshipGrant { relation, hops })
        } else {
            Decision::deny(DecisionReason::NoGrant)
        };

        debug!(
            "Decision for {} on {}: {} ({})",
            subject.id,
            resource.qualified_id(),
            if decision.allowed { "ALLOW" } else { "DENY" },
            decision.reason
        );

        Ok(decision.with_matches(matched).with_trace(trace))
    }

    async fn emit_audit(&self, request: &AccessRequest, decision: &Decision) {
        if !self.config.audit_enabled {
            return;
        }
        let record = AuditRecord::from_decision(request, decision);
        if let Err(e) = self.audit.emit(record).await {
            warn!("Audit emission failed for decision {}: {}", decision.decision_id, e);
        }
    }

    /// Record a mutation in a scope
    ///
    /// Cache keys embed the scope version, so existing entries for the scope
    /// stop matching immediately; the snapshot reloads on next use.
    pub fn on_scope_mutation(&self, scope: VersionScope) -> u64 {
        let version = self.versions.bump(&scope);
        info!("Scope {} mutated, now at version {}", scope, version);
        version
    }

    pub fn versions(&self) -> &Arc<ScopeVersions> {
        &self.versions
    }

    /// Current snapshot of a scope, for graph or policy introspection
    pub async fn snapshot(&self, scope: &ScopeKey) -> Result<Arc<Snapshot>> {
        self.snapshots.get(scope).await
    }

    pub fn clear_cache(&self, filter: Option<&ScopeFilter>) -> usize {
        let removed = self.cache.clear_cache(filter);
        info!("Cleared {} decision cache entries", removed);
        removed
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.get_cache_stats()
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.metrics.get_metrics()
    }

    pub fn export_prometheus(&self) -> String {
        self.metrics.export_prometheus()
    }

    pub fn health(&self) -> HealthReport {
        let status = self.snapshots.status();
        HealthReport {
            status: if status.last_error.is_some() {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            },
            cache_stats: self.cache.get_cache_stats(),
            last_policy_refresh_at: status.last_refresh_at,
            scopes_loaded: status.scopes,
            policies_loaded: status.policies_loaded,
            policies_skipped: status.policies_skipped,
            last_error: status.last_error,
        }
    }

    /// Reload every loaded scope now
    pub async fn refresh(&self) -> usize {
        self.snapshots.refresh_all().await
    }

    /// Reload snapshots on the configured interval until cancelled or shut down
    pub fn spawn_refresh_task(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = engine.config.refresh.interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = engine.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        engine.refresh().await;
                    }
                }
            }
            debug!("Snapshot refresh task stopped");
        })
    }

    /// Stop background work and drop cached state
    ///
    /// In-flight and later checks resolve to degraded denies.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.cache.clear_cache(None);
        self.snapshots.clear();
        info!("PolicyEngine shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
