//! Authorization decision types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::types::PolicyId;

/// Authorization model that contributed to a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Rbac,
    Abac,
    Rebac,
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::Rbac => f.write_str("rbac"),
            Model::Abac => f.write_str("abac"),
            Model::Rebac => f.write_str("rebac"),
        }
    }
}

/// A model's input to the combiner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Allow,
    Deny,
    /// Evaluated, no opinion
    Abstain,
    /// Not evaluated
    Skipped,
}

/// One entry of the rule trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVote {
    pub model: Model,
    pub vote: Vote,
    pub detail: String,
}

impl ModelVote {
    pub fn new(model: Model, vote: Vote, detail: impl Into<String>) -> Self {
        Self {
            model,
            vote,
            detail: detail.into(),
        }
    }
}

/// Why a degraded decision was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedCause {
    DeadlineExceeded,
    Cancelled,
}

impl fmt::Display for DegradedCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradedCause::DeadlineExceeded => f.write_str("deadline exceeded"),
            DegradedCause::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Reason for authorization decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionReason {
    /// Role grants the required permission
    RoleGrant { permission: String },

    /// ABAC allow policy matched
    PolicyAllow { policy_id: PolicyId },

    /// Relationship path grants access
    RelationshipGrant { relation: String, hops: usize },

    /// ABAC deny policy matched (overrides every allow)
    PolicyDeny { policy_id: PolicyId },

    /// No model granted access
    NoGrant,

    /// Subject or resource could not be resolved
    NotFound { detail: String },

    /// `require_all` was set and an evaluated model did not allow
    RequiredModelDenied { model: Model },

    /// Deadline or cancellation interrupted evaluation
    Degraded { cause: DegradedCause },
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionReason::RoleGrant { permission } => write!(f, "role grants {}", permission),
            DecisionReason::PolicyAllow { policy_id } => write!(f, "allowed by policy {}", policy_id),
            DecisionReason::RelationshipGrant { relation, hops } => {
                write!(f, "relationship '{}' found in {} hop(s)", relation, hops)
            }
            DecisionReason::PolicyDeny { policy_id } => write!(f, "denied by policy {}", policy_id),
            DecisionReason::NoGrant => f.write_str("no model granted access"),
            DecisionReason::NotFound { detail } => write!(f, "not found: {}", detail),
            DecisionReason::RequiredModelDenied { model } => {
                write!(f, "{} did not grant access and all models are required", model)
            }
            DecisionReason::Degraded { cause } => write!(f, "degraded: {}", cause),
        }
    }
}

/// Authorization decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Id of the evaluation that produced this decision
    ///
    /// Cache hits carry the id and timestamp of the original evaluation.
    pub decision_id: String,

    pub allowed: bool,

    pub timestamp: DateTime<Utc>,

    pub reason: DecisionReason,

    /// Every ABAC policy that matched, in evaluation order
    #[serde(default)]
    pub matched_policy_ids: Vec<PolicyId>,

    #[serde(default)]
    pub rule_trace: Vec<ModelVote>,

    /// Served from the decision cache
    #[serde(default)]
    pub cache_hit: bool,

    /// Produced by deadline expiry or cancellation
    #[serde(default)]
    pub degraded: bool,
}

impl Decision {
    fn new(allowed: bool, reason: DecisionReason) -> Self {
        Self {
            decision_id: Uuid::new_v4().to_string(),
            allowed,
            timestamp: Utc::now(),
            reason,
            matched_policy_ids: Vec::new(),
            rule_trace: Vec::new(),
            cache_hit: false,
            degraded: false,
        }
    }

    /// Create an allow decision
    pub fn allow(reason: DecisionReason) -> Self {
        Self::new(true, reason)
    }

    /// Create a deny decision
    pub fn deny(reason: DecisionReason) -> Self {
        Self::new(false, reason)
    }

    /// Fail-closed deny for an interrupted evaluation
    pub fn degraded(cause: DegradedCause) -> Self {
        let mut decision = Self::new(false, DecisionReason::Degraded { cause });
        decision.degraded = true;
        decision
    }

    pub fn with_matches(mut self, matched_policy_ids: Vec<PolicyId>) -> Self {
        self.matched_policy_ids = matched_policy_ids;
        self
    }

    pub fn with_trace(mut self, rule_trace: Vec<ModelVote>) -> Self {
        self.rule_trace = rule_trace;
        self
    }

    /// Copy served from the cache
    pub fn as_cache_hit(&self) -> Self {
        let mut hit = self.clone();
        hit.cache_hit = true;
        hit
    }

    /// Vote recorded for a model, if any
    pub fn vote_of(&self, model: Model) -> Option<Vote> {
        self.rule_trace
            .iter()
            .find(|v| v.model == model)
            .map(|v| v.vote)
    }
}
