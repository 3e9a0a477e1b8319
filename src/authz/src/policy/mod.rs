//! ABAC policy definition, compilation and matching
//!
//! Policies arrive as [`PolicyRecord`]s (the stored JSON shape). They are
//! compiled into [`Policy`] values when a snapshot is built; a record whose
//! condition tree or matchers fail to compile is skipped and logged, and the
//! remaining policies keep serving.

pub mod condition;
pub mod matcher;

pub use condition::{Comparator, Condition, Predicate};
pub use matcher::{GlobPattern, ResourceMatcher, ResourceMatcherSpec};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::{AuthzError, Result};
use crate::types::{Environment, PolicyId, ResourceAttribute, ResourceRef, ScopeKey, Subject};

/// Policy effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEffect {
    /// Allow the action
    Allow,
    /// Deny the action
    Deny,
}

/// Stored policy record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub id: PolicyId,
    pub name: String,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    pub effect: PolicyEffect,

    /// Higher priority is evaluated first
    #[serde(default)]
    pub priority: i32,

    /// Predicate over the full request context
    /// (`subject.*`, `resource.*`, `environment.*`, `action`)
    #[serde(default)]
    pub conditions: Value,

    /// Resource matchers; empty matches every resource
    #[serde(default)]
    pub resources: Vec<Value>,

    /// Action patterns; empty matches every action
    #[serde(default)]
    pub actions: Vec<String>,

    /// Predicate over subject attributes
    #[serde(default)]
    pub subjects: Value,

    /// Predicate over environment attributes
    #[serde(default)]
    pub environment: Value,

    #[serde(default = "default_true")]
    pub is_active: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl PolicyRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, effect: PolicyEffect) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            org_id: None,
            client_id: None,
            effect,
            priority: 0,
            conditions: Value::Null,
            resources: Vec::new(),
            actions: Vec::new(),
            subjects: Value::Null,
            environment: Value::Null,
            is_active: true,
            created_at: DateTime::<Utc>::default(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_resources<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = patterns.into_iter().map(|p| Value::String(p.into())).collect();
        self
    }

    pub fn with_resource_matcher(mut self, matcher: ResourceMatcherSpec) -> Self {
        self.resources
            .push(serde_json::to_value(matcher).unwrap_or(Value::Null));
        self
    }

    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_conditions(mut self, condition: Condition) -> Self {
        self.conditions = serde_json::to_value(condition).unwrap_or(Value::Null);
        self
    }

    pub fn with_subjects(mut self, condition: Condition) -> Self {
        self.subjects = serde_json::to_value(condition).unwrap_or(Value::Null);
        self
    }

    pub fn with_environment(mut self, condition: Condition) -> Self {
        self.environment = serde_json::to_value(condition).unwrap_or(Value::Null);
        self
    }

    pub fn in_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn for_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Whether this record applies to a request scope
    pub fn applies_to(&self, scope: &ScopeKey) -> bool {
        scope_matches(&self.org_id, &scope.org_id) && scope_matches(&self.client_id, &scope.client_id)
    }

    /// Compile into an evaluable policy
    pub fn compile(&self) -> Result<Policy> {
        let resources = self
            .resources
            .iter()
            .map(|raw| {
                let spec: ResourceMatcherSpec = serde_json::from_value(raw.clone()).map_err(|e| {
                    AuthzError::Config(format!("malformed resource matcher {}: {}", raw, e))
                })?;
                spec.compile()
            })
            .collect::<Result<Vec<_>>>()?;

        let actions = self
            .actions
            .iter()
            .map(|a| GlobPattern::new(a))
            .collect::<Result<Vec<_>>>()?;

        let compile = |raw: &Value| -> Result<Option<Predicate>> {
            Condition::from_json(raw)?.map(|c| c.compile()).transpose()
        };

        Ok(Policy {
            id: self.id.clone(),
            name: self.name.clone(),
            org_id: self.org_id.clone(),
            client_id: self.client_id.clone(),
            effect: self.effect,
            priority: self.priority,
            conditions: compile(&self.conditions)?,
            resources,
            actions,
            subjects: compile(&self.subjects)?,
            environment: compile(&self.environment)?,
            created_at: self.created_at,
        })
    }
}

/// `None` on the policy side applies everywhere; otherwise the request must
/// carry the same value.
fn scope_matches(policy_side: &Option<String>, request_side: &Option<String>) -> bool {
    match policy_side {
        None => true,
        Some(expected) => request_side.as_deref() == Some(expected.as_str()),
    }
}

/// Compiled policy
#[derive(Debug, Clone)]
pub struct Policy {
    pub id: PolicyId,
    pub name: String,
    pub org_id: Option<String>,
    pub client_id: Option<String>,
    pub effect: PolicyEffect,
    pub priority: i32,
    conditions: Option<Predicate>,
    resources: Vec<ResourceMatcher>,
    actions: Vec<GlobPattern>,
    subjects: Option<Predicate>,
    environment: Option<Predicate>,
    pub created_at: DateTime<Utc>,
}

impl Policy {
    /// Check the match predicate; returns the resource specificity on a match
    fn matches(&self, input: &AbacInput<'_>, views: &Views) -> Option<u8> {
        if !self.actions.is_empty() && !self.actions.iter().any(|a| a.matches(input.action)) {
            return None;
        }

        let specificity = if self.resources.is_empty() {
            0
        } else {
            self.resources
                .iter()
                .filter(|m| {
                    m.matches(
                        &input.resource.resource_type,
                        &input.resource.id,
                        &views.resource,
                    )
                })
                .map(ResourceMatcher::specificity)
                .max()?
        };

        if let Some(subjects) = &self.subjects {
            if !subjects.evaluate(&views.subject) {
                return None;
            }
        }

        if let Some(environment) = &self.environment {
            if !environment.evaluate(&views.environment) {
                return None;
            }
        }

        if let Some(conditions) = &self.conditions {
            if !conditions.evaluate(&views.context) {
                return None;
            }
        }

        Some(specificity)
    }
}

/// Inputs to ABAC evaluation
#[derive(Debug, Clone, Copy)]
pub struct AbacInput<'a> {
    pub subject: &'a Subject,
    pub resource: &'a ResourceRef,
    pub action: &'a str,
    pub environment: &'a Environment,
    pub stored: Option<&'a ResourceAttribute>,
}

struct Views {
    subject: Value,
    resource: Value,
    environment: Value,
    context: Value,
}

impl Views {
    fn build(input: &AbacInput<'_>) -> Self {
        let subject = input.subject.to_value();
        let environment = input.environment.to_value();

        let mut attributes: Map<String, Value> = input
            .resource
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut resource = Map::new();
        resource.insert("type".to_string(), json!(input.resource.resource_type));
        resource.insert("id".to_string(), json!(input.resource.id));

        // Stored attributes win over caller-supplied ones
        if let Some(stored) = input.stored {
            for (k, v) in &stored.attributes {
                attributes.insert(k.clone(), v.clone());
            }
            resource.insert("classification".to_string(), json!(stored.classification.as_str()));
            resource.insert("tags".to_string(), json!(stored.tags));
        } else if let Some(hint) = &input.environment.classification {
            resource.insert("classification".to_string(), json!(hint.as_str()));
        }
        resource.insert("attributes".to_string(), Value::Object(attributes));
        let resource = Value::Object(resource);

        let context = json!({
            "subject": subject,
            "resource": resource,
            "environment": environment,
            "action": input.action,
        });

        Self {
            subject,
            resource,
            environment,
            context,
        }
    }
}

/// A policy that matched a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyMatch {
    pub policy_id: PolicyId,
    pub name: String,
    pub effect: PolicyEffect,
    pub priority: i32,
    pub specificity: u8,
}

/// Combined ABAC result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbacOutcome {
    /// `None` when no policy matched
    pub effect: Option<PolicyEffect>,

    /// Policy that determined `effect`
    pub deciding: Option<PolicyMatch>,

    /// Every match, in evaluation order
    pub matches: Vec<PolicyMatch>,
}

impl AbacOutcome {
    /// Deny-override combination of an ordered match list
    ///
    /// Any deny wins regardless of priority. Among allows the highest
    /// priority wins, then the most specific resource match, then the
    /// earliest policy.
    pub fn from_matches(matches: Vec<PolicyMatch>) -> Self {
        let deny = matches
            .iter()
            .find(|m| m.effect == PolicyEffect::Deny)
            .cloned();

        let (effect, deciding) = match deny {
            Some(d) => (Some(PolicyEffect::Deny), Some(d)),
            None => {
                let mut best: Option<&PolicyMatch> = None;
                for candidate in matches.iter().filter(|m| m.effect == PolicyEffect::Allow) {
                    best = match best {
                        Some(b)
                            if (candidate.priority, candidate.specificity)
                                <= (b.priority, b.specificity) =>
                        {
                            Some(b)
                        }
                        _ => Some(candidate),
                    };
                }
                match best {
                    Some(b) => (Some(PolicyEffect::Allow), Some(b.clone())),
                    None => (None, None),
                }
            }
        };

        Self {
            effect,
            deciding,
            matches,
        }
    }

    pub fn matched_ids(&self) -> Vec<PolicyId> {
        self.matches.iter().map(|m| m.policy_id.clone()).collect()
    }
}

/// Compiled, ordered policy set for one scope
#[derive(Debug, Clone, Default)]
pub struct PolicyStore {
    policies: Vec<Policy>,
    skipped: Vec<(PolicyId, String)>,
}

impl PolicyStore {
    /// Compile records, skipping inactive and malformed ones
    pub fn from_records(records: &[PolicyRecord]) -> Self {
        let mut compiled: Vec<(usize, Policy)> = Vec::with_capacity(records.len());
        let mut skipped = Vec::new();

        for (index, record) in records.iter().enumerate() {
            if !record.is_active {
                debug!("Skipping inactive policy {}", record.id);
                continue;
            }
            match record.compile() {
                Ok(policy) => compiled.push((index, policy)),
                Err(e) => {
                    warn!("Skipping policy '{}' ({}): {}", record.name, record.id, e);
                    skipped.push((record.id.clone(), e.to_string()));
                }
            }
        }

        compiled.sort_by(|(ia, a), (ib, b)| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(ia.cmp(ib))
        });

        Self {
            policies: compiled.into_iter().map(|(_, p)| p).collect(),
            skipped,
        }
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Policies rejected at load time with the reason
    pub fn skipped(&self) -> &[(PolicyId, String)] {
        &self.skipped
    }

    /// All matching policies, priority descending then creation order
    pub fn evaluate_policies(&self, input: &AbacInput<'_>) -> Vec<PolicyMatch> {
        let scope = input.subject.scope();
        let views = Views::build(input);

        self.policies
            .iter()
            .filter(|p| {
                scope_matches(&p.org_id, &scope.org_id) && scope_matches(&p.client_id, &scope.client_id)
            })
            .filter_map(|p| {
                p.matches(input, &views).map(|specificity| PolicyMatch {
                    policy_id: p.id.clone(),
                    name: p.name.clone(),
                    effect: p.effect,
                    priority: p.priority,
                    specificity,
                })
            })
            .collect()
    }

    /// Evaluate and combine under deny-override
    pub fn evaluate(&self, input: &AbacInput<'_>) -> AbacOutcome {
        AbacOutcome::from_matches(self.evaluate_policies(input))
    }
}

fn default_true() -> bool {
    true
}
