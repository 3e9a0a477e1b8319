//! Action to relation rules for ReBAC

use serde::{Deserialize, Serialize};

/// Relations that grant `action` on resources of `resource_type`
///
/// `resource_type` may be `"*"` to apply to every type and `action` may be
/// `"*"` to apply to every action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRule {
    pub resource_type: String,
    pub action: String,
    pub relations: Vec<String>,
}

impl RelationRule {
    pub fn new<I, S>(resource_type: &str, action: &str, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resource_type: resource_type.to_string(),
            action: action.to_string(),
            relations: relations.into_iter().map(Into::into).collect(),
        }
    }
}

/// Rule table consulted before running ReBAC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRules {
    #[serde(default)]
    pub rules: Vec<RelationRule>,

    /// Relation granting every action a rule exists for
    #[serde(default)]
    pub owner_relation: Option<String>,
}

impl Default for RelationRules {
    fn default() -> Self {
        Self {
            rules: vec![
                RelationRule::new("*", "read", ["can_view"]),
                RelationRule::new("*", "update", ["can_edit"]),
                RelationRule::new("*", "delete", ["can_delete"]),
                RelationRule::new("*", "manage", ["can_manage"]),
                // user -member-> org -owns-> resource, user -has_role-> role -can_access-> resource
                RelationRule::new("*", "*", ["owns", "can_access"]),
            ],
            owner_relation: Some("owner".to_string()),
        }
    }
}

impl RelationRules {
    /// Empty table; ReBAC never runs
    pub fn none() -> Self {
        Self {
            rules: Vec::new(),
            owner_relation: None,
        }
    }

    pub fn with_rule(mut self, rule: RelationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Relations to check for a resource type and action
    ///
    /// Rules for the exact type take precedence over `"*"` rules. Returns
    /// `None` when no rule is declared.
    pub fn relations_for(&self, resource_type: &str, action: &str) -> Option<Vec<String>> {
        let pick = |ty: &str| -> Vec<&RelationRule> {
            self.rules
                .iter()
                .filter(|r| r.resource_type == ty && (r.action == action || r.action == "*"))
                .collect()
        };

        let mut matched = pick(resource_type);
        if matched.is_empty() {
            matched = pick("*");
        }
        if matched.is_empty() {
            return None;
        }

        let mut relations: Vec<String> = Vec::new();
        for relation in matched.iter().flat_map(|r| r.relations.iter()) {
            if !relations.contains(relation) {
                relations.push(relation.clone());
            }
        }
        if let Some(owner) = &self.owner_relation {
            if !relations.contains(owner) {
                relations.push(owner.clone());
            }
        }
        Some(relations)
    }
}
