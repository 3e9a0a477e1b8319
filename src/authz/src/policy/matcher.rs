//! Resource and action matchers for ABAC policies

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::condition::{Condition, Predicate};
use crate::error::{AuthzError, Result};

/// Glob pattern supporting `*` (any run) and `?` (one character)
#[derive(Debug, Clone)]
pub struct GlobPattern {
    raw: String,
    regex: Option<Regex>,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(AuthzError::Config("empty pattern".into()));
        }

        let regex = if pattern.contains('*') || pattern.contains('?') {
            let escaped = regex::escape(pattern)
                .replace(r"\*", ".*")
                .replace(r"\?", ".");
            let regex = Regex::new(&format!("^{}$", escaped))
                .map_err(|e| AuthzError::Config(format!("invalid pattern '{}': {}", pattern, e)))?;
            Some(regex)
        } else {
            None
        };

        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, value: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(value),
            None => self.raw == value,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.regex.is_some()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Stored form of a resource matcher
///
/// A bare string is a pattern over the resource type or its qualified id
/// (`"document"`, `"document:42"`, `"invoice:*"`). An object matches on the
/// resource's stored attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceMatcherSpec {
    Pattern(String),
    Attributes {
        #[serde(default, rename = "type")]
        resource_type: Option<String>,
        #[serde(rename = "where")]
        condition: Condition,
    },
}

impl ResourceMatcherSpec {
    pub fn compile(&self) -> Result<ResourceMatcher> {
        match self {
            ResourceMatcherSpec::Pattern(p) => Ok(ResourceMatcher::Pattern(GlobPattern::new(p)?)),
            ResourceMatcherSpec::Attributes {
                resource_type,
                condition,
            } => Ok(ResourceMatcher::Attributes {
                resource_type: resource_type.as_deref().map(GlobPattern::new).transpose()?,
                predicate: condition.compile()?,
            }),
        }
    }
}

/// Compiled resource matcher
#[derive(Debug, Clone)]
pub enum ResourceMatcher {
    Pattern(GlobPattern),
    Attributes {
        resource_type: Option<GlobPattern>,
        predicate: Predicate,
    },
}

impl ResourceMatcher {
    /// Match against a resource view built by the policy store
    /// (`{"type", "id", "classification", "tags", "attributes"}`)
    pub fn matches(&self, resource_type: &str, resource_id: &str, view: &Value) -> bool {
        match self {
            ResourceMatcher::Pattern(pattern) => {
                pattern.matches(resource_type)
                    || pattern.matches(&format!("{}:{}", resource_type, resource_id))
            }
            ResourceMatcher::Attributes {
                resource_type: type_pattern,
                predicate,
            } => {
                type_pattern
                    .as_ref()
                    .map_or(true, |p| p.matches(resource_type))
                    && predicate.evaluate(view)
            }
        }
    }

    /// How narrowly this matcher selects resources
    ///
    /// 3 = exact resource id, 2 = exact type or attribute predicate,
    /// 1 = wildcard pattern.
    pub fn specificity(&self) -> u8 {
        match self {
            ResourceMatcher::Pattern(p) if p.is_wildcard() => 1,
            ResourceMatcher::Pattern(p) if p.as_str().contains(':') => 3,
            ResourceMatcher::Pattern(_) => 2,
            ResourceMatcher::Attributes { .. } => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_glob_pattern() {
        let star = GlobPattern::new("*").unwrap();
        assert!(star.matches("anything"));

        let prefix = GlobPattern::new("invoice:*").unwrap();
        assert!(prefix.matches("invoice:42"));
        assert!(!prefix.matches("document:42"));

        let single = GlobPattern::new("v?").unwrap();
        assert!(single.matches("v1"));
        assert!(!single.matches("v10"));

        let dotted = GlobPattern::new("a.b").unwrap();
        assert!(dotted.matches("a.b"));
        assert!(!dotted.matches("axb"));
    }

    #[test]
    fn test_pattern_matches_type_or_qualified_id() {
        let by_type = ResourceMatcherSpec::Pattern("document".into()).compile().unwrap();
        assert!(by_type.matches("document", "1", &json!({})));
        assert!(!by_type.matches("invoice", "1", &json!({})));

        let by_id = ResourceMatcherSpec::Pattern("document:1".into()).compile().unwrap();
        assert!(by_id.matches("document", "1", &json!({})));
        assert!(!by_id.matches("document", "2", &json!({})));
        assert_eq!(by_id.specificity(), 3);
    }

    #[test]
    fn test_attribute_matcher() {
        let spec: ResourceMatcherSpec = serde_json::from_value(json!({
            "type": "document",
            "where": { "op": "compare", "attr": "classification", "cmp": "eq", "value": "restricted" }
        }))
        .unwrap();
        let matcher = spec.compile().unwrap();

        assert!(matcher.matches("document", "1", &json!({ "classification": "restricted" })));
        assert!(!matcher.matches("document", "1", &json!({ "classification": "public" })));
        assert!(!matcher.matches("invoice", "1", &json!({ "classification": "restricted" })));
    }
}
