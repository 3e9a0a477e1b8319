//! Data-driven predicate trees for ABAC policies
//!
//! A [`Condition`] is the stored (JSON) form of a predicate. It is compiled
//! once at load time into a [`Predicate`], which is evaluated by a pure
//! function over a JSON attribute document. Nothing here executes code.
//!
//! ```json
//! { "op": "and", "all": [
//!     { "op": "compare", "attr": "department", "cmp": "eq", "value": "finance" },
//!     { "op": "not", "not": { "op": "compare", "attr": "suspended", "cmp": "exists", "value": true } }
//! ] }
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::error::{AuthzError, Result};

/// Nesting limit for condition trees
pub const MAX_CONDITION_DEPTH: usize = 32;

/// Comparison operator of a leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Ne,
    In,
    NotIn,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Regex,
    Exists,
}

/// Stored predicate tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    And { all: Vec<Condition> },
    Or { any: Vec<Condition> },
    Not { not: Box<Condition> },
    Compare { attr: String, cmp: Comparator, value: Value },
}

impl Condition {
    pub fn and(all: Vec<Condition>) -> Self {
        Condition::And { all }
    }

    pub fn or(any: Vec<Condition>) -> Self {
        Condition::Or { any }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Condition) -> Self {
        Condition::Not { not: Box::new(inner) }
    }

    pub fn compare(attr: impl Into<String>, cmp: Comparator, value: impl Into<Value>) -> Self {
        Condition::Compare {
            attr: attr.into(),
            cmp,
            value: value.into(),
        }
    }

    pub fn equals(attr: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attr, Comparator::Eq, value)
    }

    /// Parse a stored JSON condition; `null` and `{}` mean "no condition"
    pub fn from_json(value: &Value) -> Result<Option<Condition>> {
        match value {
            Value::Null => Ok(None),
            Value::Object(map) if map.is_empty() => Ok(None),
            other => serde_json::from_value(other.clone())
                .map(Some)
                .map_err(|e| AuthzError::Config(format!("malformed condition: {}", e))),
        }
    }

    /// Validate and compile into an evaluable predicate
    pub fn compile(&self) -> Result<Predicate> {
        self.compile_at(0)
    }

    fn compile_at(&self, depth: usize) -> Result<Predicate> {
        if depth > MAX_CONDITION_DEPTH {
            return Err(AuthzError::Config(format!(
                "condition nesting exceeds {}",
                MAX_CONDITION_DEPTH
            )));
        }

        match self {
            Condition::And { all } => Ok(Predicate::And(
                all.iter()
                    .map(|c| c.compile_at(depth + 1))
                    .collect::<Result<_>>()?,
            )),
            Condition::Or { any } => {
                if any.is_empty() {
                    return Err(AuthzError::Config("'or' requires at least one branch".into()));
                }
                Ok(Predicate::Or(
                    any.iter()
                        .map(|c| c.compile_at(depth + 1))
                        .collect::<Result<_>>()?,
                ))
            }
            Condition::Not { not } => Ok(Predicate::Not(Box::new(not.compile_at(depth + 1)?))),
            Condition::Compare { attr, cmp, value } => {
                if attr.trim().is_empty() {
                    return Err(AuthzError::Config("comparison with empty attribute path".into()));
                }
                let op = compile_op(*cmp, value)?;
                Ok(Predicate::Leaf {
                    path: attr.split('.').map(str::to_string).collect(),
                    op,
                })
            }
        }
    }
}

/// Compiled leaf operator
#[derive(Debug, Clone)]
pub enum LeafOp {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Ordered(Comparator, Value),
    Contains(Value),
    Regex(Regex),
    Exists(bool),
}

fn compile_op(cmp: Comparator, value: &Value) -> Result<LeafOp> {
    let op = match cmp {
        Comparator::Eq => LeafOp::Eq(value.clone()),
        Comparator::Ne => LeafOp::Ne(value.clone()),
        Comparator::In | Comparator::NotIn => {
            let Value::Array(items) = value else {
                return Err(AuthzError::Config(format!("'{:?}' expects an array", cmp)));
            };
            if cmp == Comparator::In {
                LeafOp::In(items.clone())
            } else {
                LeafOp::NotIn(items.clone())
            }
        }
        Comparator::Gt | Comparator::Gte | Comparator::Lt | Comparator::Lte => {
            if !(value.is_number() || value.is_string()) {
                return Err(AuthzError::Config(format!(
                    "'{:?}' expects a number or string",
                    cmp
                )));
            }
            LeafOp::Ordered(cmp, value.clone())
        }
        Comparator::Contains => LeafOp::Contains(value.clone()),
        Comparator::Regex => {
            let Some(pattern) = value.as_str() else {
                return Err(AuthzError::Config("'regex' expects a string pattern".into()));
            };
            let regex = Regex::new(pattern)
                .map_err(|e| AuthzError::Config(format!("invalid regex '{}': {}", pattern, e)))?;
            LeafOp::Regex(regex)
        }
        Comparator::Exists => {
            let Some(flag) = value.as_bool() else {
                return Err(AuthzError::Config("'exists' expects a boolean".into()));
            };
            LeafOp::Exists(flag)
        }
    };
    Ok(op)
}

/// Compiled predicate tree
#[derive(Debug, Clone)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Leaf { path: Vec<String>, op: LeafOp },
}

impl Predicate {
    /// Evaluate against an attribute document
    pub fn evaluate(&self, attributes: &Value) -> bool {
        match self {
            Predicate::And(all) => all.iter().all(|p| p.evaluate(attributes)),
            Predicate::Or(any) => any.iter().any(|p| p.evaluate(attributes)),
            Predicate::Not(inner) => !inner.evaluate(attributes),
            Predicate::Leaf { path, op } => evaluate_leaf(op, lookup(attributes, path)),
        }
    }
}

/// Resolve a dotted path inside a JSON document
pub fn lookup<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(root, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn evaluate_leaf(op: &LeafOp, actual: Option<&Value>) -> bool {
    match op {
        LeafOp::Exists(expected) => actual.map_or(false, |v| !v.is_null()) == *expected,
        LeafOp::Eq(expected) => actual.map_or(false, |v| values_equal(v, expected)),
        LeafOp::Ne(expected) => !actual.map_or(false, |v| values_equal(v, expected)),
        LeafOp::In(items) => actual.map_or(false, |v| items.iter().any(|i| values_equal(v, i))),
        LeafOp::NotIn(items) => !actual.map_or(false, |v| items.iter().any(|i| values_equal(v, i))),
        LeafOp::Ordered(cmp, expected) => {
            let Some(ordering) = actual.and_then(|v| compare_values(v, expected)) else {
                return false;
            };
            match cmp {
                Comparator::Gt => ordering == Ordering::Greater,
                Comparator::Gte => ordering != Ordering::Less,
                Comparator::Lt => ordering == Ordering::Less,
                Comparator::Lte => ordering != Ordering::Greater,
                _ => false,
            }
        }
        LeafOp::Contains(expected) => match actual {
            Some(Value::Array(items)) => items.iter().any(|i| values_equal(i, expected)),
            Some(Value::String(s)) => expected.as_str().map_or(false, |e| s.contains(e)),
            _ => false,
        },
        LeafOp::Regex(regex) => actual
            .and_then(Value::as_str)
            .map_or(false, |s| regex.is_match(s)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
