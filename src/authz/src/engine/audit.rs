//! Audit emission for authorization decisions
//!
//! The engine does not persist audit logs. Each computed decision is turned
//! into an [`AuditRecord`] and handed to an [`AuditEmitter`]; durable storage
//! is the emitter's concern. Emission failures are logged and never change
//! the decision.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::decision::Decision;
use crate::error::{AuthzError, Result};
use crate::types::AccessRequest;

/// Keys whose values are redacted from audit details
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "secret",
    "token",
    "access_token",
    "refresh_token",
    "api_key",
    "authorization",
    "cookie",
    "private_key",
];

const REDACTED: &str = "[REDACTED]";

/// Audit record handed to the emitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub org_id: Option<String>,
    pub user_id: String,
    pub client_id: Option<String>,
    pub action: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,

    /// Deadline or cancellation deny, distinct from a normal deny
    pub degraded: bool,
}

impl AuditRecord {
    pub fn from_decision(request: &AccessRequest, decision: &Decision) -> Self {
        let details = json!({
            "decision_id": decision.decision_id,
            "allowed": decision.allowed,
            "reason": decision.reason,
            "resource": {
                "type": request.resource.resource_type,
                "id": request.resource.id,
            },
            "matched_policy_ids": decision.matched_policy_ids,
            "rule_trace": decision.rule_trace,
            "environment": request.environment.to_value(),
        });

        Self {
            org_id: request.subject.org_id.clone(),
            user_id: request.subject.id.clone(),
            client_id: request.subject.client_id.clone(),
            action: if decision.degraded {
                format!("authz.check.degraded:{}", request.action)
            } else {
                format!("authz.check:{}", request.action)
            },
            details: sanitize(details),
            created_at: decision.timestamp,
            degraded: decision.degraded,
        }
    }
}

/// Redact sensitive keys at any depth
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let lowered = k.to_ascii_lowercase();
                    if SENSITIVE_KEYS.iter().any(|s| lowered.contains(s)) {
                        (k, Value::String(REDACTED.to_string()))
                    } else {
                        (k, sanitize(v))
                    }
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        other => other,
    }
}

/// Sink for audit records
#[async_trait]
pub trait AuditEmitter: Send + Sync {
    async fn emit(&self, record: AuditRecord) -> Result<()>;
}

/// Writes audit records as structured log events on `authz::audit`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditEmitter;

#[async_trait]
impl AuditEmitter for TracingAuditEmitter {
    async fn emit(&self, record: AuditRecord) -> Result<()> {
        if record.degraded {
            warn!(
                target: "authz::audit",
                user_id = %record.user_id,
                org_id = record.org_id.as_deref().unwrap_or("-"),
                client_id = record.client_id.as_deref().unwrap_or("-"),
                action = %record.action,
                details = %record.details,
                "degraded authorization decision"
            );
        } else {
            info!(
                target: "authz::audit",
                user_id = %record.user_id,
                org_id = record.org_id.as_deref().unwrap_or("-"),
                client_id = record.client_id.as_deref().unwrap_or("-"),
                action = %record.action,
                details = %record.details,
                "authorization decision"
            );
        }
        Ok(())
    }
}

/// Keeps records in memory, newest last
#[derive(Debug)]
pub struct MemoryAuditEmitter {
    records: Mutex<Vec<AuditRecord>>,
    max_records: usize,
}

impl MemoryAuditEmitter {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(max_records: usize) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            max_records: max_records.max(1),
        }
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Records for one user, newest first
    pub fn query_by_user(&self, user_id: &str, limit: usize) -> Vec<AuditRecord> {
        self.records
            .lock()
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for MemoryAuditEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditEmitter for MemoryAuditEmitter {
    async fn emit(&self, record: AuditRecord) -> Result<()> {
        let mut records = self.records.lock();
        records.push(record);

        if records.len() > self.max_records {
            let overflow = records.len() - self.max_records;
            records.drain(0..overflow);
        }
        Ok(())
    }
}

/// Forwards records to a bounded channel consumed by a durable writer
#[derive(Debug, Clone)]
pub struct ChannelAuditEmitter {
    sender: mpsc::Sender<AuditRecord>,
}

impl ChannelAuditEmitter {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditRecord>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl AuditEmitter for ChannelAuditEmitter {
    async fn emit(&self, record: AuditRecord) -> Result<()> {
        self.sender
            .try_send(record)
            .map_err(|e| AuthzError::Internal(format!("audit channel: {}", e)))
    }
}
