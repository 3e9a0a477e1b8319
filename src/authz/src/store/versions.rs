//! Scope version counters
//!
//! Every mutation to roles, permissions, policies or relationships within a
//! scope bumps that scope's counter. The counters are folded into decision
//! cache keys and snapshot stamps, so a bump invalidates both without any
//! scan of the cache.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::ScopeKey;

/// Scope whose data changed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "lowercase")]
pub enum VersionScope {
    /// System roles, global permissions and org-less policies or edges
    Global,
    Org(String),
    Client(String),
}

impl fmt::Display for VersionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionScope::Global => f.write_str("global"),
            VersionScope::Org(id) => write!(f, "org:{}", id),
            VersionScope::Client(id) => write!(f, "client:{}", id),
        }
    }
}

/// Versions relevant to one request scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionStamp {
    pub global: u64,
    pub org: u64,
    pub client: u64,
}

/// Registry of scope versions
#[derive(Debug, Default)]
pub struct ScopeVersions {
    global: AtomicU64,
    orgs: DashMap<String, u64>,
    clients: DashMap<String, u64>,
}

impl ScopeVersions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a scope's version, returning the new value
    pub fn bump(&self, scope: &VersionScope) -> u64 {
        match scope {
            VersionScope::Global => self.global.fetch_add(1, Ordering::SeqCst) + 1,
            VersionScope::Org(id) => Self::bump_in(&self.orgs, id),
            VersionScope::Client(id) => Self::bump_in(&self.clients, id),
        }
    }

    fn bump_in(map: &DashMap<String, u64>, id: &str) -> u64 {
        let mut entry = map.entry(id.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn current(&self, scope: &VersionScope) -> u64 {
        match scope {
            VersionScope::Global => self.global.load(Ordering::SeqCst),
            VersionScope::Org(id) => self.orgs.get(id).map(|v| *v).unwrap_or(0),
            VersionScope::Client(id) => self.clients.get(id).map(|v| *v).unwrap_or(0),
        }
    }

    /// Stamp for a request scope
    pub fn stamp(&self, scope: &ScopeKey) -> VersionStamp {
        VersionStamp {
            global: self.current(&VersionScope::Global),
            org: scope
                .org_id
                .as_ref()
                .map(|id| self.current(&VersionScope::Org(id.clone())))
                .unwrap_or(0),
            client: scope
                .client_id
                .as_ref()
                .map(|id| self.current(&VersionScope::Client(id.clone())))
                .unwrap_or(0),
        }
    }
}
