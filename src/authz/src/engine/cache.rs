//! Decision cache keyed by a scope-versioned fingerprint
//!
//! Keys are BLAKE3 digests over the request identity and the version stamp
//! of its scope. Bumping a scope version changes every key computed for
//! that scope, so stale entries are never hit again and simply age out.

use blake3::Hasher;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::decision::Decision;
use crate::config::CacheConfig;
use crate::error::{AuthzError, Result};
use crate::store::VersionStamp;
use crate::types::AccessRequest;

/// 32-byte BLAKE3 fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Fingerprint of a request under a version stamp
    pub fn compute(request: &AccessRequest, stamp: &VersionStamp) -> Self {
        let mut hasher = Hasher::new();

        // Length-prefix every field so adjacent values cannot run together
        let mut field = |bytes: &[u8]| {
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };

        field(request.subject.id.as_bytes());

        let mut roles = request.subject.roles.clone();
        roles.sort();
        roles.dedup();
        for role in &roles {
            field(role.as_bytes());
        }
        field(b"|");

        field(request.subject.org_id.as_deref().unwrap_or("").as_bytes());
        field(request.subject.client_id.as_deref().unwrap_or("").as_bytes());
        field(request.resource.resource_type.as_bytes());
        field(request.resource.id.as_bytes());
        field(request.action.as_bytes());

        field(canonical(&request.subject.attributes).as_bytes());
        field(canonical(&request.resource.attributes).as_bytes());
        field(request.environment.to_value().to_string().as_bytes());

        let options = request.options;
        field(&[
            options.require_all as u8,
            options.skip_rbac as u8,
            options.skip_abac as u8,
            options.skip_rebac as u8,
        ]);

        field(&stamp.global.to_le_bytes());
        field(&stamp.org.to_le_bytes());
        field(&stamp.client.to_le_bytes());

        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Attribute maps serialized with sorted keys
fn canonical(attributes: &HashMap<String, Value>) -> String {
    let sorted: std::collections::BTreeMap<&String, &Value> = attributes.iter().collect();
    serde_json::to_string(&sorted).unwrap_or_default()
}

/// Selects entries to drop in [`DecisionCache::clear_cache`]
///
/// Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeFilter {
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub subject_id: Option<String>,
}

impl ScopeFilter {
    pub fn org(org_id: impl Into<String>) -> Self {
        Self {
            org_id: Some(org_id.into()),
            ..Self::default()
        }
    }

    pub fn client(client_id: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            ..Self::default()
        }
    }

    pub fn subject(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: Some(subject_id.into()),
            ..Self::default()
        }
    }

    fn matches(&self, entry: &CachedEntry) -> bool {
        let hit = |want: &Option<String>, have: &Option<String>| want.is_none() || want == have;
        hit(&self.org_id, &entry.org_id)
            && hit(&self.client_id, &entry.client_id)
            && self
                .subject_id
                .as_ref()
                .map_or(true, |s| *s == entry.subject_id)
    }
}

/// Cached entry with TTL and integrity digest
#[derive(Clone)]
struct CachedEntry {
    decision: Decision,
    digest: [u8; 32],
    cached_at: Instant,
    ttl: Duration,
    org_id: Option<String>,
    client_id: Option<String>,
    subject_id: String,
}

impl CachedEntry {
    fn new(request: &AccessRequest, decision: Decision, ttl: Duration) -> Self {
        Self {
            digest: digest(&decision),
            decision,
            cached_at: Instant::now(),
            ttl,
            org_id: request.subject.org_id.clone(),
            client_id: request.subject.client_id.clone(),
            subject_id: request.subject.id.clone(),
        }
    }

    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

fn digest(decision: &Decision) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(decision.decision_id.as_bytes());
    hasher.update(&[decision.allowed as u8, decision.degraded as u8]);
    hasher.update(decision.reason.to_string().as_bytes());
    for id in &decision.matched_policy_ids {
        hasher.update(id.as_bytes());
    }
    *hasher.finalize().as_bytes()
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
    pub hit_rate: f64,
}

/// Concurrent decision cache
///
/// Backed by a sharded `DashMap`; hit/miss counters are atomics.
pub struct DecisionCache {
    entries: DashMap<CacheKey, CachedEntry>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
}

impl DecisionCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::with_capacity(config.capacity.min(65_536)),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get a cached decision
    ///
    /// An entry whose digest no longer matches its decision is removed and
    /// reported as [`AuthzError::Cache`].
    pub fn get(&self, key: &CacheKey) -> Result<Option<Decision>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }

            if digest(&entry.decision) != entry.digest {
                drop(entry);
                self.entries.remove(key);
                warn!("Dropped corrupt decision cache entry");
                return Err(AuthzError::Cache("entry failed integrity check".into()));
            }

            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(entry.decision.clone()));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    /// Store a decision; `ttl` defaults to the configured TTL
    pub fn put(&self, key: CacheKey, request: &AccessRequest, decision: Decision, ttl: Option<Duration>) {
        if self.entries.len() >= self.config.capacity {
            self.evict();
        }

        let ttl = ttl.unwrap_or_else(|| self.config.ttl());
        self.entries.insert(key, CachedEntry::new(request, decision, ttl));
    }

    /// Drop expired entries, then the oldest tenth if still full
    fn evict(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let expired = before.saturating_sub(self.entries.len());
        self.expirations.fetch_add(expired as u64, Ordering::Relaxed);

        if self.entries.len() < self.config.capacity {
            return;
        }

        let to_remove = (self.config.capacity / 10).max(1);
        let mut ages: Vec<(CacheKey, Instant)> = self
            .entries
            .iter()
            .map(|e| (*e.key(), e.value().cached_at))
            .collect();
        ages.sort_by_key(|(_, at)| *at);

        for (key, _) in ages.into_iter().take(to_remove) {
            self.entries.remove(&key);
        }
        self.evictions.fetch_add(to_remove as u64, Ordering::Relaxed);
        debug!("Evicted {} decision cache entries", to_remove);
    }

    /// Remove entries matching `filter`, or everything when `None`
    ///
    /// Returns the number of entries removed.
    pub fn clear_cache(&self, filter: Option<&ScopeFilter>) -> usize {
        let before = self.entries.len();
        match filter {
            None => self.entries.clear(),
            Some(filter) => self.entries.retain(|_, entry| !filter.matches(entry)),
        }
        before.saturating_sub(self.entries.len())
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            expirations: self.expirations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.entries.len(),
            capacity: self.config.capacity,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt(&self, key: &CacheKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.decision.allowed = !entry.decision.allowed;
        }
    }
}
