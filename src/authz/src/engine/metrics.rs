//! Decision metrics with Prometheus text export

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Point-in-time metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub total_requests: u64,
    pub allowed_decisions: u64,
    pub denied_decisions: u64,

    /// Deadline or cancellation denies (also counted in `denied_decisions`)
    pub degraded_decisions: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,

    /// Checks that surfaced `StoreUnavailable`
    pub store_errors: u64,

    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub avg_latency_ms: f64,
}

impl EngineMetrics {
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed_decisions + self.denied_decisions;
        if total == 0 {
            0.0
        } else {
            self.allowed_decisions as f64 / total as f64
        }
    }
}

/// Lock-free counters plus a bounded window of latency samples
pub struct MetricsCollector {
    total_requests: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    degraded: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    store_errors: AtomicU64,
    latency_samples: Mutex<VecDeque<f64>>,
    max_samples: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(10_000)
    }

    pub fn with_window(max_samples: usize) -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            allowed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            degraded: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            latency_samples: Mutex::new(VecDeque::with_capacity(max_samples.min(10_000))),
            max_samples: max_samples.max(1),
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision(&self, allowed: bool, degraded: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
        }
        if degraded {
            self.degraded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_store_error(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency: Duration) {
        let mut samples = self.latency_samples.lock();
        if samples.len() == self.max_samples {
            samples.pop_front();
        }
        samples.push_back(latency.as_secs_f64() * 1000.0);
    }

    pub fn get_metrics(&self) -> EngineMetrics {
        let mut sorted: Vec<f64> = self.latency_samples.lock().iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let avg = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        };

        EngineMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            allowed_decisions: self.allowed.load(Ordering::Relaxed),
            denied_decisions: self.denied.load(Ordering::Relaxed),
            degraded_decisions: self.degraded.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            latency_p50_ms: percentile(&sorted, 0.50),
            latency_p95_ms: percentile(&sorted, 0.95),
            latency_p99_ms: percentile(&sorted, 0.99),
            avg_latency_ms: avg,
        }
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let metrics = self.get_metrics();

        format!(
            r#"# HELP authz_requests_total Total number of authorization requests
# TYPE authz_requests_total counter
authz_requests_total {}

# HELP authz_allowed_total Number of allowed decisions
# TYPE authz_allowed_total counter
authz_allowed_total {}

# HELP authz_denied_total Number of denied decisions
# TYPE authz_denied_total counter
authz_denied_total {}

# HELP authz_degraded_total Denies caused by deadline expiry or cancellation
# TYPE authz_degraded_total counter
authz_degraded_total {}

# HELP authz_cache_hits_total Cache hits
# TYPE authz_cache_hits_total counter
authz_cache_hits_total {}

# HELP authz_cache_misses_total Cache misses
# TYPE authz_cache_misses_total counter
authz_cache_misses_total {}

# HELP authz_store_errors_total Checks failed with the data store unavailable
# TYPE authz_store_errors_total counter
authz_store_errors_total {}

# HELP authz_latency_seconds Request latency percentiles
# TYPE authz_latency_seconds summary
authz_latency_seconds{{quantile="0.5"}} {}
authz_latency_seconds{{quantile="0.95"}} {}
authz_latency_seconds{{quantile="0.99"}} {}
"#,
            metrics.total_requests,
            metrics.allowed_decisions,
            metrics.denied_decisions,
            metrics.degraded_decisions,
            metrics.cache_hits,
            metrics.cache_misses,
            metrics.store_errors,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p95_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
        )
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64) * p) as usize;
    sorted[idx.min(sorted.len() - 1)]
}
