//! Engine configuration loading and validation

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AuthzError, Result};
use crate::graph::{RelationRules, DEFAULT_MAX_DEPTH};

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Deadline applied when the caller supplies none
    #[serde(default)]
    pub default_deadline_ms: Option<u64>,

    #[serde(default = "default_true")]
    pub audit_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GraphConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_transitive_relations")]
    pub transitive_relations: Vec<String>,
    #[serde(default)]
    pub rules: RelationRules,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RefreshConfig {
    /// Snapshot age after which it is reloaded
    #[serde(default = "default_refresh_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            graph: GraphConfig::default(),
            refresh: RefreshConfig::default(),
            default_deadline_ms: None,
            audit_enabled: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            transitive_relations: default_transitive_relations(),
            rules: RelationRules::default(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_refresh_interval(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_cache_capacity() -> usize { 10_000 }
fn default_cache_ttl() -> u64 { 60 }
fn default_max_depth() -> usize { DEFAULT_MAX_DEPTH }
fn default_refresh_interval() -> u64 { 30 }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff_ms() -> u64 { 50 }

fn default_transitive_relations() -> Vec<String> {
    vec![
        "member_of".to_string(),
        "member".to_string(),
        "part_of".to_string(),
        "has_role".to_string(),
    ]
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl EngineConfig {
    /// Load from a TOML file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;

        let mut config: EngineConfig = toml::from_str(&contents)
            .map_err(|e| AuthzError::Config(format!("Failed to parse configuration file: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AUTHZ_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| AuthzError::InvalidInput(format!("{} has invalid value '{}'", key, raw)))
        }

        if let Some(raw) = lookup("AUTHZ_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse("AUTHZ_CACHE_TTL_SECS", raw)?;
        }
        if let Some(raw) = lookup("AUTHZ_MAX_DEPTH") {
            self.graph.max_depth = parse("AUTHZ_MAX_DEPTH", raw)?;
        }
        if let Some(raw) = lookup("AUTHZ_DEADLINE_MS") {
            self.default_deadline_ms = Some(parse("AUTHZ_DEADLINE_MS", raw)?);
        }
        if let Some(raw) = lookup("AUTHZ_REFRESH_SECS") {
            self.refresh.interval_secs = parse("AUTHZ_REFRESH_SECS", raw)?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.enabled {
            if self.cache.capacity == 0 {
                return Err(AuthzError::Config("cache capacity must be positive".into()));
            }
            if self.cache.ttl_secs == 0 {
                return Err(AuthzError::Config("cache TTL must be positive".into()));
            }
        }

        if self.graph.max_depth == 0 || self.graph.max_depth > 64 {
            return Err(AuthzError::Config(
                "graph max_depth must be between 1 and 64".into(),
            ));
        }

        if self.graph.transitive_relations.iter().any(|r| r.is_empty()) {
            return Err(AuthzError::Config("empty transitive relation name".into()));
        }

        if self.refresh.max_attempts == 0 {
            return Err(AuthzError::Config("refresh max_attempts must be at least 1".into()));
        }

        if self.refresh.interval_secs == 0 {
            return Err(AuthzError::Config("refresh interval must be positive".into()));
        }

        if self.default_deadline_ms == Some(0) {
            return Err(AuthzError::Config("default deadline must be positive".into()));
        }

        Ok(())
    }

    pub fn default_deadline(&self) -> Option<Duration> {
        self.default_deadline_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.graph.max_depth, 5);
        assert_eq!(config.cache.ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
default_deadline_ms = 250

[cache]
ttl_secs = 5

[graph]
max_depth = 3
transitive_relations = ["member_of"]
"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.cache.ttl_secs, 5);
        assert_eq!(config.cache.capacity, 10_000);
        assert_eq!(config.graph.max_depth, 3);
        assert_eq!(config.graph.transitive_relations, vec!["member_of"]);
        assert_eq!(config.default_deadline(), Some(Duration::from_millis(250)));
        assert!(config.audit_enabled);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [("AUTHZ_MAX_DEPTH", "8"), ("AUTHZ_CACHE_TTL_SECS", "1")]
            .into_iter()
            .collect();

        let mut config = EngineConfig::default();
        config
            .apply_overrides_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.graph.max_depth, 8);
        assert_eq!(config.cache.ttl_secs, 1);
    }

    #[test]
    fn test_bad_override_rejected() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides_from(|k| (k == "AUTHZ_MAX_DEPTH").then(|| "deep".to_string()))
            .unwrap_err();
        assert!(matches!(err, AuthzError::InvalidInput(_)));
    }

    #[test]
    fn test_validate_rejects_zero_depth() {
        let mut config = EngineConfig::default();
        config.graph.max_depth = 0;
        assert!(config.validate().is_err());
    }
}
