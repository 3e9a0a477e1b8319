//! Error types for the authorization engine

use thiserror::Error;

/// Authorization engine errors
///
/// Only [`AuthzError::StoreUnavailable`] is surfaced to callers of
/// `check_access`; every other variant is folded into a fail-closed deny.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Malformed policy, condition tree or configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown subject, resource or entity reference
    #[error("Not found: {0}")]
    NotFound(String),

    /// Relationship traversal hit its depth cap
    #[error("Traversal depth {0} exceeded")]
    DepthExceeded(usize),

    /// Decision cache unavailable or holding a corrupt entry
    #[error("Cache error: {0}")]
    Cache(String),

    /// Backing data store unreachable after retries
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Whether a data-source load that failed with this error may be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthzError::Database(_) | AuthzError::Io(_) | AuthzError::StoreUnavailable(_))
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
