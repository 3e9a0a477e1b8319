//! Role-based access control
//!
//! Roles map to permissions through `role_permissions`. A permission's
//! identity is its [`PermissionKey`], which carries the owning client as a
//! prefix so that two clients can define the same permission name without
//! colliding.

mod resolver;

pub use resolver::RoleResolver;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Permission;

/// Client-namespaced permission identity
///
/// `"{client_id}:{name}"` for client-scoped permissions, the bare name for
/// global ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionKey(String);

impl PermissionKey {
    /// Key of a stored permission
    pub fn of(permission: &Permission) -> Self {
        Self::scoped(permission.client_id.as_deref(), &permission.name)
    }

    pub fn scoped(client_id: Option<&str>, name: &str) -> Self {
        match client_id {
            Some(client) => Self(format!("{}:{}", client, name)),
            None => Self(name.to_string()),
        }
    }

    pub fn global(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
