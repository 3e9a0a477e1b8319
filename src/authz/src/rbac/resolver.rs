//! Effective permission resolution
//!
//! The resolver is built once per snapshot from the role, permission and
//! role-permission tables of a scope. Resolution is a pure lookup over
//! those indices; it never touches the data source.

use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use super::PermissionKey;
use crate::types::{Permission, Role, RoleId, RolePermission};

#[derive(Debug, Clone)]
struct RoleEntry {
    role: Role,
    permissions: Vec<PermissionKey>,
    /// Owning client of each permission in `permissions`
    clients: Vec<Option<String>>,
}

/// Resolves subject roles into a set of permission keys
#[derive(Debug, Clone, Default)]
pub struct RoleResolver {
    roles: HashMap<RoleId, RoleEntry>,
}

impl RoleResolver {
    /// Build the role index
    ///
    /// Edges that point at an unknown role or permission are dropped.
    pub fn new(roles: &[Role], permissions: &[Permission], role_permissions: &[RolePermission]) -> Self {
        let by_id: HashMap<&str, &Permission> =
            permissions.iter().map(|p| (p.id.as_str(), p)).collect();

        let mut index: HashMap<RoleId, RoleEntry> = roles
            .iter()
            .map(|role| {
                (
                    role.id.clone(),
                    RoleEntry {
                        role: role.clone(),
                        permissions: Vec::new(),
                        clients: Vec::new(),
                    },
                )
            })
            .collect();

        let mut dropped = 0usize;
        for edge in role_permissions {
            match (index.get_mut(&edge.role_id), by_id.get(edge.permission_id.as_str())) {
                (Some(entry), Some(permission)) => {
                    entry.permissions.push(PermissionKey::of(permission));
                    entry.clients.push(permission.client_id.clone());
                }
                _ => dropped += 1,
            }
        }

        if dropped > 0 {
            debug!("Dropped {} dangling role-permission edges", dropped);
        }

        Self { roles: index }
    }

    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    pub fn role(&self, role_id: &str) -> Option<&Role> {
        self.roles.get(role_id).map(|e| &e.role)
    }

    /// Union of the permissions granted by `role_ids` for a client
    ///
    /// A client-scoped role contributes only when `client_id` names its
    /// client, and a client-scoped permission is only usable from that same
    /// client. Unknown role ids are skipped.
    pub fn resolve_effective_permissions(
        &self,
        role_ids: &[RoleId],
        client_id: Option<&str>,
    ) -> HashSet<PermissionKey> {
        let mut effective = HashSet::new();

        for role_id in role_ids {
            let Some(entry) = self.roles.get(role_id) else {
                warn!("Unknown role '{}' skipped during permission resolution", role_id);
                continue;
            };

            if let Some(owner) = entry.role.client_id.as_deref() {
                if client_id != Some(owner) {
                    continue;
                }
            }

            for (key, owner) in entry.permissions.iter().zip(&entry.clients) {
                if owner.is_some() && owner.as_deref() != client_id {
                    continue;
                }
                effective.insert(key.clone());
            }
        }

        effective
    }

    /// Whether an effective set grants `required` (e.g. `"document:edit"`)
    ///
    /// The client-prefixed key is checked first, then the global name.
    pub fn grants(effective: &HashSet<PermissionKey>, client_id: Option<&str>, required: &str) -> Option<PermissionKey> {
        if let Some(client) = client_id {
            let scoped = PermissionKey::scoped(Some(client), required);
            if effective.contains(&scoped) {
                return Some(scoped);
            }
        }

        let global = PermissionKey::global(required);
        effective.contains(&global).then_some(global)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(id: &str, client_id: Option<&str>) -> Role {
        Role {
            id: id.to_string(),
            name: id.to_string(),
            org_id: None,
            client_id: client_id.map(str::to_string),
            is_system: client_id.is_none(),
        }
    }

    fn permission(id: &str, name: &str, client_id: Option<&str>) -> Permission {
        Permission {
            id: id.to_string(),
            name: name.to_string(),
            resource: name.split(':').next().unwrap_or_default().to_string(),
            action: name.split(':').nth(1).unwrap_or_default().to_string(),
            client_id: client_id.map(str::to_string),
        }
    }

    fn edge(role_id: &str, permission_id: &str) -> RolePermission {
        RolePermission {
            role_id: role_id.to_string(),
            permission_id: permission_id.to_string(),
        }
    }

    fn resolver() -> RoleResolver {
        RoleResolver::new(
            &[role("editor", None), role("pms-editor", Some("pms")), role("viewer", None)],
            &[
                permission("p1", "document:edit", None),
                permission("p2", "document:edit", Some("pms")),
                permission("p3", "document:read", None),
            ],
            &[
                edge("editor", "p1"),
                edge("pms-editor", "p2"),
                edge("viewer", "p3"),
                edge("viewer", "missing"),
            ],
        )
    }

    #[test]
    fn test_roles_union() {
        let resolver = resolver();
        let effective =
            resolver.resolve_effective_permissions(&["editor".into(), "viewer".into()], None);

        assert_eq!(effective.len(), 2);
        assert!(effective.contains(&PermissionKey::global("document:edit")));
        assert!(effective.contains(&PermissionKey::global("document:read")));
    }

    #[test]
    fn test_client_prefix_isolation() {
        let resolver = resolver();

        let pms = resolver.resolve_effective_permissions(&["pms-editor".into()], Some("pms"));
        assert_eq!(
            pms.into_iter().collect::<Vec<_>>(),
            vec![PermissionKey::scoped(Some("pms"), "document:edit")]
        );

        let crm = resolver.resolve_effective_permissions(&["pms-editor".into()], Some("crm"));
        assert!(crm.is_empty());
        assert!(RoleResolver::grants(&crm, Some("crm"), "document:edit").is_none());
    }

    #[test]
    fn test_grants_checks_scoped_then_global() {
        let resolver = resolver();
        let effective = resolver.resolve_effective_permissions(&["editor".into()], Some("pms"));

        let granted = RoleResolver::grants(&effective, Some("pms"), "document:edit").unwrap();
        assert_eq!(granted, PermissionKey::global("document:edit"));
        assert!(RoleResolver::grants(&effective, Some("pms"), "document:delete").is_none());
    }

    #[test]
    fn test_unknown_role_skipped() {
        let resolver = resolver();
        let effective =
            resolver.resolve_effective_permissions(&["ghost".into(), "viewer".into()], None);
        assert_eq!(effective.len(), 1);
    }
}
