//! Core authorization types
//!
//! Records mirror the administrative tables the engine reads (roles,
//! permissions, policies, relationships, resource attributes). Request types
//! describe a single access check.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Unique role identifier
pub type RoleId = String;

/// Unique permission identifier
pub type PermissionId = String;

/// Unique policy identifier
pub type PolicyId = String;

/// Role record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,

    /// Unique within its org/client scope
    pub name: String,

    /// `None` for system roles, otherwise the owning organization
    #[serde(default)]
    pub org_id: Option<String>,

    /// `None` for global roles, otherwise the owning client application
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub is_system: bool,
}

/// Permission record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,

    /// Permission name (e.g. "document:edit"), unique within `client_id`
    pub name: String,

    #[serde(default)]
    pub resource: String,

    #[serde(default)]
    pub action: String,

    /// `None` for global permissions
    #[serde(default)]
    pub client_id: Option<String>,
}

/// Role to permission edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: RoleId,
    pub permission_id: PermissionId,
}

/// Kinds of entities that can appear in the relationship graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    User,
    Organization,
    Resource,
    Role,
    Group,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityType::User => "user",
            EntityType::Organization => "organization",
            EntityType::Resource => "resource",
            EntityType::Role => "role",
            EntityType::Group => "group",
        };
        f.write_str(s)
    }
}

/// Typed reference to a graph entity
///
/// Resources are addressed by their qualified id `"{type}:{id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub id: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new(EntityType::User, id)
    }

    pub fn organization(id: impl Into<String>) -> Self {
        Self::new(EntityType::Organization, id)
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self::new(EntityType::Group, id)
    }

    pub fn role(id: impl Into<String>) -> Self {
        Self::new(EntityType::Role, id)
    }

    /// Reference a resource by type and id
    pub fn resource(resource_type: &str, id: &str) -> Self {
        Self::new(EntityType::Resource, format!("{}:{}", resource_type, id))
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.id)
    }
}

/// Directed ReBAC edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source_type: EntityType,
    pub source_id: String,
    pub relation_type: String,
    pub target_type: EntityType,
    pub target_id: String,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Relationship {
    /// Create an active edge with empty metadata
    pub fn new(
        id: impl Into<String>,
        source: &EntityRef,
        relation: impl Into<String>,
        target: &EntityRef,
    ) -> Self {
        Self {
            id: id.into(),
            source_type: source.entity_type,
            source_id: source.id.clone(),
            relation_type: relation.into(),
            target_type: target.entity_type,
            target_id: target.id.clone(),
            org_id: None,
            metadata: Value::Null,
            is_active: true,
        }
    }

    pub fn in_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn source(&self) -> EntityRef {
        EntityRef::new(self.source_type, self.source_id.clone())
    }

    pub fn target(&self) -> EntityRef {
        EntityRef::new(self.target_type, self.target_id.clone())
    }
}

/// Data classification of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Public,
    #[default]
    Internal,
    Confidential,
    Restricted,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Public => "public",
            Classification::Internal => "internal",
            Classification::Confidential => "confidential",
            Classification::Restricted => "restricted",
        }
    }
}

/// Stored attributes of a resource, unique by (resource_type, resource_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAttribute {
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub classification: Classification,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Organization/client scope of a request or snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey {
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl ScopeKey {
    pub fn new(org_id: Option<String>, client_id: Option<String>) -> Self {
        Self { org_id, client_id }
    }

    pub fn global() -> Self {
        Self::default()
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.org_id.as_deref().unwrap_or("global"),
            self.client_id.as_deref().unwrap_or("all")
        )
    }
}

/// Subject of an access check, as resolved by the identity layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    /// Subject identifier (e.g. the OIDC `sub`)
    pub id: String,

    /// Role ids already resolved for this subject
    #[serde(default)]
    pub roles: Vec<RoleId>,

    #[serde(default)]
    pub org_id: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    /// Free-form attributes (department, designation, ...)
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
            org_id: None,
            client_id: None,
            attributes: HashMap::new(),
        }
    }

    pub fn with_role(mut self, role_id: impl Into<String>) -> Self {
        self.roles.push(role_id.into());
        self
    }

    pub fn in_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn for_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn scope(&self) -> ScopeKey {
        ScopeKey::new(self.org_id.clone(), self.client_id.clone())
    }

    /// Attribute view used by `subjects` predicates
    pub fn to_value(&self) -> Value {
        let mut map: Map<String, Value> = self
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        map.insert("id".to_string(), json!(self.id));
        map.insert("roles".to_string(), json!(self.roles));
        map.insert("org_id".to_string(), json!(self.org_id));
        map.insert("client_id".to_string(), json!(self.client_id));
        Value::Object(map)
    }
}

/// Resource being accessed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl ResourceRef {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Qualified id `"{type}:{id}"`
    pub fn qualified_id(&self) -> String {
        format!("{}:{}", self.resource_type, self.id)
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::resource(&self.resource_type, &self.id)
    }
}

/// Request environment (where/when the request happens)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub ip: Option<String>,

    /// Request time supplied by the caller; the engine never injects "now"
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub device: Option<String>,

    /// Classification hint from the caller
    #[serde(default)]
    pub classification: Option<Classification>,

    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl Environment {
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Attribute view used by `environment` predicates
    ///
    /// When a time is present, `hour` and `weekday` (0 = Sunday) are derived.
    pub fn to_value(&self) -> Value {
        let mut map: Map<String, Value> = self
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(ip) = &self.ip {
            map.insert("ip".to_string(), json!(ip));
        }
        if let Some(device) = &self.device {
            map.insert("device".to_string(), json!(device));
        }
        if let Some(classification) = &self.classification {
            map.insert("classification".to_string(), json!(classification.as_str()));
        }
        if let Some(time) = &self.time {
            map.insert("time".to_string(), json!(time.to_rfc3339()));
            map.insert("hour".to_string(), json!(time.hour()));
            map.insert(
                "weekday".to_string(),
                json!(time.weekday().num_days_from_sunday()),
            );
        }
        Value::Object(map)
    }
}

/// Per-request evaluation switches
///
/// With `require_all`, every model that is evaluated must allow; skipped
/// models do not count. An ABAC deny still overrides in both modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckOptions {
    pub require_all: bool,
    pub skip_rbac: bool,
    pub skip_abac: bool,
    pub skip_rebac: bool,
}

impl CheckOptions {
    pub fn require_all() -> Self {
        Self {
            require_all: true,
            ..Self::default()
        }
    }

    pub fn skip_rbac(mut self) -> Self {
        self.skip_rbac = true;
        self
    }

    pub fn skip_abac(mut self) -> Self {
        self.skip_abac = true;
        self
    }

    pub fn skip_rebac(mut self) -> Self {
        self.skip_rebac = true;
        self
    }
}

/// A single access check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub subject: Subject,
    pub resource: ResourceRef,
    pub action: String,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub options: CheckOptions,
}

impl AccessRequest {
    pub fn new(subject: Subject, resource: ResourceRef, action: impl Into<String>) -> Self {
        Self {
            subject,
            resource,
            action: action.into(),
            environment: Environment::default(),
            options: CheckOptions::default(),
        }
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_options(mut self, options: CheckOptions) -> Self {
        self.options = options;
        self
    }

    /// Permission name this request requires, e.g. "document:edit"
    pub fn required_permission(&self) -> String {
        format!("{}:{}", self.resource.resource_type, self.action)
    }
}

fn default_true() -> bool {
    true
}
