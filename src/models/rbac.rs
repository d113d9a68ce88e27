use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::events::{Loggable, Severity};

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Assignments of a global role grant its permissions in every scope.
    pub is_global: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn new(name: impl Into<String>, is_global: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            is_global,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Loggable for Role {
    fn entity_type() -> &'static str { "role" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "leader")]
    pub name: String,
    #[schema(example = "Manages rosters within a team")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_global: bool,
}

// =============================================================================
// PERMISSION
// =============================================================================

/// An opaque `(resource, action)` capability, unique by that pair.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub id: Uuid,
    pub resource: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            resource: resource.into(),
            action: action.into(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `resource:action`, the form used in logs and well-known constants.
    pub fn key(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }
}

impl Loggable for Permission {
    fn entity_type() -> &'static str { "permission" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionCreateRequest {
    #[schema(example = "rosters")]
    pub resource: String,
    #[schema(example = "manage")]
    pub action: String,
    #[schema(example = "Edit team rosters")]
    pub description: Option<String>,
}

// =============================================================================
// ROLE-PERMISSION ATTACHMENT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Loggable for RolePermission {
    fn entity_type() -> &'static str { "role_permission" }
    fn subject_id(&self) -> Uuid { self.role_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AttachPermissionRequest {
    pub permission_id: Uuid,
}

// =============================================================================
// NAMESPACE
// =============================================================================

/// A node in the scope tree. Roots have no parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Namespace {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Namespace {
    pub fn new(name: impl Into<String>, parent_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            parent_id,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Loggable for Namespace {
    fn entity_type() -> &'static str { "namespace" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NamespaceCreateRequest {
    #[schema(example = "team-5")]
    pub name: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct NamespaceMoveRequest {
    pub parent_id: Option<Uuid>,
}

// =============================================================================
// USER-ROLE ASSIGNMENT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserRoleAssignment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    /// `None` means the assignment is unscoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_id: Option<Uuid>,
    pub granted_by: Uuid,
    pub granted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserRoleAssignment {
    /// Soft expiry: an expired row may still exist but never grants anything.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }
}

impl Loggable for UserRoleAssignment {
    fn entity_type() -> &'static str { "user_role" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRoleRequest {
    pub role_id: Uuid,
    pub namespace_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NamespaceQuery {
    pub namespace_id: Option<Uuid>,
}

// =============================================================================
// EFFECTIVE PERMISSIONS (computed)
// =============================================================================

/// Denormalized permission + role + namespace row, for display and audit.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EffectivePermission {
    pub permission_id: Uuid,
    pub resource: String,
    pub action: String,
    pub role_id: Uuid,
    pub role_name: String,
    pub role_is_global: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissions {
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_id: Option<Uuid>,
    pub permissions: Vec<EffectivePermission>,
}
