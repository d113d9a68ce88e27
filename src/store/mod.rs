//! Persistence contract consumed by the authorization core.
//!
//! Storage technology is an implementation detail; the engine only talks to
//! [`RbacStore`]. Absent rows surface as `AppError::NotFound`, storage
//! failures as `AppError::Database`.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::AppResult;
use crate::models::rbac::{EffectivePermission, Namespace, Permission, Role, UserRoleAssignment};
use crate::models::user::User;

/// Input to the assignment upsert; the store decides whether it inserts or updates.
#[derive(Debug, Clone)]
pub struct AssignmentGrant {
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub namespace_id: Option<Uuid>,
    pub granted_by: Uuid,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait RbacStore: Send + Sync {
    // users
    async fn get_user(&self, id: Uuid) -> AppResult<User>;
    async fn upsert_user(&self, user: &User) -> AppResult<User>;
    async fn set_user_active(&self, id: Uuid, active: bool) -> AppResult<User>;

    // roles
    async fn create_role(&self, role: &Role) -> AppResult<Role>;
    async fn get_role(&self, id: Uuid) -> AppResult<Role>;
    async fn get_role_by_name(&self, name: &str) -> AppResult<Role>;
    async fn list_roles(&self) -> AppResult<Vec<Role>>;
    async fn delete_role(&self, id: Uuid) -> AppResult<Role>;

    // permissions
    async fn create_permission(&self, permission: &Permission) -> AppResult<Permission>;
    async fn get_permission(&self, id: Uuid) -> AppResult<Permission>;
    async fn find_permission(&self, resource: &str, action: &str) -> AppResult<Permission>;
    async fn list_permissions(&self) -> AppResult<Vec<Permission>>;

    /// Idempotent. Returns `true` when the attachment is new.
    async fn attach_permission_to_role(&self, role_id: Uuid, permission_id: Uuid) -> AppResult<bool>;
    /// Detaching an unattached permission is a no-op. Returns `true` when a row was removed.
    async fn detach_permission_from_role(&self, role_id: Uuid, permission_id: Uuid) -> AppResult<bool>;
    async fn list_role_permissions(&self, role_id: Uuid) -> AppResult<Vec<Permission>>;

    // namespaces
    async fn create_namespace(&self, namespace: &Namespace) -> AppResult<Namespace>;
    async fn get_namespace(&self, id: Uuid) -> AppResult<Namespace>;
    /// Direct children ordered by name.
    async fn get_namespace_children(&self, parent_id: Uuid) -> AppResult<Vec<Namespace>>;
    async fn set_namespace_parent(&self, id: Uuid, parent_id: Option<Uuid>) -> AppResult<Namespace>;

    // assignments
    /// Upsert keyed by `(user, role, namespace)`, with two `None` namespaces equal.
    async fn assign_role(&self, grant: &AssignmentGrant) -> AppResult<UserRoleAssignment>;
    /// Returns the removed row, `None` when nothing matched.
    async fn revoke_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        namespace_id: Option<Uuid>,
    ) -> AppResult<Option<UserRoleAssignment>>;
    /// Newest grant first, expired rows included.
    async fn get_user_roles(&self, user_id: Uuid) -> AppResult<Vec<UserRoleAssignment>>;
    async fn list_namespace_assignments(&self, namespace_id: Uuid) -> AppResult<Vec<UserRoleAssignment>>;

    // resolution
    /// The authoritative check; reads fresh data on every call.
    async fn has_permission(
        &self,
        user_id: Uuid,
        resource: &str,
        action: &str,
        scope: Option<Uuid>,
    ) -> AppResult<bool>;
    async fn get_user_permissions(
        &self,
        user_id: Uuid,
        scope: Option<Uuid>,
    ) -> AppResult<Vec<EffectivePermission>>;
    /// Effective (non-expired) role names of an active actor, in any scope.
    async fn get_user_role_names(&self, user_id: Uuid) -> AppResult<Vec<String>>;
}
