use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::assignments::RoleAssignments;
use super::cache::{CacheKey, CacheStats, PermissionCache};
use super::context::AuthzContext;
use super::{hierarchy, permissions, AuthzConfig};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, log_activity_with_old, EventBus};
use crate::models::rbac::{
    EffectivePermission, Namespace, Permission, Role, RolePermission, UserRoleAssignment,
};
use crate::models::user::User;
use crate::store::RbacStore;

/// Parameters of a role grant made on behalf of a granter.
#[derive(Debug, Clone)]
pub struct GrantRequest {
    pub actor_id: Uuid,
    pub role_id: Uuid,
    pub namespace_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Entry point for authorization checks and RBAC mutations.
///
/// Checks go through the decision cache; every mutation invalidates the
/// cache entries it can affect before returning.
pub struct Authorizer {
    store: Arc<dyn RbacStore>,
    cache: Arc<PermissionCache>,
    assignments: RoleAssignments,
    events: EventBus,
}

impl Authorizer {
    pub fn new(store: Arc<dyn RbacStore>, config: &AuthzConfig, events: EventBus) -> Self {
        let cache = Arc::new(PermissionCache::new(config.cache_ttl));
        let assignments = RoleAssignments::new(Arc::clone(&store), Arc::clone(&cache), events.clone());
        Self {
            store,
            cache,
            assignments,
            events,
        }
    }

    pub fn store(&self) -> &dyn RbacStore {
        self.store.as_ref()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // -------------------------------------------------------------------------
    // checks
    // -------------------------------------------------------------------------

    /// Cached decision. Storage failures become `CheckFailed`, never a denial.
    pub async fn check(
        &self,
        actor_id: Uuid,
        resource: &str,
        action: &str,
        scope: Option<Uuid>,
    ) -> AppResult<bool> {
        let key = CacheKey::new(actor_id, resource, action, scope);
        if let Some(allowed) = self.cache.get(&key) {
            tracing::debug!(key = %key, allowed, "permission cache hit");
            return Ok(allowed);
        }

        // no lock is held across the store call
        let allowed = self
            .store
            .has_permission(actor_id, resource, action, scope)
            .await
            .map_err(|err| {
                tracing::warn!(
                    actor_id = %actor_id,
                    resource = %resource,
                    action = %action,
                    scope = ?scope,
                    error = %err,
                    "permission check failed"
                );
                AppError::check_failed("permission store unavailable")
            })?;

        self.cache.set(key, allowed);
        tracing::debug!(
            actor_id = %actor_id,
            resource = %resource,
            action = %action,
            scope = ?scope,
            allowed,
            "permission resolved"
        );
        Ok(allowed)
    }

    /// `Ok(())` when allowed, `Denied` when not, `CheckFailed` when unknown.
    pub async fn authorize(
        &self,
        actor_id: Uuid,
        resource: &str,
        action: &str,
        scope: Option<Uuid>,
    ) -> AppResult<()> {
        if self.check(actor_id, resource, action, scope).await? {
            Ok(())
        } else {
            Err(AppError::denied(actor_id, resource, action))
        }
    }

    /// Same as [`Authorizer::authorize`] with actor and scope taken from request context.
    pub async fn authorize_in(&self, ctx: &AuthzContext, resource: &str, action: &str) -> AppResult<()> {
        let actor_id = ctx
            .actor
            .ok_or_else(|| AppError::unauthorized("no authenticated actor"))?;
        self.authorize(actor_id, resource, action, ctx.namespace).await
    }

    /// True if the actor currently holds any role named in `names`, in any scope.
    pub async fn has_any_role(&self, actor_id: Uuid, names: &[String]) -> AppResult<bool> {
        let held = self
            .store
            .get_user_role_names(actor_id)
            .await
            .map_err(|err| {
                tracing::warn!(actor_id = %actor_id, error = %err, "role membership check failed");
                AppError::check_failed("permission store unavailable")
            })?;
        Ok(held.iter().any(|name| names.contains(name)))
    }

    /// The granter's `roles:manage` goes through the ordinary resolver, so the
    /// child-inclusive scope rule applies here too: a manager scoped to a
    /// namespace may also grant and revoke at that namespace's direct parent.
    async fn ensure_may_manage_roles(&self, granter: Uuid, scope: Option<Uuid>) -> AppResult<()> {
        let (resource, action) = permissions::ROLES_MANAGE;
        match self.authorize(granter, resource, action, scope).await {
            Err(AppError::Denied { .. }) => Err(AppError::permission_denied(format!(
                "actor {granter} may not manage role assignments here"
            ))),
            other => other,
        }
    }

    // -------------------------------------------------------------------------
    // assignments
    // -------------------------------------------------------------------------

    pub async fn grant_role(&self, granter: Uuid, request: GrantRequest) -> AppResult<UserRoleAssignment> {
        self.ensure_may_manage_roles(granter, request.namespace_id).await?;
        self.assignments
            .assign_role(
                request.actor_id,
                request.role_id,
                request.namespace_id,
                request.expires_at,
                granter,
            )
            .await
    }

    pub async fn revoke_role(
        &self,
        revoker: Uuid,
        actor_id: Uuid,
        role_id: Uuid,
        namespace_id: Option<Uuid>,
    ) -> AppResult<Option<UserRoleAssignment>> {
        self.ensure_may_manage_roles(revoker, namespace_id).await?;
        self.assignments
            .revoke_role(actor_id, role_id, namespace_id, Some(revoker))
            .await
    }

    /// Direct access to the lifecycle, without the granter check. For trusted
    /// callers such as bootstrap tooling.
    pub fn assignments(&self) -> &RoleAssignments {
        &self.assignments
    }

    pub async fn get_user_roles(&self, actor_id: Uuid) -> AppResult<Vec<UserRoleAssignment>> {
        self.assignments.get_user_roles(actor_id).await
    }

    pub async fn get_user_permissions(
        &self,
        actor_id: Uuid,
        scope: Option<Uuid>,
    ) -> AppResult<Vec<EffectivePermission>> {
        self.store.get_user_permissions(actor_id, scope).await
    }

    pub async fn list_namespace_assignments(&self, namespace_id: Uuid) -> AppResult<Vec<UserRoleAssignment>> {
        self.store.get_namespace(namespace_id).await?;
        self.store.list_namespace_assignments(namespace_id).await
    }

    // -------------------------------------------------------------------------
    // actors
    // -------------------------------------------------------------------------

    pub async fn set_actor_active(&self, changed_by: Option<Uuid>, actor_id: Uuid, active: bool) -> AppResult<User> {
        let user = self.store.set_user_active(actor_id, active).await?;
        self.cache.invalidate_actor(actor_id);

        tracing::info!(actor_id = %actor_id, active, "actor status changed");
        let action = if active { "enabled" } else { "disabled" };
        log_activity(&self.events, action, changed_by, &user);
        Ok(user)
    }

    // -------------------------------------------------------------------------
    // roles & permissions
    // -------------------------------------------------------------------------

    pub async fn create_role(&self, created_by: Option<Uuid>, role: Role) -> AppResult<Role> {
        let role = self.store.create_role(&role).await?;
        log_activity(&self.events, "created", created_by, &role);
        Ok(role)
    }

    /// Deleting a role cascades to every holder, so the whole cache is dropped.
    pub async fn delete_role(&self, deleted_by: Option<Uuid>, role_id: Uuid) -> AppResult<Role> {
        let role = self.store.delete_role(role_id).await?;
        self.cache.clear();

        tracing::info!(role_id = %role_id, name = %role.name, "role deleted");
        log_activity(&self.events, "deleted", deleted_by, &role);
        Ok(role)
    }

    pub async fn create_permission(&self, created_by: Option<Uuid>, permission: Permission) -> AppResult<Permission> {
        let permission = self.store.create_permission(&permission).await?;
        log_activity(&self.events, "created", created_by, &permission);
        Ok(permission)
    }

    /// Idempotent. Any holder of the role may be affected, so the whole cache is dropped.
    pub async fn attach_permission(
        &self,
        changed_by: Option<Uuid>,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> AppResult<bool> {
        self.store.get_role(role_id).await?;
        self.store.get_permission(permission_id).await?;

        let attached = self.store.attach_permission_to_role(role_id, permission_id).await?;
        if attached {
            self.cache.clear();
            let link = RolePermission {
                role_id,
                permission_id,
                created_at: Utc::now(),
            };
            log_activity(&self.events, "attached", changed_by, &link);
        }
        Ok(attached)
    }

    /// Detaching an unattached permission is a no-op.
    pub async fn detach_permission(
        &self,
        changed_by: Option<Uuid>,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> AppResult<bool> {
        let detached = self.store.detach_permission_from_role(role_id, permission_id).await?;
        if detached {
            self.cache.clear();
            let link = RolePermission {
                role_id,
                permission_id,
                created_at: Utc::now(),
            };
            log_activity(&self.events, "detached", changed_by, &link);
        }
        Ok(detached)
    }

    // -------------------------------------------------------------------------
    // namespaces
    // -------------------------------------------------------------------------

    pub async fn get_namespace(&self, id: Uuid) -> AppResult<Namespace> {
        hierarchy::get_namespace(self.store.as_ref(), id).await
    }

    pub async fn get_children(&self, parent_id: Uuid) -> AppResult<Vec<Namespace>> {
        hierarchy::get_children(self.store.as_ref(), parent_id).await
    }

    pub async fn create_namespace(&self, created_by: Option<Uuid>, node: Namespace) -> AppResult<Namespace> {
        let namespace = hierarchy::create_namespace(self.store.as_ref(), &node).await?;
        log_activity(&self.events, "created", created_by, &namespace);
        Ok(namespace)
    }

    /// Re-parenting changes which assignments match a scope, so the cache is dropped.
    pub async fn move_namespace(
        &self,
        moved_by: Option<Uuid>,
        id: Uuid,
        new_parent: Option<Uuid>,
    ) -> AppResult<Namespace> {
        let (before, after) = hierarchy::move_namespace(self.store.as_ref(), id, new_parent).await?;
        self.cache.clear();
        log_activity_with_old(&self.events, "moved", moved_by, &after, Some(&before));
        Ok(after)
    }
}
