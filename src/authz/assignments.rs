//! Role assignment lifecycle: grant, re-grant, revoke.
//!
//! Every successful mutation invalidates the actor's cached decisions before
//! returning. Whether the caller may grant at all is checked by the facade.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::cache::PermissionCache;
use crate::errors::AppResult;
use crate::events::{log_activity, EventBus};
use crate::models::rbac::UserRoleAssignment;
use crate::store::{AssignmentGrant, RbacStore};

#[derive(Clone)]
pub struct RoleAssignments {
    store: Arc<dyn RbacStore>,
    cache: Arc<PermissionCache>,
    events: EventBus,
}

impl RoleAssignments {
    pub fn new(store: Arc<dyn RbacStore>, cache: Arc<PermissionCache>, events: EventBus) -> Self {
        Self { store, cache, events }
    }

    /// Inserts a new assignment or refreshes `granted_by`, `granted_at` and
    /// `expires_at` on the existing `(actor, role, namespace)` row.
    pub async fn assign_role(
        &self,
        actor_id: Uuid,
        role_id: Uuid,
        namespace_id: Option<Uuid>,
        expires_at: Option<DateTime<Utc>>,
        granted_by: Uuid,
    ) -> AppResult<UserRoleAssignment> {
        // surface unknown references as NotFound rather than constraint failures
        self.store.get_user(actor_id).await?;
        self.store.get_role(role_id).await?;
        if let Some(namespace_id) = namespace_id {
            self.store.get_namespace(namespace_id).await?;
        }

        let grant = AssignmentGrant {
            user_id: actor_id,
            role_id,
            namespace_id,
            granted_by,
            granted_at: Utc::now(),
            expires_at,
        };
        let assignment = self.store.assign_role(&grant).await?;
        let dropped = self.cache.invalidate_actor(actor_id);

        tracing::info!(
            actor_id = %actor_id,
            role_id = %role_id,
            namespace_id = ?namespace_id,
            expires_at = ?expires_at,
            granted_by = %granted_by,
            invalidated = dropped,
            "role assigned"
        );
        log_activity(&self.events, "assigned", Some(granted_by), &assignment);

        Ok(assignment)
    }

    /// Removes the matching assignment. Absent rows are a no-op, not an error.
    pub async fn revoke_role(
        &self,
        actor_id: Uuid,
        role_id: Uuid,
        namespace_id: Option<Uuid>,
        revoked_by: Option<Uuid>,
    ) -> AppResult<Option<UserRoleAssignment>> {
        let removed = self.store.revoke_role(actor_id, role_id, namespace_id).await?;
        let dropped = self.cache.invalidate_actor(actor_id);

        match &removed {
            Some(assignment) => {
                tracing::info!(
                    actor_id = %actor_id,
                    role_id = %role_id,
                    namespace_id = ?namespace_id,
                    invalidated = dropped,
                    "role revoked"
                );
                log_activity(&self.events, "revoked", revoked_by, assignment);
            }
            None => {
                tracing::debug!(
                    actor_id = %actor_id,
                    role_id = %role_id,
                    namespace_id = ?namespace_id,
                    "revoke matched no assignment"
                );
            }
        }

        Ok(removed)
    }

    /// All assignments, newest grant first, expired ones included.
    pub async fn get_user_roles(&self, actor_id: Uuid) -> AppResult<Vec<UserRoleAssignment>> {
        self.store.get_user_roles(actor_id).await
    }
}
