//! Authorization module - scoped RBAC
//!
//! This module implements namespace-scoped role based access control:
//! - Resolution of `(actor, resource, action, scope)` against live grants
//! - Namespace tree with cycle protection
//! - Assignment lifecycle with optional expiry
//! - Per-process decision cache with actor-level invalidation
//! - Request context propagation and route guards

pub mod assignments;
pub mod cache;
pub mod context;
pub mod facade;
pub mod hierarchy;
pub mod middleware;
pub mod resolver;

pub use assignments::RoleAssignments;
pub use cache::{CacheKey, CacheStats, PermissionCache};
pub use context::{AuthzContext, CurrentActor, CurrentNamespace};
pub use facade::{Authorizer, GrantRequest};
pub use middleware::{PermissionGuard, RoleGuard};

use std::time::Duration;

use crate::errors::AppError;

const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Runtime settings of the authorization layer.
#[derive(Debug, Clone, Copy)]
pub struct AuthzConfig {
    pub cache_ttl: Duration,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
        }
    }
}

impl AuthzConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let ttl_secs = std::env::var("AUTHZ_CACHE_TTL_SECS")
            .map(|val| val.parse::<u64>())
            .unwrap_or(Ok(DEFAULT_CACHE_TTL_SECS))
            .map_err(|_| AppError::configuration("AUTHZ_CACHE_TTL_SECS must be a non-negative integer"))?;

        Ok(Self {
            cache_ttl: Duration::from_secs(ttl_secs),
        })
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }
}

/// Well-known role names
pub mod roles {
    pub const ADMIN: &str = "admin";
}

/// Well-known permissions as `(resource, action)`
pub mod permissions {
    // Roles, permissions and assignments
    pub const ROLES_VIEW: (&str, &str) = ("roles", "view");
    pub const ROLES_MANAGE: (&str, &str) = ("roles", "manage");

    // Namespace tree
    pub const NAMESPACES_VIEW: (&str, &str) = ("namespaces", "view");
    pub const NAMESPACES_MANAGE: (&str, &str) = ("namespaces", "manage");

    // Audit
    pub const AUDIT_VIEW: (&str, &str) = ("audit", "view");

    /// Granted to the bootstrap admin role.
    pub const ADMIN_SET: [(&str, &str); 5] = [ROLES_VIEW, ROLES_MANAGE, NAMESPACES_VIEW, NAMESPACES_MANAGE, AUDIT_VIEW];
}
