//! Pure permission resolution.
//!
//! The store fetches every assignment of an actor whose role carries the
//! requested `(resource, action)`; this module decides whether any of them
//! grants access in the requested scope. No I/O, no caching.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One assignment row joined with what resolution needs from its role and namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateGrant {
    pub role_id: Uuid,
    pub role_is_global: bool,
    pub namespace_id: Option<Uuid>,
    /// Parent of the assignment's namespace, used by the child-inclusive match.
    pub namespace_parent_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CandidateGrant {
    pub fn global(role_id: Uuid) -> Self {
        Self {
            role_id,
            role_is_global: true,
            namespace_id: None,
            namespace_parent_id: None,
            expires_at: None,
        }
    }

    pub fn scoped(role_id: Uuid, namespace_id: Option<Uuid>, namespace_parent_id: Option<Uuid>) -> Self {
        Self {
            role_id,
            role_is_global: false,
            namespace_id,
            namespace_parent_id,
            expires_at: None,
        }
    }

    pub fn expiring(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }
}

/// Everything the resolver reads for one check.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// `false` for disabled and unknown actors.
    pub actor_active: bool,
    pub candidates: Vec<CandidateGrant>,
}

/// Scope rule: an assignment in namespace N matches query scope S when N == S
/// or N is a direct child of S. No ancestor walk, no deeper descent.
/// Unscoped assignments match only unscoped checks.
pub fn scope_matches(grant: &CandidateGrant, scope: Option<Uuid>) -> bool {
    match (grant.namespace_id, scope) {
        (None, None) => true,
        (Some(namespace), Some(scope)) => {
            namespace == scope || grant.namespace_parent_id == Some(scope)
        }
        _ => false,
    }
}

pub fn grant_applies(grant: &CandidateGrant, scope: Option<Uuid>, now: DateTime<Utc>) -> bool {
    if grant.is_expired_at(now) {
        return false;
    }
    grant.role_is_global || scope_matches(grant, scope)
}

pub fn resolve(resolution: &Resolution, scope: Option<Uuid>, now: DateTime<Utc>) -> bool {
    if !resolution.actor_active {
        return false;
    }
    resolution
        .candidates
        .iter()
        .any(|grant| grant_applies(grant, scope, now))
}
