//! Route guards.
//!
//! Guards read the actor and namespace that earlier layers put into request
//! extensions. Attach them with `from_fn_with_state(guard, require_*)`.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use super::context::{AuthzContext, CurrentActor, CurrentNamespace};
use super::facade::Authorizer;
use crate::errors::AppError;

pub const NAMESPACE_HEADER: &str = "x-namespace-id";

#[derive(Clone)]
pub struct PermissionGuard {
    authorizer: Arc<Authorizer>,
    resource: Arc<str>,
    action: Arc<str>,
}

impl PermissionGuard {
    pub fn new(authorizer: Arc<Authorizer>, (resource, action): (&str, &str)) -> Self {
        Self {
            authorizer,
            resource: Arc::from(resource),
            action: Arc::from(action),
        }
    }
}

#[derive(Clone)]
pub struct RoleGuard {
    authorizer: Arc<Authorizer>,
    roles: Arc<[String]>,
}

impl RoleGuard {
    pub fn new(authorizer: Arc<Authorizer>, roles: &[&str]) -> Self {
        Self {
            authorizer,
            roles: roles.iter().map(|role| role.to_string()).collect(),
        }
    }
}

fn actor_of(request: &Request) -> Result<Uuid, AppError> {
    request
        .extensions()
        .get::<CurrentActor>()
        .map(|actor| actor.0)
        .ok_or_else(|| AppError::unauthorized("authentication required"))
}

/// 401 unless an authenticated actor is present.
pub async fn require_actor(request: Request, next: Next) -> Result<Response, AppError> {
    actor_of(&request)?;
    Ok(next.run(request).await)
}

/// Checks the guard's permission in the request namespace, or unscoped when none.
pub async fn require_permission(
    State(guard): State<PermissionGuard>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ctx = AuthzContext::from_extensions(request.extensions());
    guard
        .authorizer
        .authorize_in(&ctx, &guard.resource, &guard.action)
        .await?;
    Ok(next.run(request).await)
}

/// Like [`require_permission`] but the request must name a namespace.
pub async fn require_namespace_permission(
    State(guard): State<PermissionGuard>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ctx = AuthzContext::from_extensions(request.extensions());
    if ctx.actor.is_none() {
        return Err(AppError::unauthorized("authentication required"));
    }
    if ctx.namespace.is_none() {
        return Err(AppError::bad_request("namespace scope required"));
    }
    guard
        .authorizer
        .authorize_in(&ctx, &guard.resource, &guard.action)
        .await?;
    Ok(next.run(request).await)
}

/// Passes if the actor holds any of the guard's roles, in any scope.
pub async fn require_any_role(
    State(guard): State<RoleGuard>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let actor_id = actor_of(&request)?;
    if !guard.authorizer.has_any_role(actor_id, &guard.roles).await? {
        return Err(AppError::permission_denied(format!(
            "requires one of roles: {}",
            guard.roles.join(", ")
        )));
    }
    Ok(next.run(request).await)
}

/// Reads `X-Namespace-Id` into [`CurrentNamespace`]. A malformed value is a 400.
pub async fn resolve_namespace(mut request: Request, next: Next) -> Result<Response, AppError> {
    let namespace = match request.headers().get(NAMESPACE_HEADER) {
        None => None,
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| AppError::bad_request("namespace header is not valid text"))?;
            let id = Uuid::parse_str(raw.trim())
                .map_err(|_| AppError::bad_request(format!("malformed namespace id: {raw}")))?;
            Some(id)
        }
    };

    if let Some(id) = namespace {
        request.extensions_mut().insert(CurrentNamespace(id));
    }
    Ok(next.run(request).await)
}
