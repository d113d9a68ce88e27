//! RBAC Admin API Routes
//!
//! Endpoints for managing roles, permissions, namespaces and user assignments.
//! All RBAC modifications go through the authorizer, which invalidates cached
//! decisions and logs to the activity log with Critical severity.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put, MethodRouter},
    Json, Router,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::middleware::{require_actor, require_any_role, require_namespace_permission, require_permission};
use crate::authz::{permissions, roles, AuthzContext, CurrentActor, GrantRequest, PermissionGuard, RoleGuard};
use crate::errors::AppError;
use crate::models::rbac::*;
use crate::models::user::{User, UserStatusRequest};

// =============================================================================
// ROUTER
// =============================================================================

fn guarded(route: MethodRouter<AppState>, guard: &PermissionGuard) -> MethodRouter<AppState> {
    route.route_layer(from_fn_with_state(guard.clone(), require_permission))
}

pub fn routes(state: &AppState) -> Router<AppState> {
    let authorizer = &state.authorizer;
    let roles_view = PermissionGuard::new(authorizer.clone(), permissions::ROLES_VIEW);
    let roles_manage = PermissionGuard::new(authorizer.clone(), permissions::ROLES_MANAGE);
    let ns_view = PermissionGuard::new(authorizer.clone(), permissions::NAMESPACES_VIEW);
    let ns_manage = PermissionGuard::new(authorizer.clone(), permissions::NAMESPACES_MANAGE);
    let audit_view = PermissionGuard::new(authorizer.clone(), permissions::AUDIT_VIEW);
    let admins = RoleGuard::new(authorizer.clone(), &[roles::ADMIN]);

    Router::new()
        // Roles
        .route(
            "/roles",
            guarded(get(list_roles), &roles_view).merge(guarded(post(create_role), &roles_manage)),
        )
        .route(
            "/roles/:role_id",
            guarded(get(get_role), &roles_view).merge(guarded(delete(delete_role), &roles_manage)),
        )
        .route(
            "/roles/:role_id/permissions",
            guarded(get(get_role_permissions), &roles_view)
                .merge(guarded(post(attach_permission_to_role), &roles_manage)),
        )
        .route(
            "/roles/:role_id/permissions/:permission_id",
            guarded(delete(detach_permission_from_role), &roles_manage),
        )
        // Permissions
        .route(
            "/permissions",
            guarded(get(list_permissions), &roles_view).merge(guarded(post(create_permission), &roles_manage)),
        )
        // Namespaces
        .route("/namespaces", guarded(post(create_namespace), &ns_manage))
        .route("/namespaces/:id", guarded(get(get_namespace), &ns_view))
        .route("/namespaces/:id/children", guarded(get(get_namespace_children), &ns_view))
        .route("/namespaces/:id/parent", guarded(put(move_namespace), &ns_manage))
        // User role assignments; grant and revoke check the granter themselves
        .route(
            "/users/:user_id/roles",
            guarded(get(get_user_roles), &roles_view)
                .merge(post(assign_role_to_user).route_layer(axum::middleware::from_fn(require_actor))),
        )
        .route(
            "/users/:user_id/roles/:role_id",
            delete(revoke_role_from_user).route_layer(axum::middleware::from_fn(require_actor)),
        )
        // Effective permissions (computed)
        .route(
            "/users/:user_id/effective-permissions",
            guarded(get(get_effective_permissions), &roles_view),
        )
        // Actor status
        .route(
            "/users/:user_id/status",
            put(set_user_status).route_layer(from_fn_with_state(admins, require_any_role)),
        )
        // Audit
        .route(
            "/namespace-assignments",
            get(list_namespace_assignments).route_layer(from_fn_with_state(audit_view, require_namespace_permission)),
        )
}

// =============================================================================
// ROLE ENDPOINTS
// =============================================================================

/// List all roles
#[utoipa::path(
    get,
    path = "/rbac/roles",
    tag = "RBAC",
    responses(
        (status = 200, description = "List of roles", body = Vec<Role>),
        (status = 403, description = "Missing roles:view"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(State(state): State<AppState>) -> Result<Json<Vec<Role>>, AppError> {
    Ok(Json(state.store.list_roles().await?))
}

/// Create a new role
#[utoipa::path(
    post,
    path = "/rbac/roles",
    tag = "RBAC",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    CurrentActor(actor_id): CurrentActor,
    Json(req): Json<RoleCreateRequest>,
) -> Result<(StatusCode, Json<Role>), AppError> {
    if req.name.trim().is_empty() {
        return Err(AppError::bad_request("role name must not be empty"));
    }

    let mut role = Role::new(req.name, req.is_global);
    role.description = req.description;

    let role = state.authorizer.create_role(Some(actor_id), role).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// Get a role by id
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role", body = Role),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role(State(state): State<AppState>, Path(role_id): Path<Uuid>) -> Result<Json<Role>, AppError> {
    Ok(Json(state.store.get_role(role_id).await?))
}

/// Delete a role and every assignment of it
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    CurrentActor(actor_id): CurrentActor,
    Path(role_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.authorizer.delete_role(Some(actor_id), role_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// List permissions attached to a role
#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Permissions of the role", body = Vec<Permission>),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role_permissions(
    State(state): State<AppState>,
    Path(role_id): Path<Uuid>,
) -> Result<Json<Vec<Permission>>, AppError> {
    state.store.get_role(role_id).await?;
    Ok(Json(state.store.list_role_permissions(role_id).await?))
}

/// Attach a permission to a role
#[utoipa::path(
    post,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(("role_id" = Uuid, Path, description = "Role ID")),
    request_body = AttachPermissionRequest,
    responses(
        (status = 201, description = "Permission attached"),
        (status = 200, description = "Permission was already attached"),
        (status = 404, description = "Role or permission not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn attach_permission_to_role(
    State(state): State<AppState>,
    CurrentActor(actor_id): CurrentActor,
    Path(role_id): Path<Uuid>,
    Json(req): Json<AttachPermissionRequest>,
) -> Result<StatusCode, AppError> {
    let attached = state
        .authorizer
        .attach_permission(Some(actor_id), role_id, req.permission_id)
        .await?;
    Ok(if attached { StatusCode::CREATED } else { StatusCode::OK })
}

/// Detach a permission from a role
#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}/permissions/{permission_id}",
    tag = "RBAC",
    params(
        ("role_id" = Uuid, Path, description = "Role ID"),
        ("permission_id" = Uuid, Path, description = "Permission ID"),
    ),
    responses((status = 204, description = "Permission detached, or was not attached")),
    security(("bearerAuth" = []))
)]
pub async fn detach_permission_from_role(
    State(state): State<AppState>,
    CurrentActor(actor_id): CurrentActor,
    Path((role_id, permission_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    state
        .authorizer
        .detach_permission(Some(actor_id), role_id, permission_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// PERMISSION ENDPOINTS
// =============================================================================

/// List all permissions
#[utoipa::path(
    get,
    path = "/rbac/permissions",
    tag = "RBAC",
    responses((status = 200, description = "List of permissions", body = Vec<Permission>)),
    security(("bearerAuth" = []))
)]
pub async fn list_permissions(State(state): State<AppState>) -> Result<Json<Vec<Permission>>, AppError> {
    Ok(Json(state.store.list_permissions().await?))
}

/// Create a new permission
#[utoipa::path(
    post,
    path = "/rbac/permissions",
    tag = "RBAC",
    request_body = PermissionCreateRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 409, description = "Permission already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_permission(
    State(state): State<AppState>,
    CurrentActor(actor_id): CurrentActor,
    Json(req): Json<PermissionCreateRequest>,
) -> Result<(StatusCode, Json<Permission>), AppError> {
    if req.resource.trim().is_empty() || req.action.trim().is_empty() {
        return Err(AppError::bad_request("resource and action must not be empty"));
    }

    let mut permission = Permission::new(req.resource, req.action);
    permission.description = req.description;

    let permission = state
        .authorizer
        .create_permission(Some(actor_id), permission)
        .await?;
    Ok((StatusCode::CREATED, Json(permission)))
}

// =============================================================================
// NAMESPACE ENDPOINTS
// =============================================================================

/// Create a namespace
#[utoipa::path(
    post,
    path = "/rbac/namespaces",
    tag = "RBAC",
    request_body = NamespaceCreateRequest,
    responses(
        (status = 201, description = "Namespace created", body = Namespace),
        (status = 400, description = "Empty name or unknown parent"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_namespace(
    State(state): State<AppState>,
    CurrentActor(actor_id): CurrentActor,
    Json(req): Json<NamespaceCreateRequest>,
) -> Result<(StatusCode, Json<Namespace>), AppError> {
    let node = Namespace::new(req.name, req.parent_id);
    let namespace = state.authorizer.create_namespace(Some(actor_id), node).await?;
    Ok((StatusCode::CREATED, Json(namespace)))
}

/// Get a namespace
#[utoipa::path(
    get,
    path = "/rbac/namespaces/{id}",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "Namespace ID")),
    responses(
        (status = 200, description = "Namespace", body = Namespace),
        (status = 404, description = "Namespace not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_namespace(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Namespace>, AppError> {
    Ok(Json(state.authorizer.get_namespace(id).await?))
}

/// List direct children of a namespace
#[utoipa::path(
    get,
    path = "/rbac/namespaces/{id}/children",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "Namespace ID")),
    responses((status = 200, description = "Direct children", body = Vec<Namespace>)),
    security(("bearerAuth" = []))
)]
pub async fn get_namespace_children(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Namespace>>, AppError> {
    Ok(Json(state.authorizer.get_children(id).await?))
}

/// Move a namespace under a new parent, or to the root
#[utoipa::path(
    put,
    path = "/rbac/namespaces/{id}/parent",
    tag = "RBAC",
    params(("id" = Uuid, Path, description = "Namespace ID")),
    request_body = NamespaceMoveRequest,
    responses(
        (status = 200, description = "Namespace moved", body = Namespace),
        (status = 404, description = "Namespace not found"),
        (status = 409, description = "Move would create a cycle"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn move_namespace(
    State(state): State<AppState>,
    CurrentActor(actor_id): CurrentActor,
    Path(id): Path<Uuid>,
    Json(req): Json<NamespaceMoveRequest>,
) -> Result<Json<Namespace>, AppError> {
    let namespace = state
        .authorizer
        .move_namespace(Some(actor_id), id, req.parent_id)
        .await?;
    Ok(Json(namespace))
}

// =============================================================================
// USER ASSIGNMENT ENDPOINTS
// =============================================================================

/// List a user's role assignments
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses((status = 200, description = "Assignments, newest first", body = Vec<UserRoleAssignment>)),
    security(("bearerAuth" = []))
)]
pub async fn get_user_roles(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<UserRoleAssignment>>, AppError> {
    Ok(Json(state.authorizer.get_user_roles(user_id).await?))
}

/// Assign a role to a user, globally or in a namespace
#[utoipa::path(
    post,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(("user_id" = Uuid, Path, description = "User ID")),
    request_body = AssignRoleRequest,
    responses(
        (status = 201, description = "Role assigned or refreshed", body = UserRoleAssignment),
        (status = 403, description = "Granter lacks roles:manage in the target scope"),
        (status = 404, description = "User, role or namespace not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn assign_role_to_user(
    State(state): State<AppState>,
    CurrentActor(granter): CurrentActor,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AssignRoleRequest>,
) -> Result<(StatusCode, Json<UserRoleAssignment>), AppError> {
    let request = GrantRequest {
        actor_id: user_id,
        role_id: req.role_id,
        namespace_id: req.namespace_id,
        expires_at: req.expires_at,
    };
    let assignment = state.authorizer.grant_role(granter, request).await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

/// Revoke a role from a user
#[utoipa::path(
    delete,
    path = "/rbac/users/{user_id}/roles/{role_id}",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
        ("role_id" = Uuid, Path, description = "Role ID"),
        NamespaceQuery,
    ),
    responses(
        (status = 204, description = "Role revoked, or was not assigned"),
        (status = 403, description = "Revoker lacks roles:manage in the target scope"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_role_from_user(
    State(state): State<AppState>,
    CurrentActor(revoker): CurrentActor,
    Path((user_id, role_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<NamespaceQuery>,
) -> Result<StatusCode, AppError> {
    state
        .authorizer
        .revoke_role(revoker, user_id, role_id, query.namespace_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Computed permissions of a user, optionally restricted to a scope
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/effective-permissions",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
        NamespaceQuery,
    ),
    responses((status = 200, description = "Effective permissions", body = EffectivePermissions)),
    security(("bearerAuth" = []))
)]
pub async fn get_effective_permissions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Json<EffectivePermissions>, AppError> {
    let permissions = state
        .authorizer
        .get_user_permissions(user_id, query.namespace_id)
        .await?;
    Ok(Json(EffectivePermissions {
        user_id,
        namespace_id: query.namespace_id,
        permissions,
    }))
}

/// Enable or disable a user
#[utoipa::path(
    put,
    path = "/rbac/users/{user_id}/status",
    tag = "RBAC",
    params(("user_id" = Uuid, Path, description = "User ID")),
    request_body = UserStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = User),
        (status = 403, description = "Caller is not an admin"),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn set_user_status(
    State(state): State<AppState>,
    CurrentActor(actor_id): CurrentActor,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UserStatusRequest>,
) -> Result<Json<User>, AppError> {
    let user = state
        .authorizer
        .set_actor_active(Some(actor_id), user_id, req.is_active)
        .await?;
    Ok(Json(user))
}

// =============================================================================
// AUDIT ENDPOINTS
// =============================================================================

/// Assignments scoped exactly to the request namespace
#[utoipa::path(
    get,
    path = "/rbac/namespace-assignments",
    tag = "RBAC",
    params(("X-Namespace-Id" = Uuid, Header, description = "Namespace to list")),
    responses(
        (status = 200, description = "Assignments, newest first", body = Vec<UserRoleAssignment>),
        (status = 400, description = "Namespace header missing or malformed"),
        (status = 403, description = "Missing audit:view in the namespace"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_namespace_assignments(
    State(state): State<AppState>,
    ctx: AuthzContext,
) -> Result<Json<Vec<UserRoleAssignment>>, AppError> {
    let namespace_id = ctx
        .namespace
        .ok_or_else(|| AppError::bad_request("namespace scope required"))?;
    Ok(Json(state.authorizer.list_namespace_assignments(namespace_id).await?))
}
