//! Self-service authorization endpoints for the authenticated actor.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{AuthzContext, CurrentActor};
use crate::errors::AppError;
use crate::models::rbac::UserRoleAssignment;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/check", post(check_permission))
        .route("/me/roles", get(my_roles))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckRequest {
    #[schema(example = "documents")]
    pub resource: String,
    #[schema(example = "read")]
    pub action: String,
    /// Falls back to the `X-Namespace-Id` header when absent.
    pub namespace_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckResponse {
    pub allowed: bool,
}

/// Check whether the caller holds a permission
#[utoipa::path(
    post,
    path = "/authz/check",
    tag = "Authz",
    request_body = CheckRequest,
    responses(
        (status = 200, description = "Decision", body = CheckResponse),
        (status = 401, description = "Not authenticated"),
        (status = 500, description = "Decision could not be made"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn check_permission(
    State(state): State<AppState>,
    CurrentActor(actor_id): CurrentActor,
    ctx: AuthzContext,
    Json(req): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, AppError> {
    let scope = req.namespace_id.or(ctx.namespace);
    let allowed = state
        .authorizer
        .check(actor_id, &req.resource, &req.action, scope)
        .await?;
    Ok(Json(CheckResponse { allowed }))
}

/// List the caller's role assignments
#[utoipa::path(
    get,
    path = "/authz/me/roles",
    tag = "Authz",
    responses(
        (status = 200, description = "Assignments, newest first", body = Vec<UserRoleAssignment>),
        (status = 401, description = "Not authenticated"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn my_roles(
    State(state): State<AppState>,
    CurrentActor(actor_id): CurrentActor,
) -> Result<Json<Vec<UserRoleAssignment>>, AppError> {
    let roles = state.authorizer.get_user_roles(actor_id).await?;
    Ok(Json(roles))
}
