use axum::Json;
use serde_json::{json, Map, Value};
use utoipa::OpenApi;

use crate::errors::AppError;
use crate::models;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::authz::check_permission,
		routes::authz::my_roles,
		routes::rbac::list_roles,
		routes::rbac::create_role,
		routes::rbac::get_role,
		routes::rbac::delete_role,
		routes::rbac::get_role_permissions,
		routes::rbac::attach_permission_to_role,
		routes::rbac::detach_permission_from_role,
		routes::rbac::list_permissions,
		routes::rbac::create_permission,
		routes::rbac::create_namespace,
		routes::rbac::get_namespace,
		routes::rbac::get_namespace_children,
		routes::rbac::move_namespace,
		routes::rbac::get_user_roles,
		routes::rbac::assign_role_to_user,
		routes::rbac::revoke_role_from_user,
		routes::rbac::get_effective_permissions,
		routes::rbac::set_user_status,
		routes::rbac::list_namespace_assignments
	),
	components(
		schemas(
			models::user::User,
			models::user::UserStatusRequest,
			models::rbac::Role,
			models::rbac::RoleCreateRequest,
			models::rbac::Permission,
			models::rbac::PermissionCreateRequest,
			models::rbac::AttachPermissionRequest,
			models::rbac::Namespace,
			models::rbac::NamespaceCreateRequest,
			models::rbac::NamespaceMoveRequest,
			models::rbac::UserRoleAssignment,
			models::rbac::AssignRoleRequest,
			models::rbac::EffectivePermission,
			models::rbac::EffectivePermissions,
			routes::authz::CheckRequest,
			routes::authz::CheckResponse,
			routes::health::HealthResponse,
			crate::authz::CacheStats
		)
	),
	tags(
		(name = "Health", description = "Liveness"),
		(name = "Authz", description = "Permission checks for the caller"),
		(name = "RBAC", description = "Roles, permissions, namespaces and assignments")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	ensure_security_components(&mut doc)?;
	ensure_openapi_version(&mut doc)?;
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

/// Serves the generated document at `/api/openapi.json`.
pub async fn openapi_json() -> Result<Json<Value>, AppError> {
	let port = std::env::var("APP_PORT")
		.ok()
		.and_then(|value| value.parse::<u16>().ok())
		.unwrap_or(8000);

	let doc = build_openapi(port)?;
	Ok(Json(serde_json::to_value(doc).map_err(anyhow::Error::from)?))
}

fn root_object(doc: &mut Value) -> anyhow::Result<&mut Map<String, Value>> {
	doc.as_object_mut()
		.ok_or_else(|| anyhow::anyhow!("OpenAPI root must be an object"))
}

fn ensure_security_components(doc: &mut Value) -> anyhow::Result<()> {
	let components = root_object(doc)?
		.entry("components")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
		.ok_or_else(|| anyhow::anyhow!("components must be an object"))?;

	let schemes = components
		.entry("securitySchemes")
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
		.ok_or_else(|| anyhow::anyhow!("securitySchemes must be an object"))?;

	schemes.insert(
		"bearerAuth".to_string(),
		json!({
			"type": "http",
			"scheme": "bearer",
			"bearerFormat": "JWT"
		}),
	);
	Ok(())
}

fn ensure_openapi_version(doc: &mut Value) -> anyhow::Result<()> {
	root_object(doc)?
		.entry("openapi")
		.or_insert_with(|| Value::String("3.1.0".to_string()));
	Ok(())
}

fn ensure_servers(doc: &mut Value, port: u16) {
	let server_url = format!("http://localhost:{}", port);

	match doc.get_mut("servers") {
		Some(Value::Array(arr)) => {
			let has = arr.iter().any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				arr.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_document_lists_rbac_paths_and_bearer_scheme() {
		let doc = serde_json::to_value(build_openapi(8000).unwrap()).unwrap();

		assert!(doc["paths"].get("/authz/check").is_some());
		assert!(doc["paths"].get("/rbac/roles/{role_id}").is_some());
		assert!(doc["paths"].get("/rbac/namespace-assignments").is_some());
		assert_eq!(doc["components"]["securitySchemes"]["bearerAuth"]["scheme"], "bearer");
		assert_eq!(doc["servers"][0]["url"], "http://localhost:8000");
	}
}
