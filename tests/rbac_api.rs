mod common;

use std::sync::Arc;

use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`
use uuid::Uuid;

use scoped_rbac::authz::{permissions, AuthzConfig};
use scoped_rbac::create_app_with;
use scoped_rbac::models::rbac::{Permission, Role};
use scoped_rbac::models::user::User;
use scoped_rbac::store::{AssignmentGrant, RbacStore, SqliteStore};

struct Api {
    _dir: TempDir,
    pool: SqlitePool,
    store: Arc<dyn RbacStore>,
    app: Router,
    admin: Uuid,
    admin_token: String,
}

async fn api() -> Result<Api> {
    let (dir, pool) = common::setup_db().await?;
    let store: Arc<dyn RbacStore> = Arc::new(SqliteStore::new(pool.clone()));
    let app = create_app_with(pool.clone(), common::jwt(), AuthzConfig::default());

    let admin = store.upsert_user(&User::new(Uuid::new_v4(), "Admin")).await?.id;
    let role = store.create_role(&Role::new("admin", true)).await?;
    for (resource, action) in permissions::ADMIN_SET {
        let permission = store.create_permission(&Permission::new(resource, action)).await?;
        store.attach_permission_to_role(role.id, permission.id).await?;
    }
    grant(&store, admin, role.id, None).await?;

    let admin_token = common::jwt().encode(admin)?;
    Ok(Api {
        _dir: dir,
        pool,
        store,
        app,
        admin,
        admin_token,
    })
}

async fn grant(store: &Arc<dyn RbacStore>, user_id: Uuid, role_id: Uuid, namespace_id: Option<Uuid>) -> Result<()> {
    store
        .assign_role(&AssignmentGrant {
            user_id,
            role_id,
            namespace_id,
            granted_by: user_id,
            granted_at: chrono::Utc::now(),
            expires_at: None,
        })
        .await?;
    Ok(())
}

impl Api {
    async fn user_token(&self, name: &str) -> Result<(Uuid, String)> {
        let id = self.store.upsert_user(&User::new(Uuid::new_v4(), name)).await?.id;
        Ok((id, common::jwt().encode(id)?))
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        namespace: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        if let Some(namespace) = namespace {
            builder = builder.header("x-namespace-id", namespace);
        }
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let resp = self.app.clone().oneshot(req).await?;
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, value))
    }
}

fn error_message(body: &Value) -> &str {
    body.get("error").and_then(Value::as_str).unwrap_or_default()
}

#[tokio::test]
async fn missing_actor_is_401_with_error_body() -> Result<()> {
    let api = api().await?;

    let (status, body) = api.send("GET", "/rbac/roles", None, None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!error_message(&body).is_empty());

    let (status, _) = api.send("GET", "/authz/me/roles", None, None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn invalid_token_is_401() -> Result<()> {
    let api = api().await?;

    let (status, body) = api
        .send("GET", "/rbac/roles", Some("not-a-jwt"), None, None)
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(error_message(&body).contains("token"));
    Ok(())
}

#[tokio::test]
async fn missing_permission_is_403() -> Result<()> {
    let api = api().await?;
    let (_, token) = api.user_token("Plain").await?;

    let (status, body) = api.send("GET", "/rbac/roles", Some(&token), None, None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(error_message(&body).contains("denied"));
    Ok(())
}

#[tokio::test]
async fn malformed_namespace_header_is_400() -> Result<()> {
    let api = api().await?;

    let (status, body) = api
        .send("GET", "/rbac/roles", Some(&api.admin_token), Some("not-a-uuid"), None)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("namespace"));
    Ok(())
}

#[tokio::test]
async fn admin_manages_roles_and_permissions() -> Result<()> {
    let api = api().await?;
    let token = api.admin_token.as_str();

    let (status, role) = api
        .send(
            "POST",
            "/rbac/roles",
            Some(token),
            None,
            Some(json!({ "name": "leader", "description": "Team lead" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    let role_id = role["id"].as_str().unwrap_or_default().to_string();
    assert_eq!(role["is_global"], false);

    let (status, _) = api
        .send("POST", "/rbac/roles", Some(token), None, Some(json!({ "name": "leader" })))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, permission) = api
        .send(
            "POST",
            "/rbac/permissions",
            Some(token),
            None,
            Some(json!({ "resource": "rosters", "action": "manage" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    let permission_id = permission["id"].as_str().unwrap_or_default().to_string();

    let attach_uri = format!("/rbac/roles/{}/permissions", role_id);
    let (status, _) = api
        .send("POST", &attach_uri, Some(token), None, Some(json!({ "permission_id": permission_id })))
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = api
        .send("POST", &attach_uri, Some(token), None, Some(json!({ "permission_id": permission_id })))
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, attached) = api.send("GET", &attach_uri, Some(token), None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(attached.as_array().map(Vec::len), Some(1));

    let (status, _) = api
        .send(
            "DELETE",
            &format!("/rbac/roles/{}/permissions/{}", role_id, permission_id),
            Some(token),
            None,
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = api
        .send("DELETE", &format!("/rbac/roles/{}", role_id), Some(token), None, None)
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = api
        .send("GET", &format!("/rbac/roles/{}", role_id), Some(token), None, None)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn namespaces_and_scoped_grants_over_http() -> Result<()> {
    let api = api().await?;
    let token = api.admin_token.as_str();

    let (status, org) = api
        .send("POST", "/rbac/namespaces", Some(token), None, Some(json!({ "name": "org-1" })))
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    let org_id = org["id"].as_str().unwrap_or_default().to_string();

    let (status, team) = api
        .send(
            "POST",
            "/rbac/namespaces",
            Some(token),
            None,
            Some(json!({ "name": "team-5", "parent_id": org_id })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    let team_id = team["id"].as_str().unwrap_or_default().to_string();

    let (status, children) = api
        .send("GET", &format!("/rbac/namespaces/{}/children", org_id), Some(token), None, None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(children[0]["id"], team_id.as_str());

    let (status, _) = api
        .send(
            "PUT",
            &format!("/rbac/namespaces/{}/parent", org_id),
            Some(token),
            None,
            Some(json!({ "parent_id": team_id })),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // scoped grant through the API, then the member checks for themselves
    let leader = api.store.create_role(&Role::new("leader", false)).await?;
    let permission = api.store.create_permission(&Permission::new("rosters", "manage")).await?;
    api.store.attach_permission_to_role(leader.id, permission.id).await?;
    let (member, member_token) = api.user_token("Member").await?;

    let (status, assignment) = api
        .send(
            "POST",
            &format!("/rbac/users/{}/roles", member),
            Some(token),
            None,
            Some(json!({ "role_id": leader.id, "namespace_id": team_id })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(assignment["granted_by"], api.admin.to_string());

    let check = json!({ "resource": "rosters", "action": "manage", "namespace_id": team_id });
    let (status, decision) = api
        .send("POST", "/authz/check", Some(&member_token), None, Some(check))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decision["allowed"], true);

    // header scope is used when the body has none
    let (_, decision) = api
        .send(
            "POST",
            "/authz/check",
            Some(&member_token),
            Some(&org_id),
            Some(json!({ "resource": "rosters", "action": "manage" })),
        )
        .await?;
    assert_eq!(decision["allowed"], true);

    let (_, roles) = api.send("GET", "/authz/me/roles", Some(&member_token), None, None).await?;
    assert_eq!(roles.as_array().map(Vec::len), Some(1));

    let (status, effective) = api
        .send(
            "GET",
            &format!("/rbac/users/{}/effective-permissions?namespace_id={}", member, team_id),
            Some(token),
            None,
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(effective["permissions"][0]["resource"], "rosters");

    // the member cannot grant roles onward
    let (status, _) = api
        .send(
            "POST",
            &format!("/rbac/users/{}/roles", api.admin),
            Some(&member_token),
            None,
            Some(json!({ "role_id": leader.id, "namespace_id": team_id })),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = api
        .send(
            "DELETE",
            &format!("/rbac/users/{}/roles/{}?namespace_id={}", member, leader.id, team_id),
            Some(token),
            None,
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let check = json!({ "resource": "rosters", "action": "manage", "namespace_id": team_id });
    let (_, decision) = api
        .send("POST", "/authz/check", Some(&member_token), None, Some(check))
        .await?;
    assert_eq!(decision["allowed"], false);
    Ok(())
}

#[tokio::test]
async fn status_change_requires_admin_role() -> Result<()> {
    let api = api().await?;
    let (target, target_token) = api.user_token("Target").await?;
    let uri = format!("/rbac/users/{}/status", target);

    let (status, _) = api
        .send("PUT", &uri, Some(&target_token), None, Some(json!({ "is_active": false })))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, user) = api
        .send("PUT", &uri, Some(&api.admin_token), None, Some(json!({ "is_active": false })))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["is_active"], false);

    let (status, _) = api
        .send(
            "PUT",
            &format!("/rbac/users/{}/status", Uuid::new_v4()),
            Some(&api.admin_token),
            None,
            Some(json!({ "is_active": true })),
        )
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn namespace_assignments_need_scoped_audit_view() -> Result<()> {
    let api = api().await?;
    let team = api.store.create_namespace(&scoped_rbac::models::rbac::Namespace::new("team", None)).await?;
    let other = api.store.create_namespace(&scoped_rbac::models::rbac::Namespace::new("other", None)).await?;

    let auditor_role = api.store.create_role(&Role::new("auditor", false)).await?;
    let audit = api.store.find_permission("audit", "view").await?;
    api.store.attach_permission_to_role(auditor_role.id, audit.id).await?;
    let (auditor, auditor_token) = api.user_token("Auditor").await?;
    grant(&api.store, auditor, auditor_role.id, Some(team.id)).await?;

    let (status, body) = api
        .send("GET", "/rbac/namespace-assignments", Some(&auditor_token), None, None)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("namespace"));

    let team_header = team.id.to_string();
    let (status, rows) = api
        .send("GET", "/rbac/namespace-assignments", Some(&auditor_token), Some(&team_header), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows[0]["user_id"], auditor.to_string());

    let other_header = other.id.to_string();
    let (status, _) = api
        .send("GET", "/rbac/namespace-assignments", Some(&auditor_token), Some(&other_header), None)
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn storage_failure_is_500_not_403() -> Result<()> {
    let api = api().await?;
    api.pool.close().await;

    let (status, body) = api
        .send(
            "POST",
            "/authz/check",
            Some(&api.admin_token),
            None,
            Some(json!({ "resource": "roles", "action": "view" })),
        )
        .await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(error_message(&body).contains("check failed"));

    let (status, _) = api.send("GET", "/rbac/roles", Some(&api.admin_token), None, None).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    Ok(())
}
