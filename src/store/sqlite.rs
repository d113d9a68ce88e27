use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{AssignmentGrant, RbacStore};
use crate::authz::resolver::{self, Resolution};
use crate::db::row_parsers::{
    assignment_from_row, candidate_grant_from_row, effective_permission_from_row,
    namespace_from_row, permission_from_row, role_from_row, role_name_from_row, user_from_row,
};
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{EffectivePermission, Namespace, Permission, Role, UserRoleAssignment};
use crate::models::user::User;

const USER_COLUMNS: &str = "id, name, email, is_active, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, name, description, is_global, created_at, updated_at";
const PERMISSION_COLUMNS: &str = "id, resource, action, description, created_at, updated_at";
const NAMESPACE_COLUMNS: &str = "id, name, parent_id, created_at, updated_at";
const ASSIGNMENT_COLUMNS: &str =
    "id, user_id, role_id, namespace_id, granted_by, granted_at, expires_at";

/// Assignments of an actor whose role carries a given `(resource, action)`.
const CANDIDATE_GRANTS_SQL: &str = r#"
    SELECT ura.role_id AS role_id,
           r.is_global AS role_is_global,
           ura.namespace_id AS namespace_id,
           n.parent_id AS namespace_parent_id,
           ura.expires_at AS expires_at
    FROM user_role_assignments ura
    INNER JOIN roles r ON r.id = ura.role_id
    INNER JOIN role_permissions rp ON rp.role_id = ura.role_id
    INNER JOIN permissions p ON p.id = rp.permission_id
    LEFT JOIN namespaces n ON n.id = ura.namespace_id
    WHERE ura.user_id = ? AND p.resource = ? AND p.action = ?
"#;

const EFFECTIVE_PERMISSIONS_SQL: &str = r#"
    SELECT p.id AS permission_id,
           p.resource AS resource,
           p.action AS action,
           r.id AS role_id,
           r.name AS role_name,
           r.is_global AS role_is_global,
           ura.namespace_id AS namespace_id,
           n.name AS namespace_name,
           n.parent_id AS namespace_parent_id,
           ura.expires_at AS expires_at
    FROM user_role_assignments ura
    INNER JOIN roles r ON r.id = ura.role_id
    INNER JOIN role_permissions rp ON rp.role_id = r.id
    INNER JOIN permissions p ON p.id = rp.permission_id
    LEFT JOIN namespaces n ON n.id = ura.namespace_id
    WHERE ura.user_id = ?
    ORDER BY p.resource, p.action, r.name
"#;

/// SQLite implementation of the persistence contract. Ids are stored as text.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn actor_is_active(&self, user_id: Uuid) -> AppResult<bool> {
        let active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(active.unwrap_or(false))
    }
}

fn opt_id(id: Option<Uuid>) -> Option<String> {
    id.map(|id| id.to_string())
}

#[async_trait]
impl RbacStore for SqliteStore {
    async fn get_user(&self, id: Uuid) -> AppResult<User> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {id}")))?;
        user_from_row(&row)
    }

    async fn upsert_user(&self, user: &User) -> AppResult<User> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.is_active)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        self.get_user(user.id).await
    }

    async fn set_user_active(&self, id: Uuid, active: bool) -> AppResult<User> {
        let result = sqlx::query("UPDATE users SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("user {id}")));
        }
        self.get_user(id).await
    }

    async fn create_role(&self, role: &Role) -> AppResult<Role> {
        sqlx::query(
            "INSERT INTO roles (id, name, description, is_global, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(role.id.to_string())
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.is_global)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::from_insert(e, &format!("role '{}'", role.name)))?;

        Ok(role.clone())
    }

    async fn get_role(&self, id: Uuid) -> AppResult<Role> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("role {id}")))?;
        role_from_row(&row)
    }

    async fn get_role_by_name(&self, name: &str) -> AppResult<Role> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE name = ?"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("role '{name}'")))?;
        role_from_row(&row)
    }

    async fn list_roles(&self) -> AppResult<Vec<Role>> {
        let rows = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(role_from_row).collect()
    }

    async fn delete_role(&self, id: Uuid) -> AppResult<Role> {
        let role = self.get_role(id).await?;

        sqlx::query("DELETE FROM roles WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(role)
    }

    async fn create_permission(&self, permission: &Permission) -> AppResult<Permission> {
        sqlx::query(
            "INSERT INTO permissions (id, resource, action, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(permission.id.to_string())
        .bind(&permission.resource)
        .bind(&permission.action)
        .bind(&permission.description)
        .bind(permission.created_at)
        .bind(permission.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::from_insert(e, &format!("permission '{}'", permission.key())))?;

        Ok(permission.clone())
    }

    async fn get_permission(&self, id: Uuid) -> AppResult<Permission> {
        let row = sqlx::query(&format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("permission {id}")))?;
        permission_from_row(&row)
    }

    async fn find_permission(&self, resource: &str, action: &str) -> AppResult<Permission> {
        let row = sqlx::query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE resource = ? AND action = ?"
        ))
        .bind(resource)
        .bind(action)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("permission '{resource}:{action}'")))?;
        permission_from_row(&row)
    }

    async fn list_permissions(&self) -> AppResult<Vec<Permission>> {
        let rows = sqlx::query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY resource, action"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(permission_from_row).collect()
    }

    async fn attach_permission_to_role(&self, role_id: Uuid, permission_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn detach_permission_from_role(&self, role_id: Uuid, permission_id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ?")
            .bind(role_id.to_string())
            .bind(permission_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_role_permissions(&self, role_id: Uuid) -> AppResult<Vec<Permission>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.resource, p.action, p.description, p.created_at, p.updated_at
            FROM permissions p
            INNER JOIN role_permissions rp ON p.id = rp.permission_id
            WHERE rp.role_id = ?
            ORDER BY p.resource, p.action
            "#,
        )
        .bind(role_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(permission_from_row).collect()
    }

    async fn create_namespace(&self, namespace: &Namespace) -> AppResult<Namespace> {
        sqlx::query(
            "INSERT INTO namespaces (id, name, parent_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(namespace.id.to_string())
        .bind(&namespace.name)
        .bind(opt_id(namespace.parent_id))
        .bind(namespace.created_at)
        .bind(namespace.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::from_insert(e, &format!("namespace {}", namespace.id)))?;

        Ok(namespace.clone())
    }

    async fn get_namespace(&self, id: Uuid) -> AppResult<Namespace> {
        let row = sqlx::query(&format!("SELECT {NAMESPACE_COLUMNS} FROM namespaces WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("namespace {id}")))?;
        namespace_from_row(&row)
    }

    async fn get_namespace_children(&self, parent_id: Uuid) -> AppResult<Vec<Namespace>> {
        let rows = sqlx::query(&format!(
            "SELECT {NAMESPACE_COLUMNS} FROM namespaces WHERE parent_id = ? ORDER BY name"
        ))
        .bind(parent_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(namespace_from_row).collect()
    }

    async fn set_namespace_parent(&self, id: Uuid, parent_id: Option<Uuid>) -> AppResult<Namespace> {
        let result = sqlx::query("UPDATE namespaces SET parent_id = ?, updated_at = ? WHERE id = ?")
            .bind(opt_id(parent_id))
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("namespace {id}")));
        }
        self.get_namespace(id).await
    }

    async fn assign_role(&self, grant: &AssignmentGrant) -> AppResult<UserRoleAssignment> {
        // conflict target must match the `idx_assignments_triple` expression,
        // under which two NULL namespaces collide
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO user_role_assignments ({ASSIGNMENT_COLUMNS})
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, role_id, COALESCE(namespace_id, '')) DO UPDATE SET
                granted_by = excluded.granted_by,
                granted_at = excluded.granted_at,
                expires_at = excluded.expires_at
            RETURNING {ASSIGNMENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(grant.user_id.to_string())
        .bind(grant.role_id.to_string())
        .bind(opt_id(grant.namespace_id))
        .bind(grant.granted_by.to_string())
        .bind(grant.granted_at)
        .bind(grant.expires_at)
        .fetch_one(&self.pool)
        .await?;

        assignment_from_row(&row)
    }

    async fn revoke_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        namespace_id: Option<Uuid>,
    ) -> AppResult<Option<UserRoleAssignment>> {
        let row = sqlx::query(&format!(
            "DELETE FROM user_role_assignments WHERE user_id = ? AND role_id = ? AND namespace_id IS ? RETURNING {ASSIGNMENT_COLUMNS}"
        ))
        .bind(user_id.to_string())
        .bind(role_id.to_string())
        .bind(opt_id(namespace_id))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(assignment_from_row).transpose()
    }

    async fn get_user_roles(&self, user_id: Uuid) -> AppResult<Vec<UserRoleAssignment>> {
        let rows = sqlx::query(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM user_role_assignments WHERE user_id = ? ORDER BY granted_at DESC"
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut assignments = rows
            .iter()
            .map(assignment_from_row)
            .collect::<AppResult<Vec<_>>>()?;
        // text ordering is not trusted across timestamp formats
        assignments.sort_by(|a, b| b.granted_at.cmp(&a.granted_at));
        Ok(assignments)
    }

    async fn list_namespace_assignments(&self, namespace_id: Uuid) -> AppResult<Vec<UserRoleAssignment>> {
        let rows = sqlx::query(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM user_role_assignments WHERE namespace_id = ? ORDER BY granted_at DESC"
        ))
        .bind(namespace_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut assignments = rows
            .iter()
            .map(assignment_from_row)
            .collect::<AppResult<Vec<_>>>()?;
        assignments.sort_by(|a, b| b.granted_at.cmp(&a.granted_at));
        Ok(assignments)
    }

    async fn has_permission(
        &self,
        user_id: Uuid,
        resource: &str,
        action: &str,
        scope: Option<Uuid>,
    ) -> AppResult<bool> {
        if !self.actor_is_active(user_id).await? {
            return Ok(false);
        }

        let rows = sqlx::query(CANDIDATE_GRANTS_SQL)
            .bind(user_id.to_string())
            .bind(resource)
            .bind(action)
            .fetch_all(&self.pool)
            .await?;

        let resolution = Resolution {
            actor_active: true,
            candidates: rows
                .iter()
                .map(candidate_grant_from_row)
                .collect::<AppResult<Vec<_>>>()?,
        };

        Ok(resolver::resolve(&resolution, scope, Utc::now()))
    }

    async fn get_user_permissions(
        &self,
        user_id: Uuid,
        scope: Option<Uuid>,
    ) -> AppResult<Vec<EffectivePermission>> {
        if !self.actor_is_active(user_id).await? {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(EFFECTIVE_PERMISSIONS_SQL)
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let now = Utc::now();
        let mut permissions = Vec::with_capacity(rows.len());
        for row in &rows {
            let grant = candidate_grant_from_row(row)?;
            let effective = match scope {
                Some(_) => resolver::grant_applies(&grant, scope, now),
                None => !grant.is_expired_at(now),
            };
            if effective {
                permissions.push(effective_permission_from_row(row)?);
            }
        }
        Ok(permissions)
    }

    async fn get_user_role_names(&self, user_id: Uuid) -> AppResult<Vec<String>> {
        if !self.actor_is_active(user_id).await? {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT r.name AS name, ura.expires_at AS expires_at
            FROM user_role_assignments ura
            INNER JOIN roles r ON r.id = ura.role_id
            WHERE ura.user_id = ?
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        let mut names = Vec::new();
        for row in &rows {
            let (name, expires_at) = role_name_from_row(row)?;
            if matches!(expires_at, Some(expires_at) if expires_at <= now) {
                continue;
            }
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
