use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::authz::resolver::CandidateGrant;
use crate::errors::AppError;
use crate::models::rbac::{EffectivePermission, Namespace, Permission, Role, UserRoleAssignment};
use crate::models::user::User;

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    // Try RFC3339 first (e.g. 2025-11-19T12:34:56Z)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Try SQLite default timestamp format: "YYYY-MM-DD HH:MM:SS" (with optional fractional seconds)
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    // Try date-only format: "YYYY-MM-DD"
    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date.and_hms_opt(0, 0, 0).ok_or_else(|| AppError::internal("invalid datetime: date out of range".to_string()))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn parse_opt_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, AppError> {
    match s {
        Some(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(parse_datetime(trimmed)?))
            }
        }
        None => Ok(None),
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(s).map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))
}

fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>, AppError> {
    s.as_deref().map(parse_uuid).transpose()
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, AppError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| AppError::internal(format!("missing {}: {}", column, e)))
}

pub fn user_from_row(row: &SqliteRow) -> Result<User, AppError> {
    let id_s: String = get(row, "id")?;
    let name: String = get(row, "name")?;
    let email: Option<String> = get(row, "email")?;
    let is_active: bool = get(row, "is_active")?;
    let created_at_s: String = get(row, "created_at")?;
    let updated_at_s: String = get(row, "updated_at")?;

    Ok(User {
        id: parse_uuid(&id_s)?,
        name,
        email,
        is_active,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}

pub fn role_from_row(row: &SqliteRow) -> Result<Role, AppError> {
    let id_s: String = get(row, "id")?;
    let name: String = get(row, "name")?;
    let description: Option<String> = get(row, "description")?;
    let is_global: bool = get(row, "is_global")?;
    let created_at_s: String = get(row, "created_at")?;
    let updated_at_s: String = get(row, "updated_at")?;

    Ok(Role {
        id: parse_uuid(&id_s)?,
        name,
        description,
        is_global,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}

pub fn permission_from_row(row: &SqliteRow) -> Result<Permission, AppError> {
    let id_s: String = get(row, "id")?;
    let resource: String = get(row, "resource")?;
    let action: String = get(row, "action")?;
    let description: Option<String> = get(row, "description")?;
    let created_at_s: String = get(row, "created_at")?;
    let updated_at_s: String = get(row, "updated_at")?;

    Ok(Permission {
        id: parse_uuid(&id_s)?,
        resource,
        action,
        description,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}

pub fn namespace_from_row(row: &SqliteRow) -> Result<Namespace, AppError> {
    let id_s: String = get(row, "id")?;
    let name: String = get(row, "name")?;
    let parent_id_s: Option<String> = get(row, "parent_id")?;
    let created_at_s: String = get(row, "created_at")?;
    let updated_at_s: String = get(row, "updated_at")?;

    Ok(Namespace {
        id: parse_uuid(&id_s)?,
        name,
        parent_id: parse_opt_uuid(parent_id_s)?,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}

pub fn assignment_from_row(row: &SqliteRow) -> Result<UserRoleAssignment, AppError> {
    let id_s: String = get(row, "id")?;
    let user_id_s: String = get(row, "user_id")?;
    let role_id_s: String = get(row, "role_id")?;
    let namespace_id_s: Option<String> = get(row, "namespace_id")?;
    let granted_by_s: String = get(row, "granted_by")?;
    let granted_at_s: String = get(row, "granted_at")?;
    let expires_at_s: Option<String> = get(row, "expires_at")?;

    Ok(UserRoleAssignment {
        id: parse_uuid(&id_s)?,
        user_id: parse_uuid(&user_id_s)?,
        role_id: parse_uuid(&role_id_s)?,
        namespace_id: parse_opt_uuid(namespace_id_s)?,
        granted_by: parse_uuid(&granted_by_s)?,
        granted_at: parse_datetime(&granted_at_s)?,
        expires_at: parse_opt_datetime(expires_at_s)?,
    })
}

/// `(name, expires_at)` from the role-membership join.
pub fn role_name_from_row(row: &SqliteRow) -> Result<(String, Option<DateTime<Utc>>), AppError> {
    let name: String = get(row, "name")?;
    let expires_at_s: Option<String> = get(row, "expires_at")?;
    Ok((name, parse_opt_datetime(expires_at_s)?))
}

/// Expects the column aliases produced by the effective-permissions join.
pub fn effective_permission_from_row(row: &SqliteRow) -> Result<EffectivePermission, AppError> {
    let permission_id_s: String = get(row, "permission_id")?;
    let resource: String = get(row, "resource")?;
    let action: String = get(row, "action")?;
    let role_id_s: String = get(row, "role_id")?;
    let role_name: String = get(row, "role_name")?;
    let role_is_global: bool = get(row, "role_is_global")?;
    let namespace_id_s: Option<String> = get(row, "namespace_id")?;
    let namespace_name: Option<String> = get(row, "namespace_name")?;
    let expires_at_s: Option<String> = get(row, "expires_at")?;

    Ok(EffectivePermission {
        permission_id: parse_uuid(&permission_id_s)?,
        resource,
        action,
        role_id: parse_uuid(&role_id_s)?,
        role_name,
        role_is_global,
        namespace_id: parse_opt_uuid(namespace_id_s)?,
        namespace_name,
        expires_at: parse_opt_datetime(expires_at_s)?,
    })
}

/// Reads the resolver's view of an assignment. Shared by the permission check
/// and the effective-permissions join, which use the same column aliases.
pub fn candidate_grant_from_row(row: &SqliteRow) -> Result<CandidateGrant, AppError> {
    let role_id_s: String = get(row, "role_id")?;
    let role_is_global: bool = get(row, "role_is_global")?;
    let namespace_id_s: Option<String> = get(row, "namespace_id")?;
    let namespace_parent_id_s: Option<String> = get(row, "namespace_parent_id")?;
    let expires_at_s: Option<String> = get(row, "expires_at")?;

    Ok(CandidateGrant {
        role_id: parse_uuid(&role_id_s)?,
        role_is_global,
        namespace_id: parse_opt_uuid(namespace_id_s)?,
        namespace_parent_id: parse_opt_uuid(namespace_parent_id_s)?,
        expires_at: parse_opt_datetime(expires_at_s)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_datetime_accepts_rfc3339_and_sqlite_formats() {
        let rfc = parse_datetime("2025-11-19T12:34:56Z").unwrap();
        assert_eq!(rfc.hour(), 12);

        let offset = parse_datetime("2025-11-19T12:34:56.250+00:00").unwrap();
        assert_eq!(offset.minute(), 34);

        let sqlite = parse_datetime("2025-11-19 12:34:56").unwrap();
        assert_eq!(sqlite, rfc);

        let date_only = parse_datetime("2025-11-19").unwrap();
        assert_eq!(date_only.day(), 19);
        assert_eq!(date_only.hour(), 0);
    }

    #[test]
    fn test_parse_datetime_rejects_garbage() {
        assert!(parse_datetime("yesterday").is_err());
    }

    #[test]
    fn test_blank_optional_datetime_is_none() {
        assert_eq!(parse_opt_datetime(Some("  ".to_string())).unwrap(), None);
        assert_eq!(parse_opt_datetime(None).unwrap(), None);
    }
}
