#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use uuid::Uuid;

use scoped_rbac::authz::{AuthzConfig, Authorizer};
use scoped_rbac::events::init_event_bus;
use scoped_rbac::jwt::JwtConfig;
use scoped_rbac::models::rbac::{Namespace, Permission, Role};
use scoped_rbac::models::user::User;
use scoped_rbac::store::{RbacStore, SqliteStore};

pub const JWT_SECRET: &str = "test-secret";

/// Fresh migrated database in a temp dir. Keep the `TempDir` alive for the test.
pub async fn setup_db() -> Result<(TempDir, SqlitePool)> {
    let dir = tempdir()?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"))
        .await?;
    migrator.run(&pool).await?;

    Ok((dir, pool))
}

pub struct Fixture {
    pub _dir: TempDir,
    pub pool: SqlitePool,
    pub store: Arc<dyn RbacStore>,
    pub authorizer: Authorizer,
}

pub async fn fixture() -> Result<Fixture> {
    fixture_with_ttl(Duration::from_secs(300)).await
}

pub async fn fixture_with_ttl(ttl: Duration) -> Result<Fixture> {
    let (dir, pool) = setup_db().await?;
    let store: Arc<dyn RbacStore> = Arc::new(SqliteStore::new(pool.clone()));
    let (event_bus, _) = init_event_bus();
    let config = AuthzConfig::default().with_cache_ttl(ttl);
    let authorizer = Authorizer::new(Arc::clone(&store), &config, event_bus);

    Ok(Fixture {
        _dir: dir,
        pool,
        store,
        authorizer,
    })
}

impl Fixture {
    pub async fn user(&self, name: &str) -> Result<Uuid> {
        let user = self.store.upsert_user(&User::new(Uuid::new_v4(), name)).await?;
        Ok(user.id)
    }

    /// Role holding every listed `(resource, action)`, creating permissions as needed.
    pub async fn role(&self, name: &str, is_global: bool, grants: &[(&str, &str)]) -> Result<Role> {
        let role = self.store.create_role(&Role::new(name, is_global)).await?;
        for (resource, action) in grants {
            let permission = match self.store.find_permission(resource, action).await {
                Ok(permission) => permission,
                Err(_) => self.store.create_permission(&Permission::new(*resource, *action)).await?,
            };
            self.store.attach_permission_to_role(role.id, permission.id).await?;
        }
        Ok(role)
    }

    pub async fn namespace(&self, name: &str, parent_id: Option<Uuid>) -> Result<Uuid> {
        let namespace = self
            .authorizer
            .create_namespace(None, Namespace::new(name, parent_id))
            .await?;
        Ok(namespace.id)
    }
}

pub fn jwt() -> JwtConfig {
    JwtConfig {
        secret: Arc::new(JWT_SECRET.as_bytes().to_vec()),
        exp_hours: 1,
    }
}
