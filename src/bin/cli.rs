use sqlx::Row;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use chrono::Utc;
use dotenvy::dotenv;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use uuid::Uuid;

use scoped_rbac::authz::{permissions, roles, AuthzConfig, Authorizer};
use scoped_rbac::errors::AppError;
use scoped_rbac::events::{init_event_bus, start_activity_listener};
use scoped_rbac::models::rbac::{Permission, Role};
use scoped_rbac::models::user::User;
use scoped_rbac::store::{RbacStore, SqliteStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "scoped-rbac operations tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new empty migration with the provided name
    MakeMigration { name: String },
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Roll back the last applied migration
    MigrateRollback,
    /// Give an actor the global admin role, creating the role if needed
    Bootstrap {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in Docker the binary CWD may differ,
    // so fall back to the crate-local `.env` using CARGO_MANIFEST_DIR.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MakeMigration { name } => {
            let path = make_migration_file(&name)?;
            println!("Created migration: {}", path.display());
        }
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::MigrateRollback => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator
                .undo(&pool, 1)
                .await
                .context("no migrations were rolled back")?;
            println!("Rolled back last migration");
        }
        Commands::Bootstrap { user_id, name } => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            bootstrap(pool, user_id, &name).await?;
            println!("Granted global {} role to {}", roles::ADMIN, user_id);
        }
    }

    Ok(())
}

fn make_migration_file(name: &str) -> anyhow::Result<PathBuf> {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let sanitized = sanitize_name(name);
    let filename = format!("{}_{}.sql", timestamp, sanitized);
    let path = Path::new("migrations").join(filename);

    if path.exists() {
        anyhow::bail!("migration already exists: {}", path.display());
    }

    fs::write(&path, "-- Write your migration SQL here\n")
        .with_context(|| format!("failed to create migration at {}", path.display()))?;

    Ok(path)
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let options = SqliteConnectOptions::from_str(&database_url)
        .context("invalid DATABASE_URL")?
        .create_if_missing(true)
        .foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let db_applied = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
        .fetch_optional(pool)
        .await?;
    let applied_versions: HashSet<i64> = if db_applied.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let version = migration.version;
        let applied = applied_versions.contains(&version);
        let status = if applied { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if !desc.is_empty() {
            desc
        } else {
            "unknown"
        };
        println!("{:<8} {:<20} {}", status, version, name);
    }

    Ok(())
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect()
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Try local ./migrations first (when running from repo root). If that
    // doesn't exist (common in containers where CWD differs), fall back to
    // the crate-local migrations folder determined by CARGO_MANIFEST_DIR.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}

/// Upserts the actor, ensures the admin role carries every administrative
/// permission and assigns it globally with the actor as its own granter.
async fn bootstrap(pool: SqlitePool, user_id: Uuid, name: &str) -> anyhow::Result<()> {
    let (event_bus, event_rx) = init_event_bus();
    let listener = tokio::spawn(start_activity_listener(event_rx, pool.clone()));

    let store: Arc<dyn RbacStore> = Arc::new(SqliteStore::new(pool));
    let authorizer = Authorizer::new(Arc::clone(&store), &AuthzConfig::default(), event_bus);

    store.upsert_user(&User::new(user_id, name)).await?;

    let role = match store.get_role_by_name(roles::ADMIN).await {
        Ok(role) => role,
        Err(AppError::NotFound(_)) => {
            let role = Role::new(roles::ADMIN, true).with_description("Full administrative access");
            authorizer.create_role(Some(user_id), role).await?
        }
        Err(err) => return Err(err.into()),
    };

    for (resource, action) in permissions::ADMIN_SET {
        let permission = match store.find_permission(resource, action).await {
            Ok(permission) => permission,
            Err(AppError::NotFound(_)) => {
                authorizer
                    .create_permission(Some(user_id), Permission::new(resource, action))
                    .await?
            }
            Err(err) => return Err(err.into()),
        };
        authorizer
            .attach_permission(Some(user_id), role.id, permission.id)
            .await?;
    }

    authorizer
        .assignments()
        .assign_role(user_id, role.id, None, None, user_id)
        .await?;

    // closing the bus lets the listener drain and exit
    drop(authorizer);
    drop(store);
    listener.await.context("activity listener failed")?;
    Ok(())
}
