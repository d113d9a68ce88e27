use std::sync::Arc;

use axum::http::Method;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::middleware::resolve_namespace;
use crate::authz::{AuthzConfig, Authorizer};
use crate::docs;
use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::{authenticate, JwtConfig};
use crate::routes::{authz, health, rbac};
use crate::store::{RbacStore, SqliteStore};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub store: Arc<dyn RbacStore>,
    pub authorizer: Arc<Authorizer>,
    pub jwt: Arc<JwtConfig>,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, authz_config: &AuthzConfig, event_bus: EventBus) -> Self {
        let store: Arc<dyn RbacStore> = Arc::new(SqliteStore::new(pool.clone()));
        let authorizer = Arc::new(Authorizer::new(Arc::clone(&store), authz_config, event_bus.clone()));
        Self {
            pool,
            store,
            authorizer,
            jwt: Arc::new(jwt),
            event_bus,
        }
    }
}

/// Builds the application from environment configuration.
pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let authz_config = AuthzConfig::from_env()?;
    Ok(create_app_with(pool, jwt_config, authz_config))
}

/// Same as [`create_app`] with explicit configuration.
pub fn create_app_with(pool: SqlitePool, jwt_config: JwtConfig, authz_config: AuthzConfig) -> Router {
    let (event_bus, event_rx) = init_event_bus();
    tokio::spawn(start_activity_listener(event_rx, pool.clone()));

    let state = AppState::new(pool, jwt_config, &authz_config, event_bus);
    build_router(state)
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(health::health))
        .route("/openapi.json", get(docs::openapi_json));

    Router::new()
        .nest("/api", api_routes)
        .nest("/authz", authz::routes())
        .nest("/rbac", rbac::routes(&state))
        // last added runs first: authenticate, then resolve the namespace
        .layer(axum::middleware::from_fn(resolve_namespace))
        .layer(from_fn_with_state(state.jwt.clone(), authenticate))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
