use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

pub type AppResult<T> = Result<T, AppError>;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The resolver said no. Expected, common, and distinct from a failure.
    #[error("access denied: actor {actor} may not {action} {resource}")]
    Denied {
        actor: Uuid,
        resource: String,
        action: String,
    },
    /// Caller-level policy refusal, raised before any data-layer work.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The store could not answer; never coerce this into `Denied`.
    #[error("authorization check failed: {0}")]
    CheckFailed(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("cyclic namespace dependency: {0}")]
    CyclicDependency(String),
    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("token error: {0}")]
    Token(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn denied(actor: Uuid, resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self::Denied {
            actor,
            resource: resource.into(),
            action: action.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    pub fn check_failed(message: impl Into<String>) -> Self {
        Self::CheckFailed(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn cyclic_dependency(message: impl Into<String>) -> Self {
        Self::CyclicDependency(message.into())
    }

    pub fn invalid_namespace(message: impl Into<String>) -> Self {
        Self::InvalidNamespace(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn token(err: impl Into<String>) -> Self {
        Self::Token(err.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Maps a sqlx error from an insert, turning unique violations into `Conflict`.
    pub fn from_insert(err: sqlx::Error, what: &str) -> Self {
        let unique = err
            .as_database_error()
            .map(|db| db.is_unique_violation())
            .unwrap_or(false);
        if unique {
            Self::Conflict(format!("{what} already exists"))
        } else {
            Self::Database(err)
        }
    }

    /// True for failures of the storage layer itself, as opposed to domain outcomes.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, AppError::Database(_) | AppError::Internal(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Denied { .. } => StatusCode::FORBIDDEN,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::CheckFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::CyclicDependency(_) => StatusCode::CONFLICT,
            AppError::InvalidNamespace(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Token(_) => StatusCode::UNAUTHORIZED,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // storage details stay in the logs, not in the response body
        let error = match &self {
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                "database error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}
