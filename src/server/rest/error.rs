use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::builder::BuildError;
use crate::orchestrator::OrchestratorError;
use crate::shared::models::DatabaseError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("an instance of this exercise is already running")]
    AlreadyRunning { subdomain: String },

    #[error("concurrent container limit reached ({limit})")]
    QuotaExceeded { limit: usize },

    #[error("unknown exercise: {0}")]
    UnknownExercise(String),

    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("container runtime refused the request: {0}")]
    RuntimeRefused(String),

    #[error("invalid exercise bundle: {0}")]
    InvalidBundle(String),

    #[error("image build failed: {0}")]
    BuildFailed(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("service is shutting down")]
    ShuttingDown,

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error")]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Database(DatabaseError::Connection(err))
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::AlreadyRunning { subdomain } => {
                ApiError::AlreadyRunning { subdomain }
            }
            OrchestratorError::QuotaExceeded { limit } => ApiError::QuotaExceeded { limit },
            OrchestratorError::UnknownExercise(id) => ApiError::UnknownExercise(id),
            OrchestratorError::RuntimeUnavailable(msg) => ApiError::RuntimeUnavailable(msg),
            OrchestratorError::RuntimeRefused(msg) => ApiError::RuntimeRefused(msg),
            OrchestratorError::NotFound => ApiError::NotFound("Container not found".to_string()),
            OrchestratorError::Forbidden => {
                ApiError::Forbidden("Not the owner of this container".to_string())
            }
            OrchestratorError::ShuttingDown => ApiError::ShuttingDown,
            OrchestratorError::Database(e) => ApiError::Database(DatabaseError::Connection(e)),
        }
    }
}

impl From<BuildError> for ApiError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::InvalidBundle(msg) => ApiError::InvalidBundle(msg),
            BuildError::BuildFailed(msg) => ApiError::BuildFailed(msg),
            BuildError::Runtime(msg) => ApiError::RuntimeUnavailable(msg),
            BuildError::Io(e) => ApiError::Internal(anyhow::anyhow!(e)),
            BuildError::Database(e) => ApiError::Database(DatabaseError::Connection(e)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            ApiError::AlreadyRunning { subdomain } => {
                let mut details = HashMap::new();
                details.insert(
                    "subdomain".to_string(),
                    serde_json::Value::String(subdomain.clone()),
                );
                (
                    StatusCode::BAD_REQUEST,
                    "ALREADY_RUNNING",
                    self.to_string(),
                    Some(details),
                )
            }
            ApiError::QuotaExceeded { .. } => (
                StatusCode::BAD_REQUEST,
                "QUOTA_EXCEEDED",
                self.to_string(),
                None,
            ),
            ApiError::UnknownExercise(_) => (
                StatusCode::NOT_FOUND,
                "UNKNOWN_EXERCISE",
                self.to_string(),
                None,
            ),
            ApiError::RuntimeUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "RUNTIME_UNAVAILABLE",
                self.to_string(),
                None,
            ),
            ApiError::RuntimeRefused(_) => (
                StatusCode::BAD_GATEWAY,
                "RUNTIME_REFUSED",
                self.to_string(),
                None,
            ),
            ApiError::InvalidBundle(_) => (
                StatusCode::BAD_REQUEST,
                "INVALID_BUNDLE",
                self.to_string(),
                None,
            ),
            ApiError::BuildFailed(_) => (
                StatusCode::BAD_REQUEST,
                "BUILD_FAILED",
                self.to_string(),
                None,
            ),
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None)
            }
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".to_string(),
                None,
            ),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone(), None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),
            ApiError::ShuttingDown => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SHUTTING_DOWN",
                self.to_string(),
                None,
            ),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database operation failed".to_string(),
                None,
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetails {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(error_response)).into_response()
    }
}
