use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

/// Application error type shared by job handlers and the control API
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Resource errors
    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Lifecycle errors
    #[error("Deployment {deployment_id} cannot be finalized from status {status}")]
    InvalidTransition { deployment_id: Uuid, status: String },

    #[error("No previous deployment to roll back to for alias {0}")]
    NoPreviousDeployment(String),

    #[error("Previous deployment for alias {0} is no longer live")]
    PreviousNotLive(String),

    #[error("Deployment {deployment_id} has no live container: {reason}")]
    ContainerNotLive { deployment_id: Uuid, reason: String },

    // Container engine errors
    #[error("Container engine error: {0}")]
    Runtime(String),

    // Routing snapshot errors
    #[error("Routing error: {0}")]
    Routing(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // Internal errors
    #[error("Internal server error")]
    Internal(String),

    // Queue errors
    #[error("Queue error: {0}")]
    Queue(String),
}

impl AppError {
    /// Whether a job that failed with this error should be attempted again
    pub fn is_retryable(&self) -> bool {
        match self {
            // Infrastructure errors are usually transient
            AppError::Runtime(_)
            | AppError::Routing(_)
            | AppError::Database(_)
            | AppError::Queue(_) => true,
            AppError::Internal(msg) => {
                msg.contains("timeout") || msg.contains("connection") || msg.contains("network")
            }
            // Domain errors never change on retry
            AppError::NotFound(_)
            | AppError::Conflict(_)
            | AppError::Validation(_)
            | AppError::InvalidTransition { .. }
            | AppError::NoPreviousDeployment(_)
            | AppError::PreviousNotLive(_)
            | AppError::ContainerNotLive { .. } => false,
        }
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            // 404 Not Found
            AppError::NotFound(resource) => {
                (StatusCode::NOT_FOUND, "Not found", Some(resource.clone()))
            }

            // 409 Conflict
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "Conflict", Some(msg.clone())),
            AppError::InvalidTransition { .. } => (
                StatusCode::CONFLICT,
                "Invalid transition",
                Some(self.to_string()),
            ),
            AppError::NoPreviousDeployment(_) | AppError::PreviousNotLive(_) => (
                StatusCode::CONFLICT,
                "Rollback unavailable",
                Some(self.to_string()),
            ),
            AppError::ContainerNotLive { .. } => (
                StatusCode::CONFLICT,
                "Container not live",
                Some(self.to_string()),
            ),

            // 400 Bad Request
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "Validation error",
                Some(msg.clone()),
            ),

            // 502 Bad Gateway
            AppError::Runtime(msg) => {
                tracing::error!("Container engine error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Container engine error", None)
            }

            // 500 Internal Server Error
            AppError::Routing(msg) => {
                tracing::error!("Routing error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Routing error", None)
            }
            AppError::Database(msg) => {
                tracing::error!("Database error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    None,
                )
            }
            AppError::Queue(msg) => {
                tracing::error!("Queue error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Queue error", None)
            }
        };

        let body = Json(ErrorResponse {
            error: error_message.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

// Convenient conversions from common error types

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err {
            sea_orm::DbErr::RecordNotFound(_) => AppError::NotFound("Resource".to_string()),
            sea_orm::DbErr::RecordNotInserted => {
                AppError::Conflict("Record already exists".to_string())
            }
            sea_orm::DbErr::RecordNotUpdated => AppError::NotFound("Resource".to_string()),
            _ => AppError::Database(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Queue(format!("Redis error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization error: {}", err))
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
