// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable (pool exhausted, connection lost)
    DatabaseUnavailable(String),

    // 400 Bad Request
    BadRequest(String),

    // 404 Not Found
    NotFound(String),
    TestInstanceNotFound(i64),
    SubjectNotFound(String),

    // 409 Conflict
    NotCompleted(String),
    DuplicateIdentifier(String),

    // 422 Unprocessable Entity (question bank cannot fill the test)
    InsufficientQuestions(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::DatabaseUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_)
            | AppError::TestInstanceNotFound(_)
            | AppError::SubjectNotFound(_) => StatusCode::NOT_FOUND,
            AppError::NotCompleted(_) | AppError::DuplicateIdentifier(_) => StatusCode::CONFLICT,
            AppError::InsufficientQuestions(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::TestInstanceNotFound(id) => write!(f, "Test instance {} not found", id),
            AppError::SubjectNotFound(subject) => write!(f, "Subject '{}' not found in test", subject),
            other => write!(f, "{:?}", other),
        }
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                "Internal Server Error".to_string()
            }
            AppError::DatabaseUnavailable(msg) => {
                tracing::error!("Database unavailable: {}", msg);
                "Database unavailable".to_string()
            }
            AppError::DuplicateIdentifier(msg) => {
                tracing::error!("Identifier allocation failed: {}", msg);
                msg
            }
            e @ (AppError::TestInstanceNotFound(_) | AppError::SubjectNotFound(_)) => e.to_string(),
            AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::NotCompleted(msg)
            | AppError::InsufficientQuestions(msg) => msg,
        };
        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError`.
/// Pool and I/O failures, deadlocks and serialization failures become
/// `DatabaseUnavailable`, unique violations become `DuplicateIdentifier`,
/// everything else is an internal error.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::DatabaseUnavailable(err.to_string())
            }
            // 40P01 deadlock_detected, 40001 serialization_failure: safe to retry.
            sqlx::Error::Database(db) if matches!(db.code().as_deref(), Some("40P01" | "40001")) => {
                AppError::DatabaseUnavailable(err.to_string())
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::DuplicateIdentifier(err.to_string())
            }
            _ => AppError::InternalServerError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
