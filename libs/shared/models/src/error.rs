use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    /// 400 carrying a machine-readable code the caller can branch on.
    #[error("Invalid input ({code}): {message}")]
    InvalidInput { code: String, message: String },

    #[error("Internal Server Error: {0}")]
    Internal(String),

    /// A required upstream query failed. `details` is only populated outside production.
    #[error("Upstream failure: {message}")]
    Upstream { message: String, details: Option<String> },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("External service error: {0}")]
    ExternalService(String),
}

impl AppError {
    pub fn invalid_input(code: &str, message: impl Into<String>) -> Self {
        AppError::InvalidInput {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>, cause: impl std::fmt::Display, production: bool) -> Self {
        AppError::Upstream {
            message: message.into(),
            details: if production { None } else { Some(cause.to_string()) },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body): (StatusCode, Value) = match &self {
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::InvalidInput { code, message } => (
                StatusCode::BAD_REQUEST,
                json!({ "message": message, "error": code }),
            ),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
            AppError::Upstream { message, details } => {
                let mut body = json!({ "message": message });
                if let Some(details) = details {
                    body["error"] = json!(details);
                }
                (StatusCode::INTERNAL_SERVER_ERROR, body)
            }
            AppError::Database(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::ExternalService(msg) => (StatusCode::BAD_GATEWAY, json!({ "error": msg })),
        };

        tracing::error!("Error: {}: {}", status, self);

        (status, Json(body)).into_response()
    }
}
