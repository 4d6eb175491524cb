//! Application error type mapping to HTTP status codes and the JSON error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use flowgate_core::workflow::definition::DefinitionError;
use flowgate_core::workflow::registry::RegistryError;
use flowgate_infra::workflow::webhook::WebhookError;
use flowgate_types::error::StoreError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    /// Malformed request body, path or workflow document.
    BadRequest(String),
    /// Missing credentials or a failed signature check.
    Unauthorized(String),
    /// Credentials present but wrong.
    Forbidden(String),
    Internal(String),
}

impl From<DefinitionError> for AppError {
    fn from(e: DefinitionError) -> Self {
        match e {
            DefinitionError::Io { .. } => AppError::Internal(e.to_string()),
            DefinitionError::Parse(_) | DefinitionError::Validation(_) => AppError::BadRequest(e.to_string()),
        }
    }
}

impl From<RegistryError> for AppError {
    fn from(e: RegistryError) -> Self {
        AppError::NotFound(e.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => AppError::NotFound(e.to_string()),
            _ => AppError::Internal(e.to_string()),
        }
    }
}

impl From<WebhookError> for AppError {
    fn from(e: WebhookError) -> Self {
        AppError::Unauthorized(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = json!({
            "status": "error",
            "message": message,
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
