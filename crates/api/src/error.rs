//! API Error Responses

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ingestion::ConfigError;
use serde_json::json;
use storage::StorageError;
use thiserror::Error;
use tracing::error;

/// Errors surfaced to HTTP clients
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Sensor not found")]
    NotFound,

    #[error("Invalid request body: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Ingestion configuration failed: {0}")]
    Config(#[from] ConfigError),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => ApiError::NotFound,
            other => ApiError::Storage(other),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::Storage(e) => {
                error!(error = %e, "Request failed on storage");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal storage error".to_string(),
                )
            }
            ApiError::Config(ConfigError::InvalidBroker(_) | ConfigError::InvalidTopic(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::Config(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
