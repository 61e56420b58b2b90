//! Decode Error Types

use thiserror::Error;

/// Errors while decoding an inbound reading
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// Payload is not a valid reading document
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Required field present but empty
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Value is NaN or infinite
    #[error("{field} value {value} is not a finite number")]
    NonFinite { field: &'static str, value: f64 },
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Malformed(err.to_string())
    }
}
