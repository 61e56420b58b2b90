//! Ingestion Error Types

use data_validator::DecodeError;
use std::time::Duration;
use storage::StorageError;
use thiserror::Error;

/// Why an inbound message was dropped
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IngestError {
    /// Metrics label for this failure
    pub fn outcome(&self) -> &'static str {
        match self {
            IngestError::Decode(_) => "decode_error",
            IngestError::UnknownSensor(_) => "unknown_sensor",
            IngestError::Storage(_) => "storage_error",
        }
    }
}

/// Reconfiguration failures, reported to the caller
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid broker address: {0}")]
    InvalidBroker(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Broker did not acknowledge within {0:?}")]
    Timeout(Duration),
}
