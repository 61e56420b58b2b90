//! Storage Layer
//!
//! SQLite persistence for the sensor registry and the record store.
//! Referential integrity between records and sensors is enforced by the
//! conditional record insert and the cascading delete, not by the schema.

mod models;
mod repository;

pub use models::{NewRecord, Record, RecordQuery, Sensor, SensorFields};
pub use repository::Repository;

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Record not found")]
    NotFound,
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            other => StorageError::DatabaseError(other.to_string()),
        }
    }
}
