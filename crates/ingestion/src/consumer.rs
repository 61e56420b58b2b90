//! Ingestion Consumer
//!
//! Turns one inbound payload into at most one stored record.

use crate::error::IngestError;
use data_validator::Reading;
use storage::{NewRecord, Record, Repository, StorageError};
use tracing::{debug, error, warn};

/// Validates readings against the sensor registry and stores them
#[derive(Clone)]
pub struct IngestionConsumer {
    repository: Repository,
}

impl IngestionConsumer {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Decode, check the sensor exists, and insert.
    pub async fn ingest(&self, payload: &[u8]) -> Result<Record, IngestError> {
        let reading = Reading::decode(payload)?;

        if !self.repository.sensor_exists(&reading.sensor_id).await? {
            return Err(IngestError::UnknownSensor(reading.sensor_id));
        }

        // The insert re-checks the sensor; a delete may land in between.
        let sensor_id = reading.sensor_id.clone();
        match self
            .repository
            .insert_record(NewRecord {
                sensor_id: reading.sensor_id,
                value: reading.value,
                timestamp: reading.timestamp,
            })
            .await
        {
            Ok(record) => Ok(record),
            Err(StorageError::NotFound) => Err(IngestError::UnknownSensor(sensor_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Message sink for subscriptions: ingest, then log and drop on failure
    pub async fn process(&self, topic: &str, payload: &[u8]) {
        match self.ingest(payload).await {
            Ok(record) => {
                metrics::counter!("ingest_messages_total", "outcome" => "stored").increment(1);
                debug!(
                    topic,
                    sensor_id = %record.sensor_id,
                    record_id = %record.id,
                    "Stored reading"
                );
            }
            Err(e) => {
                metrics::counter!("ingest_messages_total", "outcome" => e.outcome()).increment(1);
                match &e {
                    IngestError::Decode(err) => {
                        warn!(topic, error = %err, "Discarding malformed reading");
                    }
                    IngestError::UnknownSensor(sensor_id) => {
                        warn!(topic, sensor_id = %sensor_id, "Unknown sensor, discarding reading");
                    }
                    IngestError::Storage(err) => {
                        error!(topic, error = %err, "Failed to store reading");
                    }
                }
            }
        }
    }
}
