//! Registry and Record Types

use chrono::{DateTime, Utc};
use data_validator::DEFAULT_RECORD_LIMIT;
use serde::{Deserialize, Serialize};

/// A registered sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: String,
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub unit: String,
    pub created_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub details: String,
}

/// Mutable sensor fields, used for both creation and full updates.
///
/// Missing fields in a request body fall back to empty/zero values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorFields {
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub unit: String,
    pub latitude: f64,
    pub longitude: f64,
    pub details: String,
}

/// A stored measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub sensor_id: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// A measurement about to be stored; the id is assigned on insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub sensor_id: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Range query over one sensor's records.
///
/// Matches `start <= timestamp < end`, newest first, at most `limit` rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    pub sensor_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: u32,
}

impl RecordQuery {
    /// Everything from the epoch until now, capped at the default limit
    pub fn new(sensor_id: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            start: DateTime::UNIX_EPOCH,
            end: Utc::now(),
            limit: DEFAULT_RECORD_LIMIT,
        }
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}
