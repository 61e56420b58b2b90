//! Repository Implementation

use crate::models::{NewRecord, Record, RecordQuery, Sensor, SensorFields};
use crate::StorageError;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Schema bootstrap. `records.sensor_id` has no foreign key; inserts check
/// the sensor in the same statement instead.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sensors (
        id TEXT PRIMARY KEY,
        type TEXT NOT NULL,
        unit TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        details TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sensors_created_at ON sensors (created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS records (
        id TEXT PRIMARY KEY,
        sensor_id TEXT NOT NULL,
        value REAL NOT NULL,
        timestamp INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_records_sensor_ts ON records (sensor_id, timestamp)",
];

/// Repository for sensors and records backed by SQLite.
///
/// Timestamps are stored as microseconds since the Unix epoch.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Open (or create) a SQLite database at `url`
    pub async fn with_sqlite(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        info!("Opened SQLite repository at {}", url);
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    /// Create a private in-memory database.
    ///
    /// Uses a single connection that is never recycled, since every SQLite
    /// memory connection is its own database.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        debug!("Creating in-memory repository");
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    async fn ensure_schema(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Register a new sensor with a fresh id and creation time
    pub async fn create_sensor(&self, fields: SensorFields) -> Result<Sensor, StorageError> {
        let sensor = Sensor {
            id: Uuid::new_v4().to_string(),
            sensor_type: fields.sensor_type,
            unit: fields.unit,
            created_at: Utc::now(),
            latitude: fields.latitude,
            longitude: fields.longitude,
            details: fields.details,
        };

        sqlx::query(
            "INSERT INTO sensors (id, type, unit, created_at, latitude, longitude, details) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&sensor.id)
        .bind(&sensor.sensor_type)
        .bind(&sensor.unit)
        .bind(sensor.created_at.timestamp_micros())
        .bind(sensor.latitude)
        .bind(sensor.longitude)
        .bind(&sensor.details)
        .execute(&self.pool)
        .await?;

        info!(sensor_id = %sensor.id, "Created sensor");
        Ok(sensor)
    }

    /// Fetch one sensor
    pub async fn get_sensor(&self, id: &str) -> Result<Sensor, StorageError> {
        let row = sqlx::query(
            "SELECT id, type, unit, created_at, latitude, longitude, details \
             FROM sensors WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StorageError::NotFound)?;

        sensor_from_row(&row)
    }

    /// Whether a sensor with this id is registered
    pub async fn sensor_exists(&self, id: &str) -> Result<bool, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sensors WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Replace the mutable fields of a sensor
    pub async fn update_sensor(
        &self,
        id: &str,
        fields: SensorFields,
    ) -> Result<Sensor, StorageError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE sensors SET type = ?, unit = ?, latitude = ?, longitude = ?, details = ? \
             WHERE id = ?",
        )
        .bind(&fields.sensor_type)
        .bind(&fields.unit)
        .bind(fields.latitude)
        .bind(fields.longitude)
        .bind(&fields.details)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StorageError::NotFound);
        }

        let row = sqlx::query(
            "SELECT id, type, unit, created_at, latitude, longitude, details \
             FROM sensors WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(sensor_id = %id, "Updated sensor");
        sensor_from_row(&row)
    }

    /// Delete a sensor and all of its records in one transaction.
    ///
    /// The transaction is committed even when no sensor matched; the caller
    /// then receives [`StorageError::NotFound`].
    pub async fn delete_sensor(&self, id: &str) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        let records = sqlx::query("DELETE FROM records WHERE sensor_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let sensors = sqlx::query("DELETE FROM sensors WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        if sensors.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        info!(
            sensor_id = %id,
            records = records.rows_affected(),
            "Deleted sensor and its records"
        );
        Ok(())
    }

    /// Sensors ordered by creation time, newest first
    pub async fn list_sensors(&self, limit: u32, offset: u32) -> Result<Vec<Sensor>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, type, unit, created_at, latitude, longitude, details \
             FROM sensors ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
        )
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(sensor_from_row).collect()
    }

    /// Store a measurement under a fresh id.
    ///
    /// The existence check and the write are one statement, so a record can
    /// never outlive a concurrent `delete_sensor`. Returns
    /// [`StorageError::NotFound`] when the sensor is not registered. The
    /// timestamp is truncated to the stored microsecond precision.
    pub async fn insert_record(&self, record: NewRecord) -> Result<Record, StorageError> {
        let record = Record {
            id: Uuid::new_v4().to_string(),
            sensor_id: record.sensor_id,
            value: record.value,
            timestamp: from_micros(record.timestamp.timestamp_micros())?,
        };

        let result = sqlx::query(
            "INSERT INTO records (id, sensor_id, value, timestamp) \
             SELECT ?1, ?2, ?3, ?4 WHERE EXISTS (SELECT 1 FROM sensors WHERE id = ?2)",
        )
        .bind(&record.id)
        .bind(&record.sensor_id)
        .bind(record.value)
        .bind(record.timestamp.timestamp_micros())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        debug!(sensor_id = %record.sensor_id, record_id = %record.id, "Inserted record");
        Ok(record)
    }

    /// Records for one sensor within a time window, newest first
    pub async fn list_records(&self, query: &RecordQuery) -> Result<Vec<Record>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, sensor_id, value, timestamp FROM records \
             WHERE sensor_id = ? AND timestamp >= ? AND timestamp < ? \
             ORDER BY timestamp DESC, rowid DESC LIMIT ?",
        )
        .bind(&query.sensor_id)
        .bind(query.start.timestamp_micros())
        .bind(query.end.timestamp_micros())
        .bind(i64::from(query.limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// The newest `limit` records for one sensor
    pub async fn latest_records(
        &self,
        sensor_id: &str,
        limit: u32,
    ) -> Result<Vec<Record>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, sensor_id, value, timestamp FROM records \
             WHERE sensor_id = ? ORDER BY timestamp DESC, rowid DESC LIMIT ?",
        )
        .bind(sensor_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Number of records stored for one sensor
    pub async fn record_count(&self, sensor_id: &str) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE sensor_id = ?")
            .bind(sensor_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Total number of stored records
    pub async fn total_record_count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Total number of registered sensors
    pub async fn sensor_count(&self) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sensors")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Close the pool, waiting for checked-out connections
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn sensor_from_row(row: &SqliteRow) -> Result<Sensor, StorageError> {
    Ok(Sensor {
        id: row.try_get("id")?,
        sensor_type: row.try_get("type")?,
        unit: row.try_get("unit")?,
        created_at: from_micros(row.try_get("created_at")?)?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        details: row.try_get("details")?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<Record, StorageError> {
    Ok(Record {
        id: row.try_get("id")?,
        sensor_id: row.try_get("sensor_id")?,
        value: row.try_get("value")?,
        timestamp: from_micros(row.try_get("timestamp")?)?,
    })
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StorageError::SerializationError(format!("timestamp out of range: {micros}")))
}
