//! Record Routes

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use data_validator::{record_limit, TimeWindow};
use serde::Deserialize;
use std::sync::Arc;
use storage::{Record, RecordQuery};

use crate::{error::ApiError, AppState};

/// Query parameters for the records endpoint
#[derive(Debug, Deserialize)]
pub struct RecordParams {
    /// RFC 3339 lower bound (inclusive), default Unix epoch
    pub start_time: Option<String>,
    /// RFC 3339 upper bound (exclusive), default now
    pub end_time: Option<String>,
    /// Maximum number of records (default 100)
    pub limit: Option<String>,
}

/// Records for one sensor in a time window, newest first
pub async fn list_records(
    State(state): State<Arc<AppState>>,
    Path(sensor_id): Path<String>,
    Query(params): Query<RecordParams>,
) -> Result<Json<Vec<Record>>, ApiError> {
    let window = TimeWindow::resolve(
        params.start_time.as_deref(),
        params.end_time.as_deref(),
        Utc::now(),
    );
    let query = RecordQuery::new(sensor_id)
        .between(window.start, window.end)
        .limit(record_limit(params.limit.as_deref()));

    let records = state.repository.list_records(&query).await?;
    Ok(Json(records))
}
