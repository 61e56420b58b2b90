//! Sensor Routes

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use data_validator::Page;
use serde::Deserialize;
use std::sync::Arc;
use storage::{Sensor, SensorFields};

use crate::{error::ApiError, AppState};

/// Query parameters for the sensor listing.
///
/// Kept as raw strings so that unusable values fall back to defaults.
#[derive(Debug, Deserialize)]
pub struct SensorQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
}

/// Register a sensor
pub async fn create_sensor(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SensorFields>, JsonRejection>,
) -> Result<(StatusCode, Json<Sensor>), ApiError> {
    let Json(fields) = body?;
    let sensor = state.repository.create_sensor(fields).await?;
    Ok((StatusCode::CREATED, Json(sensor)))
}

/// List sensors, newest first
pub async fn list_sensors(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SensorQuery>,
) -> Result<Json<Vec<Sensor>>, ApiError> {
    let page = Page::from_params(params.limit.as_deref(), params.offset.as_deref());
    let sensors = state.repository.list_sensors(page.limit, page.offset).await?;
    Ok(Json(sensors))
}

/// Fetch one sensor
pub async fn get_sensor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Sensor>, ApiError> {
    Ok(Json(state.repository.get_sensor(&id).await?))
}

/// Replace a sensor's mutable fields
pub async fn update_sensor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<SensorFields>, JsonRejection>,
) -> Result<Json<Sensor>, ApiError> {
    let Json(fields) = body?;
    Ok(Json(state.repository.update_sensor(&id, fields).await?))
}

/// Delete a sensor together with all of its records
pub async fn delete_sensor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.repository.delete_sensor(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
