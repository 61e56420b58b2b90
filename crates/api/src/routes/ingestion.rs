//! Ingestion Configuration Routes

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use ingestion::{ActiveConfig, IngestionConfig};
use serde::Serialize;
use std::sync::Arc;

use crate::{error::ApiError, AppState};

/// Response for a successful reconfiguration
#[derive(Debug, Serialize)]
pub struct ReconfigureResponse {
    pub message: String,
    #[serde(flatten)]
    pub config: ActiveConfig,
}

/// Switch ingestion to a new broker/topic
pub async fn set_config(
    State(state): State<Arc<AppState>>,
    body: Result<Json<IngestionConfig>, JsonRejection>,
) -> Result<Json<ReconfigureResponse>, ApiError> {
    let Json(config) = body?;
    let active = state.controller.reconfigure(config).await?;
    Ok(Json(ReconfigureResponse {
        message: "MQTT configuration updated successfully".to_string(),
        config: active,
    }))
}

/// The configuration in effect, or `null`
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<Option<ActiveConfig>> {
    Json(state.controller.current().await)
}
