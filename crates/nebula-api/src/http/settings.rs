//! Settings handlers.
//!
//! Speed changes are pushed to the engine as soon as they are persisted.

use std::sync::Arc;

use axum::{Json, extract::State};
use nebula_config::UserSettings;
use tracing::info;

use crate::http::errors::ApiError;
use crate::http::filesystem::validate_output_dir;
use crate::models::{DefaultDirRequest, SpeedRequest};
use crate::state::ApiState;

pub(crate) async fn get_settings(State(state): State<Arc<ApiState>>) -> Json<UserSettings> {
    Json(state.settings.snapshot().await)
}

pub(crate) async fn set_download_speed(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SpeedRequest>,
) -> Result<Json<UserSettings>, ApiError> {
    let settings = state.settings.set_download_speed(request.speed).await?;
    info!(kib_per_sec = settings.max_download_speed, "download limit updated");
    state.push_limits().await;
    Ok(Json(settings))
}

pub(crate) async fn set_upload_speed(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SpeedRequest>,
) -> Result<Json<UserSettings>, ApiError> {
    let settings = state.settings.set_upload_speed(request.speed).await?;
    info!(kib_per_sec = settings.max_upload_speed, "upload limit updated");
    state.push_limits().await;
    Ok(Json(settings))
}

pub(crate) async fn set_default_dir(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<DefaultDirRequest>,
) -> Result<Json<UserSettings>, ApiError> {
    validate_output_dir("path", &request.path)?;
    Ok(Json(state.settings.set_default_dir(&request.path).await?))
}

pub(crate) async fn reset_settings(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<UserSettings>, ApiError> {
    let settings = state.settings.reset().await?;
    state.push_limits().await;
    Ok(Json(settings))
}
