//! Per-file priority handlers backed directly by the transfer engine.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
};
use nebula_transfer_core::{FilePriority, JobError, SourceDescriptor};
use tracing::info;

use crate::http::errors::ApiError;
use crate::models::{FilePriorityQuery, FilePriorityRequest, FilePriorityResponse, StatusAck};
use crate::state::ApiState;

fn file_index(raw: i64) -> Result<usize, ApiError> {
    usize::try_from(raw).map_err(|_| {
        JobError::invalid_argument("file_index", "negative", Some(raw.to_string())).into()
    })
}

pub(crate) async fn get_file_priority(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<FilePriorityQuery>,
) -> Result<Json<FilePriorityResponse>, ApiError> {
    let source = SourceDescriptor::parse(&query.magnet_link)?;
    let index = file_index(query.file_index)?;
    let priority = state
        .engine
        .file_priority(&source, index)
        .await
        .map_err(|err| JobError::engine("file_priority", None, err))?;
    Ok(Json(FilePriorityResponse {
        priority: priority.level(),
    }))
}

pub(crate) async fn set_file_priority(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<FilePriorityRequest>,
) -> Result<Json<StatusAck>, ApiError> {
    let source = SourceDescriptor::parse(&request.magnet_link)?;
    let index = file_index(request.file_index)?;
    let priority = FilePriority::try_from(request.priority)?;
    state
        .engine
        .set_file_priority(&source, index, priority)
        .await
        .map_err(|err| JobError::engine("set_file_priority", None, err))?;
    info!(info_hash = %source.info_hash(), index, ?priority, "file priority updated");
    Ok(Json(StatusAck::new("updated")))
}
