//! Job listing and control handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path as AxumPath, Query, State},
};
use nebula_transfer_core::{JobError, JobRecord, JobStatus};
use tracing::{info, warn};

use crate::http::errors::ApiError;
use crate::http::filesystem::{download_path, remove_path, validate_output_dir};
use crate::models::{DownloadListQuery, StatusAck};
use crate::state::ApiState;

pub(crate) async fn list_downloads(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<DownloadListQuery>,
) -> Result<Json<Vec<JobRecord>>, ApiError> {
    let records = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => {
            let status: JobStatus = raw.parse()?;
            state.store.downloads_with_status(status).await
        }
        None => state.store.all_downloads().await,
    };
    Ok(Json(records))
}

pub(crate) async fn download_status(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<JobRecord>, ApiError> {
    state
        .store
        .get_download(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("download not found"))
}

pub(crate) async fn pause_download(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<StatusAck>, ApiError> {
    state.workflow.pause(&id).await?;
    Ok(Json(StatusAck::new("paused")))
}

pub(crate) async fn resume_download(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<StatusAck>, ApiError> {
    state.workflow.resume(&id).await?;
    Ok(Json(StatusAck::new("resumed")))
}

/// Signal cancellation when the job is live; an absent session is not an error here.
async fn cancel_if_live(state: &ApiState, id: &str) -> Result<(), ApiError> {
    match state.workflow.cancel(id).await {
        Ok(()) | Err(JobError::NotFound { .. }) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

pub(crate) async fn cancel_download(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<StatusAck>, ApiError> {
    cancel_if_live(&state, &id).await?;
    if state.store.delete_download(&id).await?.is_none() {
        info!(job_id = %id, "cancel requested for job without a record");
    }
    Ok(Json(StatusAck::new("cancelled")))
}

pub(crate) async fn delete_download_files(
    State(state): State<Arc<ApiState>>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<StatusAck>, ApiError> {
    let record = state.store.get_download(&id).await;
    cancel_if_live(&state, &id).await?;

    if let Some(record) = record {
        validate_output_dir("output_dir", &record.output_dir)?;
        match download_path(&record.output_dir, &record.torrent_name) {
            Some(path) => match remove_path(&path).await {
                Ok(true) => info!(job_id = %id, path = %path.display(), "removed downloaded files"),
                Ok(false) => {}
                Err(err) => {
                    warn!(job_id = %id, path = %path.display(), error = %err, "failed to remove downloaded files");
                }
            },
            None => {
                warn!(job_id = %id, name = %record.torrent_name, "no safe path for downloaded files");
            }
        }
    }

    state.store.delete_download(&id).await?;
    Ok(Json(StatusAck::new("deleted")))
}
