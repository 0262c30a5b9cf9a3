//! Source analysis and job creation handlers.
//!
//! Analysis resolves metadata only to describe it. The engine hold taken by
//! the resolve is given back before responding, so running jobs on the same
//! source keep their state.

use std::sync::Arc;

use axum::{Json, body::Bytes, extract::State};
use nebula_runtime::HistoryAccess;
use nebula_transfer_core::{JobError, JobRequest, SourceDescriptor, TransferMetadata};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::http::constants::ANALYZE_TIMEOUT;
use crate::http::errors::ApiError;
use crate::http::filesystem::validate_output_dir;
use crate::models::{AnalyzeRequest, AnalyzeResponse, DownloadRequest, JobCreated};
use crate::state::ApiState;

pub(crate) async fn analyze_magnet(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let source = SourceDescriptor::parse(&request.magnet_link)?;
    let metadata = timeout(ANALYZE_TIMEOUT, state.engine.resolve_metadata(&source))
        .await
        .map_err(|_| analyze_timeout())?
        .map_err(|err| JobError::engine("resolve_metadata", None, err))?;
    Ok(Json(describe(&state, source, metadata).await))
}

/// Analyse raw torrent metainfo sent as the request body.
pub(crate) async fn analyze_metainfo(
    State(state): State<Arc<ApiState>>,
    body: Bytes,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    if body.is_empty() {
        return Err(JobError::invalid_argument("metainfo", "empty", None).into());
    }
    let (source, metadata) = timeout(ANALYZE_TIMEOUT, state.engine.resolve_from_bytes(&body))
        .await
        .map_err(|_| analyze_timeout())?
        .map_err(|err| JobError::engine("resolve_from_bytes", None, err))?;
    debug!(bytes = body.len(), info_hash = %source.info_hash(), "metainfo analysed");
    Ok(Json(describe(&state, source, metadata).await))
}

const fn analyze_timeout() -> JobError {
    JobError::Timeout {
        job_id: String::new(),
        waited: ANALYZE_TIMEOUT,
    }
}

/// Record the History access, give back the engine hold, and shape the response.
async fn describe(
    state: &ApiState,
    source: SourceDescriptor,
    metadata: TransferMetadata,
) -> AnalyzeResponse {
    if let Err(err) = state.engine.release(&source).await {
        warn!(error = %err, info_hash = %source.info_hash(), "failed to release analysed source");
    }

    let access = HistoryAccess {
        magnet_link: source.as_str().to_string(),
        torrent_name: metadata.name.clone(),
        file_count: metadata.files.len(),
        total_size: metadata.total_size(),
    };
    if let Err(err) = state.store.add_to_history(access).await {
        warn!(error = %err, "failed to record history entry");
    }

    let info_hash = source.info_hash();
    AnalyzeResponse::new(source.as_str().to_string(), info_hash, metadata)
}

pub(crate) async fn start_download(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<DownloadRequest>,
) -> Result<Json<JobCreated>, ApiError> {
    let destination = match request.output_dir.filter(|dir| !dir.trim().is_empty()) {
        Some(dir) => dir,
        None => state.settings.snapshot().await.default_download_dir,
    };
    validate_output_dir("output_dir", &destination)?;

    let job = JobRequest {
        source: request.magnet_link,
        destination,
        selected_indices: request.selected_indices,
        sequential: request.sequential,
    };
    let id = state.workflow.start(job, state.reporter()).await?;
    info!(job_id = %id, "download accepted");
    Ok(Json(JobCreated { id }))
}
