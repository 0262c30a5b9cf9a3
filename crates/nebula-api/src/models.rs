//! Request and response bodies for the HTTP surface.

use nebula_transfer_core::{TransferFile, TransferMetadata};
use serde::{Deserialize, Serialize};

/// RFC9457-compatible problem document surfaced on validation/runtime errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    /// URI reference identifying the problem type.
    pub kind: String,
    /// Short, human-readable summary of the issue.
    pub title: String,
    /// HTTP status code associated with the error.
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Detailed diagnostic message when available.
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Parameters that failed validation, if applicable.
    pub invalid_params: Option<Vec<ProblemInvalidParam>>,
}

/// Invalid parameter pointer surfaced alongside a [`ProblemDetails`] payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemInvalidParam {
    /// JSON Pointer to the offending field.
    pub pointer: String,
    /// Human-readable description of the validation failure.
    pub message: String,
}

/// Body of `POST /api/magnet/analyze`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    /// Source descriptor to inspect.
    pub magnet_link: String,
}

/// Metadata returned by `POST /api/magnet/analyze` and `POST /api/torrent/analyze-file`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalyzeResponse {
    /// Files in index order.
    pub files: Vec<TransferFile>,
    /// Display name.
    pub name: String,
    /// Lowercase info-hash.
    pub info_hash: String,
    /// Source descriptor as submitted.
    pub magnet_link: String,
    /// Sum of all file sizes.
    pub total_size: u64,
}

impl AnalyzeResponse {
    pub(crate) fn new(magnet_link: String, info_hash: String, metadata: TransferMetadata) -> Self {
        let total_size = metadata.total_size();
        Self {
            files: metadata.files,
            name: metadata.name,
            info_hash,
            magnet_link,
            total_size,
        }
    }
}

/// Body of `POST /api/magnet/download`.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadRequest {
    /// Source descriptor.
    pub magnet_link: String,
    /// Destination directory; the configured default applies when absent or empty.
    #[serde(default)]
    pub output_dir: Option<String>,
    /// File indices to download.
    #[serde(default)]
    pub selected_indices: Vec<i64>,
    /// Prioritise the first selected file.
    #[serde(default)]
    pub sequential: bool,
}

/// Identifier of a freshly started job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobCreated {
    /// Job identifier.
    pub id: String,
}

/// Acknowledgement carrying the outcome of a control call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusAck {
    /// Outcome label (`paused`, `resumed`, `cancelled`, `deleted`, `updated`, `removed`).
    pub status: String,
}

impl StatusAck {
    pub(crate) fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

/// Query string of `GET /api/download`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadListQuery {
    /// Optional status filter.
    #[serde(default)]
    pub status: Option<String>,
}

/// Query string of `GET /api/history`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of entries; defaults to 50.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Query string of `GET /api/history/search`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistorySearchQuery {
    /// Case-insensitive needle.
    #[serde(default)]
    pub q: String,
}

/// Body of `POST /api/favorites`.
#[derive(Debug, Clone, Deserialize)]
pub struct FavoriteRequest {
    /// Source descriptor.
    pub magnet_link: String,
    /// Display name.
    #[serde(default)]
    pub torrent_name: String,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-text note.
    #[serde(default)]
    pub notes: String,
}

/// Query string naming a favorite by source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FavoriteQuery {
    /// Source descriptor.
    #[serde(default)]
    pub magnet_link: String,
}

/// Response of `GET /api/favorites/check`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FavoriteCheck {
    /// Whether the source is bookmarked.
    pub is_favorite: bool,
}

/// Body of the speed-limit settings routes, in KiB/s.
#[derive(Debug, Clone, Deserialize)]
pub struct SpeedRequest {
    /// New limit; zero is unlimited.
    pub speed: i64,
}

/// Body of `PUT /api/config/default-dir`.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultDirRequest {
    /// New default destination.
    pub path: String,
}

/// Query string of `GET /api/file/priority`.
#[derive(Debug, Clone, Deserialize)]
pub struct FilePriorityQuery {
    /// Source descriptor.
    pub magnet_link: String,
    /// File index within the source.
    pub file_index: i64,
}

/// Body of `PUT /api/file/priority`.
#[derive(Debug, Clone, Deserialize)]
pub struct FilePriorityRequest {
    /// Source descriptor.
    pub magnet_link: String,
    /// File index within the source.
    pub file_index: i64,
    /// Priority level, 0 (skip) to 4 (now).
    pub priority: i64,
}

/// Response of `GET /api/file/priority`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilePriorityResponse {
    /// Priority level, 0 (skip) to 4 (now).
    pub priority: u8,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// Always `ok` while the process serves requests.
    pub status: String,
    /// Build identifier.
    pub build: String,
    /// Jobs with a live session.
    pub active_jobs: usize,
}
