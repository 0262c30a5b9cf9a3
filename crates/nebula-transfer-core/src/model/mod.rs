//! Job and transfer domain types shared across the workspace.

mod source;

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{JobError, JobResult};

pub use source::{FileSelection, SourceDescriptor};

/// Display name used until the engine reports the real one.
pub const PENDING_DISPLAY_NAME: &str = "Processing...";

/// Lifecycle status of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, file selection not yet confirmed.
    Pending,
    /// Transfer in progress.
    Downloading,
    /// Sampling suspended by the pause gate.
    Paused,
    /// All selected bytes are present.
    Completed,
    /// Terminated by a failure or cancellation.
    Error,
}

impl JobStatus {
    /// Wire representation of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Whether a record in this status is listed as incomplete.
    #[must_use]
    pub const fn is_incomplete(self) -> bool {
        matches!(self, Self::Paused | Self::Downloading | Self::Error)
    }

    /// Whether the status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl Display for JobStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "downloading" => Ok(Self::Downloading),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(JobError::invalid_argument(
                "status",
                "unknown",
                Some(other.to_string()),
            )),
        }
    }
}

/// Durable record describing one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Opaque job identifier.
    pub id: String,
    /// Source descriptor the job was started from.
    pub magnet_link: String,
    /// Destination directory.
    pub output_dir: String,
    /// Selected file indices in caller order.
    pub selected_indices: Vec<usize>,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Percentage complete (0-100).
    pub progress: f64,
    /// Last sampled download rate in bytes per second.
    pub speed: f64,
    /// Display name reported by the engine.
    pub torrent_name: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp, maintained by the store.
    pub updated_at: DateTime<Utc>,
    /// Failure classification; present iff `status` is `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobRecord {
    /// Fresh `pending` record for an accepted job.
    #[must_use]
    pub fn pending(id: impl Into<String>, spec: &JobSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            magnet_link: spec.source.as_str().to_string(),
            output_dir: spec.destination.clone(),
            selected_indices: spec.selection.indices().to_vec(),
            status: JobStatus::Pending,
            progress: 0.0,
            speed: 0.0,
            torrent_name: PENDING_DISPLAY_NAME.to_string(),
            created_at: now,
            updated_at: now,
            error_message: None,
        }
    }

    /// Move to `downloading`, adopting the engine's display name.
    pub fn mark_downloading(&mut self, name: &str) {
        self.status = JobStatus::Downloading;
        name.clone_into(&mut self.torrent_name);
        self.error_message = None;
    }

    /// Record a sample; progress never moves backwards.
    pub fn record_sample(&mut self, progress: f64, speed: f64) {
        self.progress = self.progress.max(progress.clamp(0.0, 100.0));
        self.speed = speed;
    }

    /// Apply an explicit pause or resume from a control call.
    pub const fn set_paused(&mut self, paused: bool) {
        self.status = if paused {
            JobStatus::Paused
        } else {
            JobStatus::Downloading
        };
        self.speed = 0.0;
    }

    /// Terminal success.
    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.progress = 100.0;
        self.speed = 0.0;
        self.error_message = None;
    }

    /// Terminal failure with a classified message.
    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Error;
        self.speed = 0.0;
        self.error_message = Some(message.into());
    }
}

/// Raw start request as received from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Source descriptor text.
    pub source: String,
    /// Destination directory.
    pub destination: String,
    /// Raw selected indices.
    pub selected_indices: Vec<i64>,
    /// Prioritise the first selected file for earliest delivery.
    #[serde(default)]
    pub sequential: bool,
}

impl JobRequest {
    /// Rebuild the start request a persisted record was created from.
    #[must_use]
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            source: record.magnet_link.clone(),
            destination: record.output_dir.clone(),
            selected_indices: record
                .selected_indices
                .iter()
                .map(|&index| i64::try_from(index).unwrap_or(i64::MAX))
                .collect(),
            sequential: false,
        }
    }
}

/// Validated job specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Validated source.
    pub source: SourceDescriptor,
    /// Destination directory.
    pub destination: String,
    /// Validated selection.
    pub selection: FileSelection,
    /// Prioritise the first selected file.
    pub sequential: bool,
}

impl JobSpec {
    /// Validate a raw request.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidArgument`] for a malformed source or selection.
    pub fn from_request(request: &JobRequest) -> JobResult<Self> {
        Ok(Self {
            source: SourceDescriptor::parse(&request.source)?,
            destination: request.destination.clone(),
            selection: FileSelection::from_raw(&request.selected_indices)?,
            sequential: request.sequential,
        })
    }
}

/// One file within a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFile {
    /// Index within the transfer.
    pub index: usize,
    /// Relative path inside the transfer payload.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
}

/// Metadata resolved for a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetadata {
    /// Display name.
    pub name: String,
    /// Files in index order.
    pub files: Vec<TransferFile>,
}

impl TransferMetadata {
    /// Total bytes across every file.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|file| file.size).sum()
    }

    /// Total bytes across the selected files.
    #[must_use]
    pub fn selected_size(&self, selection: &FileSelection) -> u64 {
        self.files
            .iter()
            .filter(|file| selection.contains(file.index))
            .map(|file| file.size)
            .sum()
    }
}

/// Priority level applied to a single file.
#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilePriority {
    /// Do not download the file.
    Skip,
    /// Throttled priority.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Elevated priority.
    High,
    /// Earliest delivery, used for sequential playback.
    Now,
}

impl FilePriority {
    /// Whether the file is downloaded at all.
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::Skip)
    }

    /// Numeric level exposed on the HTTP surface.
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::Skip => 0,
            Self::Low => 1,
            Self::Normal => 2,
            Self::High => 3,
            Self::Now => 4,
        }
    }
}

impl TryFrom<i64> for FilePriority {
    type Error = JobError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Skip),
            1 => Ok(Self::Low),
            2 => Ok(Self::Normal),
            3 => Ok(Self::High),
            4 => Ok(Self::Now),
            other => Err(JobError::invalid_argument(
                "priority",
                "out_of_range",
                Some(other.to_string()),
            )),
        }
    }
}

/// Swarm statistics for an active source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStats {
    /// Connected peers.
    pub peers: u32,
    /// Bytes uploaded since the source was added.
    pub bytes_uploaded: u64,
}

/// Global bandwidth caps pushed to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRateLimit {
    /// Maximum download rate in bytes per second; `None` is unlimited.
    pub download_bps: Option<u64>,
    /// Maximum upload rate in bytes per second; `None` is unlimited.
    pub upload_bps: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> JobResult<JobSpec> {
        JobSpec::from_request(&JobRequest {
            source: format!("magnet:?xt=urn:btih:{}", "a".repeat(40)),
            destination: "/downloads".to_string(),
            selected_indices: vec![0, 2],
            sequential: false,
        })
    }

    #[test]
    fn record_lifecycle_keeps_error_message_consistent() -> JobResult<()> {
        let mut record = JobRecord::pending("job", &spec()?, Utc::now());
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.torrent_name, PENDING_DISPLAY_NAME);

        record.mark_downloading("ubuntu");
        record.record_sample(40.0, 10.0);
        record.record_sample(30.0, 5.0);
        assert!((record.progress - 40.0).abs() < f64::EPSILON);

        record.mark_failed("Canceled");
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some("Canceled"));

        record.mark_completed();
        assert!(record.error_message.is_none());
        assert!((record.progress - 100.0).abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    fn record_serialises_without_absent_error() -> Result<(), Box<dyn std::error::Error>> {
        let record = JobRecord::pending("job", &spec()?, Utc::now());
        let value = serde_json::to_value(&record)?;
        assert_eq!(value["status"], "pending");
        assert!(value.get("error_message").is_none());

        let request = JobRequest::from_record(&record);
        assert_eq!(request.selected_indices, vec![0, 2]);
        Ok(())
    }

    #[test]
    fn status_parsing_and_classification() {
        assert_eq!("paused".parse::<JobStatus>().ok(), Some(JobStatus::Paused));
        assert!("bogus".parse::<JobStatus>().is_err());
        assert!(JobStatus::Error.is_incomplete());
        assert!(!JobStatus::Completed.is_incomplete());
        assert!(JobStatus::Completed.is_terminal());
    }

    #[test]
    fn priority_levels_round_trip() {
        for level in 0..=4 {
            let priority = FilePriority::try_from(level).expect("valid level");
            assert_eq!(i64::from(priority.level()), level);
        }
        assert!(FilePriority::try_from(9).is_err());
        assert!(!FilePriority::Skip.is_enabled());
        assert!(FilePriority::Now.is_enabled());
    }

    #[test]
    fn metadata_sizes() -> JobResult<()> {
        let metadata = TransferMetadata {
            name: "set".to_string(),
            files: [100, 200, 300]
                .into_iter()
                .enumerate()
                .map(|(index, size)| TransferFile {
                    index,
                    path: format!("file-{index}"),
                    size,
                })
                .collect(),
        };
        assert_eq!(metadata.total_size(), 600);
        assert_eq!(metadata.selected_size(&spec()?.selection), 400);
        Ok(())
    }
}
