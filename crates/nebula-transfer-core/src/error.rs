//! Error taxonomy for job orchestration.

use std::error::Error;
use std::time::Duration;

use thiserror::Error;

use crate::model::JobStatus;

/// Message recorded for jobs that observed cancellation.
pub const CANCELED_MESSAGE: &str = "Canceled";

/// Message recorded for jobs whose metadata never resolved.
pub const TIMEOUT_MESSAGE: &str = "Timeout";

/// Primary error type for job operations.
#[derive(Debug, Error)]
pub enum JobError {
    /// Caller input was rejected before the job started.
    #[error("invalid job argument")]
    InvalidArgument {
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason for the rejection.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// No live session exists for the job.
    #[error("job not found")]
    NotFound {
        /// Job identifier that was looked up.
        job_id: String,
        /// Last status persisted for the job, if a record exists.
        last_status: Option<JobStatus>,
    },
    /// Metadata resolution did not finish within its bound.
    #[error("metadata resolution timed out")]
    Timeout {
        /// Job identifier.
        job_id: String,
        /// Bound that elapsed.
        waited: Duration,
    },
    /// The job observed its cancellation signal.
    #[error("job canceled")]
    Canceled {
        /// Job identifier.
        job_id: String,
    },
    /// The engine reported data for files the caller excluded.
    #[error("transfer invariant violated")]
    Invariant {
        /// Job identifier.
        job_id: String,
        /// Unselected files that reported completed bytes.
        file_indices: Vec<usize>,
        /// Total completed bytes across those files.
        unselected_bytes: u64,
    },
    /// The transfer engine failed.
    #[error("transfer engine operation failed")]
    Engine {
        /// Engine operation identifier.
        operation: &'static str,
        /// Job identifier when the failure is tied to one.
        job_id: Option<String>,
        /// Underlying engine failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

/// Convenience alias for job operation results.
pub type JobResult<T> = Result<T, JobError>;

impl JobError {
    /// Build an [`JobError::InvalidArgument`] error.
    #[must_use]
    pub const fn invalid_argument(
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::InvalidArgument {
            field,
            reason,
            value,
        }
    }

    /// Wrap an engine failure.
    #[must_use]
    pub fn engine(operation: &'static str, job_id: Option<&str>, source: anyhow::Error) -> Self {
        Self::Engine {
            operation,
            job_id: job_id.map(str::to_string),
            source: source.into(),
        }
    }

    /// Machine-friendly discriminator used for metrics and problem documents.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::NotFound { .. } => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::Canceled { .. } => "canceled",
            Self::Invariant { .. } => "invariant",
            Self::Engine { .. } => "engine",
        }
    }

    /// Message persisted on the job record when the job ends with this error.
    #[must_use]
    pub fn terminal_message(&self) -> String {
        match self {
            Self::Canceled { .. } => CANCELED_MESSAGE.to_string(),
            Self::Timeout { .. } => TIMEOUT_MESSAGE.to_string(),
            Self::InvalidArgument {
                field,
                reason,
                value,
            } => value.as_ref().map_or_else(
                || format!("invalid {field}: {reason}"),
                |value| format!("invalid {field}: {reason}: {value}"),
            ),
            Self::NotFound { job_id, .. } => format!("job {job_id} not found"),
            Self::Invariant {
                file_indices,
                unselected_bytes,
                ..
            } => format!(
                "unselected files are being downloaded: {unselected_bytes} bytes across files {file_indices:?}"
            ),
            Self::Engine {
                operation, source, ..
            } => format!("{operation} failed: {source}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_messages_classify_failures() {
        let canceled = JobError::Canceled {
            job_id: "a".to_string(),
        };
        assert_eq!(canceled.terminal_message(), "Canceled");
        assert_eq!(canceled.kind(), "canceled");

        let timeout = JobError::Timeout {
            job_id: "a".to_string(),
            waited: Duration::from_secs(30),
        };
        assert_eq!(timeout.terminal_message(), "Timeout");

        let invariant = JobError::Invariant {
            job_id: "a".to_string(),
            file_indices: vec![1],
            unselected_bytes: 512,
        };
        assert!(invariant.terminal_message().contains("512 bytes"));
        assert_eq!(invariant.to_string(), "transfer invariant violated");

        let invalid = JobError::invalid_argument(
            "selected_indices",
            "out_of_range",
            Some("5 (transfer has 3 files)".to_string()),
        );
        assert_eq!(
            invalid.terminal_message(),
            "invalid selected_indices: out_of_range: 5 (transfer has 3 files)"
        );
    }

    #[test]
    fn engine_error_preserves_source() {
        let err = JobError::engine("resolve_metadata", Some("job"), anyhow::anyhow!("boom"));
        assert!(err.source().is_some());
        assert_eq!(err.terminal_message(), "resolve_metadata failed: boom");
    }
}
