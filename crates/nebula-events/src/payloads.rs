//! Progress payload types delivered to live subscribers.

use serde::{Deserialize, Serialize};

/// Default capacity of each subscriber's outbound queue.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Default capacity of the hub's inbound publish queue.
pub const DEFAULT_PUBLISH_CAPACITY: usize = 1_024;

/// Payload variants emitted for a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressPayload {
    /// Periodic transfer sample.
    Progress {
        /// Percentage complete over the selected files (0-100).
        percentage: f64,
        /// Instantaneous download rate in bytes per second.
        #[serde(rename = "downloadSpeed")]
        download_speed: f64,
        /// Instantaneous upload rate in bytes per second.
        #[serde(rename = "uploadSpeed")]
        upload_speed: f64,
        /// Display name of the transfer.
        name: String,
        /// Total bytes across the selected files.
        #[serde(rename = "totalSize")]
        total_size: u64,
        /// Connected peer count.
        peers: u32,
        /// Estimated seconds remaining, absent when it cannot be estimated.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eta: Option<u64>,
    },
    /// Human-readable log line for the job.
    Log {
        /// Message text.
        message: String,
    },
}

impl ProgressPayload {
    /// Machine-friendly discriminator used for metrics labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Log { .. } => "log",
        }
    }
}

/// Envelope pairing a payload with the job that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEnvelope {
    /// Job identifier.
    pub id: String,
    /// Event payload.
    pub data: ProgressPayload,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_envelope_uses_wire_field_names() -> Result<(), serde_json::Error> {
        let envelope = ProgressEnvelope {
            id: "job-1".to_string(),
            data: ProgressPayload::Progress {
                percentage: 42.5,
                download_speed: 1_024.0,
                upload_speed: 0.0,
                name: "ubuntu.iso".to_string(),
                total_size: 4_096,
                peers: 3,
                eta: None,
            },
        };
        let value = serde_json::to_value(&envelope)?;
        assert_eq!(
            value,
            json!({
                "id": "job-1",
                "data": {
                    "type": "progress",
                    "percentage": 42.5,
                    "downloadSpeed": 1024.0,
                    "uploadSpeed": 0.0,
                    "name": "ubuntu.iso",
                    "totalSize": 4096,
                    "peers": 3
                }
            })
        );
        Ok(())
    }

    #[test]
    fn log_payload_kind() {
        let payload = ProgressPayload::Log {
            message: "Completed".to_string(),
        };
        assert_eq!(payload.kind(), "log");
    }
}
