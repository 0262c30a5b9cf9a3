//! Progress hub error primitives.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Error emitted when handing an event to the hub fails.
#[derive(Debug)]
pub enum HubError {
    /// The hub's inbound publish queue was full; the event was dropped.
    QueueFull {
        /// Job the dropped event belonged to, when known.
        job_id: Option<String>,
    },
    /// The coordinating loop has stopped.
    Closed,
    /// The payload could not be encoded as JSON.
    Encode {
        /// Job the payload belonged to.
        job_id: String,
        /// Underlying serde error.
        source: serde_json::Error,
    },
}

impl HubError {
    /// Whether the failure was a transient overflow rather than a terminal one.
    #[must_use]
    pub const fn is_overflow(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }
}

impl Display for HubError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull { .. } => formatter.write_str("progress hub queue full"),
            Self::Closed => formatter.write_str("progress hub closed"),
            Self::Encode { .. } => formatter.write_str("failed to encode progress payload"),
        }
    }
}

impl Error for HubError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Encode { source, .. } => Some(source),
            Self::QueueFull { .. } | Self::Closed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_error_display_and_source() {
        let full = HubError::QueueFull {
            job_id: Some("job-1".to_string()),
        };
        assert_eq!(full.to_string(), "progress hub queue full");
        assert!(full.is_overflow());
        assert!(full.source().is_none());

        assert_eq!(HubError::Closed.to_string(), "progress hub closed");
        assert!(!HubError::Closed.is_overflow());

        let Err(json_error) = serde_json::from_str::<serde_json::Value>("{") else {
            panic!("expected invalid json");
        };
        let encode = HubError::Encode {
            job_id: "job-2".to_string(),
            source: json_error,
        };
        assert_eq!(encode.to_string(), "failed to encode progress payload");
        assert!(encode.source().is_some());
    }
}
