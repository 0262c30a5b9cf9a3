//! Error types for the state store.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::Document;

/// Errors raised while loading or persisting documents.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem access failed.
    #[error("document storage I/O failed")]
    Io {
        /// Operation that failed.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A document could not be encoded or decoded.
    #[error("document serialisation failed")]
    Serde {
        /// Document being processed.
        document: Document,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// The in-memory backend was told to fail writes.
    #[error("document backend unavailable")]
    Unavailable {
        /// Document that could not be written.
        document: Document,
    },
}

/// Convenience alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn io_errors_keep_their_source() {
        let err = StoreError::Io {
            operation: "write",
            path: PathBuf::from("downloads.json"),
            source: std::io::Error::other("disk full"),
        };
        assert_eq!(err.to_string(), "document storage I/O failed");
        assert!(err.source().is_some());
    }
}
