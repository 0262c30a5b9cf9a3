//! # Design
//!
//! - Centralize application-level errors for bootstrap and shutdown.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: nebula_config::ConfigError,
    },
    /// API server operations failed.
    #[error("api server operation failed")]
    ApiServer {
        /// Operation identifier.
        operation: &'static str,
        /// Source API server error.
        source: nebula_api::ApiServerError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: nebula_telemetry::TelemetryError,
    },
    /// State persistence operations failed.
    #[error("state persistence failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Source store error.
        source: nebula_runtime::StoreError,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: nebula_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn api_server(
        operation: &'static str,
        source: nebula_api::ApiServerError,
    ) -> Self {
        Self::ApiServer { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: nebula_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn store(operation: &'static str, source: nebula_runtime::StoreError) -> Self {
        Self::Store { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn app_error_helpers_build_variants() {
        let config = AppError::config(
            "load",
            nebula_config::ConfigError::Io {
                operation: "read",
                path: PathBuf::from("config.json"),
                source: io::Error::other("io"),
            },
        );
        assert!(matches!(config, AppError::Config { .. }));
        assert_eq!(config.to_string(), "configuration operation failed");
        assert!(config.source().is_some());

        let api = AppError::api_server(
            "serve",
            nebula_api::ApiServerError::Serve {
                addr: std::net::SocketAddr::from(([127, 0, 0, 1], 8080)),
                source: io::Error::other("io"),
            },
        );
        assert!(matches!(api, AppError::ApiServer { .. }));

        let store = AppError::store(
            "open",
            nebula_runtime::StoreError::Io {
                operation: "create_dir",
                path: PathBuf::from("data"),
                source: io::Error::other("io"),
            },
        );
        assert!(matches!(store, AppError::Store { .. }));
    }
}
