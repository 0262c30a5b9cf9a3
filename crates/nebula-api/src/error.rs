//! Errors raised while starting or running the HTTP listener.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result alias for API server operations.
pub type ApiServerResult<T> = Result<T, ApiServerError>;

/// Listener lifecycle failures. Request-level failures never surface here.
#[derive(Debug, Error)]
pub enum ApiServerError {
    /// The listener could not bind.
    #[error("failed to bind api listener")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The bound socket did not report its address.
    #[error("api listener address unavailable")]
    LocalAddr {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The accept loop stopped before shutdown was requested.
    #[error("api server terminated unexpectedly")]
    Serve {
        /// Address the listener was bound to.
        addr: SocketAddr,
        /// Underlying IO error.
        source: io::Error,
    },
}

impl ApiServerError {
    /// Address the failing listener was bound to or asked for.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        match self {
            Self::Bind { addr, .. } | Self::LocalAddr { addr, .. } | Self::Serve { addr, .. } => {
                *addr
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn listener_errors_keep_address_and_source() -> Result<(), Box<dyn std::error::Error>> {
        let addr: SocketAddr = "127.0.0.1:8080".parse()?;
        let bind = ApiServerError::Bind {
            addr,
            source: io::Error::new(io::ErrorKind::AddrInUse, "busy"),
        };
        assert_eq!(bind.to_string(), "failed to bind api listener");
        assert_eq!(bind.addr(), addr);
        assert!(bind.source().is_some());

        let serve = ApiServerError::Serve {
            addr,
            source: io::Error::new(io::ErrorKind::BrokenPipe, "lost"),
        };
        assert_eq!(serve.to_string(), "api server terminated unexpectedly");
        Ok(())
    }
}
