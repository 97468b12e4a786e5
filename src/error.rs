//! Error types for the Rendezvous Exchange Server
//!
//! Process-level failures: configuration, listener binding and serving.
//! Request-level failures (bad JSON, unknown codes) never surface here;
//! they are answered directly by the REST layer with a 4xx response.

use std::net::SocketAddr;
use thiserror::Error;

/// Unified error type for the server
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Server Errors
    // =========================================================================
    #[error("Failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Server(String),

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error should stop the process.
    ///
    /// Only startup problems are fatal; everything else is logged and the
    /// server keeps running.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::Bind { .. } | Error::Metrics(_)
        )
    }
}

/// Result type alias for the server
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_errors() {
        let err = Error::Configuration("ttl must be positive".into());
        assert!(err.is_fatal());

        let err = Error::Bind {
            addr: "127.0.0.1:3000".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("127.0.0.1:3000"));

        let err = Error::Server("connection reset".into());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_fatal());
    }
}
