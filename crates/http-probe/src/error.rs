//! Error types for http-probe

use std::net::SocketAddr;
use thiserror::Error;

/// Result type alias for probe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the probe
///
/// Matching and dispatch never fail; only binding the transport and
/// parsing model values from strings can.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid HTTP method
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Unsupported protocol version
    #[error("Unsupported HTTP version: {0}")]
    InvalidVersion(String),

    /// Invalid listen address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// The transport could not bind its listening socket
    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// No tokio runtime to run the accept loop on
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
