//! Error types for the vigil server.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;
use vigil_alerts::AlertError;

/// Errors that can occur in the vigil server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    /// WebSocket error occurred.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Failed to serialize or deserialize a message.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A message exceeded the configured size limit.
    #[error("message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge {
        /// Size of the offending message.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Failed to read or write a configuration file.
    #[error("config file {path}: {source}")]
    ConfigIo {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A metric report could not be queued.
    #[error("metrics for {category} rejected: {reason}")]
    MetricsRejected {
        /// Category the report targeted.
        category: String,
        /// The reason it was rejected.
        reason: String,
    },

    /// Error raised by the alert engine.
    #[error(transparent)]
    Engine(#[from] AlertError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ServerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
