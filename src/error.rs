//! Error types for the WMP driver
//!
//! Nothing in the driver is fatal to the process. Transport faults are logged
//! and recovered by reconnecting, protocol faults are logged and dropped, and
//! only correlation timeouts and configuration problems surface to callers.

use thiserror::Error;

/// Result type alias for WMP operations
pub type Result<T> = std::result::Result<T, WmpError>;

/// Error types for WMP driver operations
#[derive(Error, Debug)]
pub enum WmpError {
    /// Connection errors (socket failures, refused connects)
    #[error("Connection error: {0}")]
    Connection(String),

    /// The transport currently has no open socket
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Correlation timeouts (identify, poll completion, acknowledgment)
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Malformed or unexpected protocol lines
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Attribute or value that cannot be encoded for the device
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background worker or channel has gone away
    #[error("Shut down: {0}")]
    Shutdown(String),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl WmpError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a not-connected error
    pub fn not_connected<S: Into<String>>(msg: S) -> Self {
        Self::NotConnected(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an encoding error
    pub fn encoding<S: Into<String>>(msg: S) -> Self {
        Self::Encoding(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a shutdown error
    pub fn shutdown<S: Into<String>>(msg: S) -> Self {
        Self::Shutdown(msg.into())
    }

    /// Whether this error is a correlation timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, WmpError::Timeout(_))
    }

    /// Whether the failed operation may succeed if tried again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WmpError::Connection(_)
                | WmpError::NotConnected(_)
                | WmpError::Timeout(_)
                | WmpError::Io(_)
        )
    }
}

impl From<config::ConfigError> for WmpError {
    fn from(err: config::ConfigError) -> Self {
        WmpError::Config(err.to_string())
    }
}
