//! Error types for the KNX fleet server
//!
//! One crate-wide error enum with constructor helpers and a retryability
//! classification that drives the gateway connect backoff.

use thiserror::Error;

/// Result type alias for fleet operations
pub type Result<T> = std::result::Result<T, KnxError>;

/// Error types for KNX fleet operations
#[derive(Error, Debug)]
pub enum KnxError {
    /// Gateway unreachable or dropped
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed group or individual address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Client request referenced a room that is not configured
    #[error("Room not found: {0}")]
    UnknownRoom(String),

    /// Client request referenced a device that does not exist in its room
    #[error("Device not found: {0}")]
    UnknownDevice(String),

    /// Configuration referenced a device type outside the supported set
    #[error("Unsupported device type: {0}")]
    UnsupportedDeviceType(String),

    /// A subscriber channel rejected or errored on a push
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl KnxError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid address error
    pub fn invalid_address<S: Into<String>>(msg: S) -> Self {
        Self::InvalidAddress(msg.into())
    }

    /// Create an unknown room error
    pub fn unknown_room<S: Into<String>>(room_id: S) -> Self {
        Self::UnknownRoom(room_id.into())
    }

    /// Create an unknown device error
    pub fn unknown_device<S: Into<String>>(name: S) -> Self {
        Self::UnknownDevice(name.into())
    }

    /// Create an unsupported device type error
    pub fn unsupported_device_type<S: Into<String>>(tag: S) -> Self {
        Self::UnsupportedDeviceType(tag.into())
    }

    /// Create a delivery error
    pub fn delivery<S: Into<String>>(msg: S) -> Self {
        Self::Delivery(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Whether a retry with backoff can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, KnxError::Connection(_) | KnxError::Timeout(_))
    }

    /// Whether this error is scoped to one client request
    ///
    /// Request-scoped errors are reported to that client as an error frame
    /// and never affect other rooms or subscribers.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            KnxError::UnknownRoom(_) | KnxError::UnknownDevice(_) | KnxError::InvalidAddress(_)
        )
    }
}
