/*!
 * Error types for the TeleGate transport crate.
 */
use thiserror::Error;

use telegate_core::error::Error as CoreError;

/// Error type for transport operations
#[derive(Error, Debug)]
pub enum TransportError {
    /// No client entry is registered under the key
    #[error("Client not registered: {0}")]
    NotRegistered(String),

    /// The client entry has no live channel yet
    #[error("Client not connected: {0}")]
    NotConnected(String),

    /// The channel was closed locally or by the peer
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Encoding or decoding failed
    #[error("Codec error: {0}")]
    Codec(String),

    /// No codec provider is registered under the name
    #[error("Codec not found: {0}")]
    CodecNotFound(String),

    /// The transport is not available in this build
    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// An endpoint description could not be parsed
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a new codec error
    pub fn codec<S: AsRef<str>>(msg: S) -> Self {
        TransportError::Codec(msg.as_ref().to_string())
    }

    /// Create a new invalid endpoint error
    pub fn invalid_endpoint<S: AsRef<str>>(msg: S) -> Self {
        TransportError::InvalidEndpoint(msg.as_ref().to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Codec(err.to_string())
    }
}

#[cfg(feature = "serial")]
impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        TransportError::Serial(err.to_string())
    }
}
