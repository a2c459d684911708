/*!
 * Error types for the TeleGate core crate.
 */
use thiserror::Error;

/// Error type for TeleGate core operations
#[derive(Error, Debug)]
pub enum Error {
    /// A required setting is missing, empty or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// An identifier could not be resolved
    #[error("Not found: {0}")]
    NotFound(String),

    /// An argument failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Runtime error (logging setup, task failures)
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for TeleGate core operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new configuration error
    pub fn config<S: AsRef<str>>(msg: S) -> Self {
        Error::Config(msg.as_ref().to_string())
    }

    /// Create a new not found error
    pub fn not_found<S: AsRef<str>>(msg: S) -> Self {
        Error::NotFound(msg.as_ref().to_string())
    }

    /// Create a new validation error
    pub fn validation<S: AsRef<str>>(msg: S) -> Self {
        Error::Validation(msg.as_ref().to_string())
    }

    /// Create a new runtime error
    pub fn runtime<S: AsRef<str>>(msg: S) -> Self {
        Error::Runtime(msg.as_ref().to_string())
    }

    /// Create a new timeout error
    pub fn timeout<S: AsRef<str>>(msg: S) -> Self {
        Error::Timeout(msg.as_ref().to_string())
    }

    /// Create a new other error
    pub fn other<S: AsRef<str>>(msg: S) -> Self {
        Error::Other(msg.as_ref().to_string())
    }

    /// Whether this error reports a missing or malformed setting
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Whether this error reports an unresolvable identifier
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
