/*!
 * Error types for the TeleGate dispatch crate.
 */
use thiserror::Error;

/// Error type for dispatch operations
#[derive(Error, Debug)]
pub enum Error {
    /// A required component was never wired into the gateway context
    #[error("Component not initialized: {0}")]
    NotInitialized(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown device, vehicle, point, path or location
    #[error("Not found: {0}")]
    NotFound(String),

    /// Already exists error
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Action handler error
    #[error("Handler error: {0}")]
    Handler(String),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] telegate_transport::TransportError),

    /// Core error
    #[error("Core error: {0}")]
    Core(telegate_core::error::Error),
}

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new not initialized error
    pub fn not_initialized<S: AsRef<str>>(component: S) -> Self {
        Error::NotInitialized(component.as_ref().to_string())
    }

    /// Create a new configuration error
    pub fn config<S: AsRef<str>>(msg: S) -> Self {
        Error::Config(msg.as_ref().to_string())
    }

    /// Create a new not found error
    pub fn not_found<S: AsRef<str>>(msg: S) -> Self {
        Error::NotFound(msg.as_ref().to_string())
    }

    /// Create a new already exists error
    pub fn already_exists<S: AsRef<str>>(msg: S) -> Self {
        Error::AlreadyExists(msg.as_ref().to_string())
    }

    /// Create a new validation error
    pub fn validation<S: AsRef<str>>(msg: S) -> Self {
        Error::Validation(msg.as_ref().to_string())
    }

    /// Create a new handler error
    pub fn handler<S: AsRef<str>>(msg: S) -> Self {
        Error::Handler(msg.as_ref().to_string())
    }

    /// Check if this is a configuration error
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<telegate_core::error::Error> for Error {
    fn from(err: telegate_core::error::Error) -> Self {
        use telegate_core::error::Error as CoreError;
        match err {
            CoreError::Config(msg) => Error::Config(msg),
            CoreError::NotFound(msg) => Error::NotFound(msg),
            CoreError::Validation(msg) => Error::Validation(msg),
            other => Error::Core(other),
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Handler(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Handler(s.to_string())
    }
}
