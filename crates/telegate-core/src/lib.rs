/*!
 * TeleGate Core
 *
 * This crate provides the shared foundation of the TeleGate gateway:
 * settings, the base error type, logging setup and the data types that
 * travel between transports and the dispatch engine.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;
pub mod utils;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use anyhow;
    pub use chrono;
    pub use futures;
    pub use tokio;
    pub use tracing;
}

/// TeleGate core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization: installs logging from the given settings
pub fn init(settings: &config::Settings) -> Result<(), error::Error> {
    logging::init_from_settings(settings)?;
    tracing::info!("TeleGate Core {} initialized", VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
