/*!
 * Logging functionality for TeleGate.
 *
 * Tracing subscriber setup plus span helpers shared by the transport and
 * dispatch crates.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Settings;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info", false)
}

/// Initialize the logging system from the `log.*` settings
pub fn init_from_settings(settings: &Settings) -> Result<()> {
    init_with_filter(&settings.log_level(), settings.log_json())
}

/// Initialize the logging system with a specific filter
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "telegate_dispatch=debug")
/// * `json` - Emit one JSON object per event instead of human readable lines
///
/// `RUST_LOG`, when set, takes precedence over `filter`.
pub fn init_with_filter(filter: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let result = if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .try_init()
    };

    result.map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a new span for a component
///
/// # Arguments
///
/// * `name` - The name of the component
/// * `id` - An optional ID for the component instance
pub fn component_span(name: &str, id: Option<&str>) -> Span {
    match id {
        Some(id) => tracing::info_span!("component", name = %name, id = %id),
        None => tracing::info_span!("component", name = %name),
    }
}

/// Create a new span for a single telegram exchange
///
/// # Arguments
///
/// * `channel` - The channel the telegram travelled on
/// * `device_id` - The device the telegram belongs to, when already known
pub fn telegram_span(channel: &str, device_id: Option<&str>) -> Span {
    match device_id {
        Some(device_id) => tracing::debug_span!("telegram", channel = %channel, device = %device_id),
        None => tracing::debug_span!("telegram", channel = %channel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        // A second init in the same process reports an error instead of panicking
        let _ = init();
        assert!(init().is_err());
    }

    #[test]
    fn test_spans_can_be_created() {
        let span = component_span("dispatch", Some("engine-1"));
        let _ = span.id();

        let span = telegram_span("tcp-1", None);
        let _ = span.id();
    }
}
