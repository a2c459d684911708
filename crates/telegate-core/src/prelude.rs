/*!
 * Prelude module for TeleGate Core.
 *
 * This module re-exports commonly used types and functions from the TeleGate Core crate
 * to make them easier to import.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::{Fields, NetChannelType, RequestKind, RunType, Value};

// Re-export settings types
pub use crate::config::{Settings, SettingsBuilder};

// Re-export utility functions
pub use crate::utils::{millis_to_duration, spawn_and_log, with_retry, with_timeout, AbortOnDrop};

pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
