//! Codecs shipped with TeleGate.
//!
//! Vendor codecs live outside this crate and register through
//! [`CodecRegistry::register_provider`](crate::matcher::CodecRegistry::register_provider).

pub mod json;

pub use json::{JsonCodec, JsonCodecProvider};
