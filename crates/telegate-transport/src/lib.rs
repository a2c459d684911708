/*!
 * TeleGate Transport
 *
 * This crate provides the transport side of the TeleGate gateway: the
 * channel abstraction over TCP, UDP and serial lines, delimiter framing,
 * the client registry, decoded protocol records and the codec registry.
 */

#![warn(missing_docs)]

pub mod channel;
pub mod client;
pub mod codecs;
pub mod error;
pub mod frame;
pub mod matcher;
pub mod mock;
pub mod protocol;
pub mod server;
pub mod tcp;
pub mod udp;

#[cfg(feature = "serial")]
pub mod serial;

pub use channel::{ChannelId, InboundHandler, SharedChannel, TelegramChannel};
pub use client::{entry_key, ClientEndpoint, ClientEntry, ClientRegistry};
pub use error::{Result, TransportError};
pub use frame::FrameConfig;
pub use matcher::{CodecProvider, CodecRegistry, ProtocolMatcher, RequestFrame};
pub use protocol::Protocol;
pub use server::{start, TransportHandle};

/// TeleGate transport crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the transport crate version and the transports compiled in
pub fn init() -> std::result::Result<(), telegate_core::error::Error> {
    tracing::info!(
        "TeleGate Transport {} initialized (transports: {})",
        VERSION,
        available_transports().join(", ")
    );
    Ok(())
}

/// Transports available in this build
pub fn available_transports() -> Vec<&'static str> {
    let mut transports = vec!["tcp", "udp"];

    #[cfg(feature = "serial")]
    transports.push("rxtx");

    transports
}
