/*!
 * Transport channel abstraction.
 *
 * Every physical link (a TCP connection, a UDP peer, a serial line) is exposed
 * to the rest of the gateway as a [`TelegramChannel`]. Inbound telegrams are
 * delivered to an [`InboundHandler`] together with the channel they arrived on.
 */
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use telegate_core::types::NetChannelType;

use crate::error::Result;

/// Unique identifier of a live channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(String);

impl ChannelId {
    /// Create a new random ID tagged with the transport kind
    pub fn new(kind: NetChannelType) -> Self {
        Self(format!("{}-{}", kind.to_string().to_ascii_lowercase(), Uuid::new_v4()))
    }

    /// Create an ID from a string
    pub fn from_string<S: AsRef<str>>(s: S) -> Self {
        Self(s.as_ref().to_string())
    }

    /// Get the string representation of the ID
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A bidirectional link to one vehicle or station
#[async_trait]
pub trait TelegramChannel: Send + Sync + fmt::Debug {
    /// Get the channel ID
    fn id(&self) -> &ChannelId;

    /// Get the transport kind
    fn kind(&self) -> NetChannelType;

    /// Human readable description of the remote end
    fn remote(&self) -> String;

    /// Whether the channel can still carry telegrams
    fn is_open(&self) -> bool;

    /// Send one telegram; framing is applied by the channel
    async fn send(&self, telegram: Bytes) -> Result<()>;

    /// Close the channel
    async fn close(&self) -> Result<()>;
}

/// A reference-counted channel handle
pub type SharedChannel = Arc<dyn TelegramChannel>;

/// Receiver of inbound telegrams
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Called once per telegram, in arrival order for a given channel
    async fn on_telegram(&self, channel: SharedChannel, telegram: Bytes);

    /// Called once when a channel stops carrying telegrams
    async fn on_channel_closed(&self, _channel_id: &ChannelId) {}
}
