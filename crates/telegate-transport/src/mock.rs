/*!
 * In-memory channel and handler for tests and simulation.
 *
 * [`MemoryChannel`] records every telegram sent through it instead of writing
 * to a socket, and can be told to fail sends. [`CollectingHandler`] forwards
 * inbound telegrams to an mpsc receiver.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use telegate_core::types::NetChannelType;

use crate::channel::{ChannelId, InboundHandler, SharedChannel, TelegramChannel};
use crate::error::{Result, TransportError};

/// Channel keeping sent telegrams in memory
#[derive(Debug)]
pub struct MemoryChannel {
    id: ChannelId,
    open: AtomicBool,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<Bytes>>,
}

impl MemoryChannel {
    /// Create an open channel with the given id
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self {
            id: ChannelId::from_string(id),
            open: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Create a channel already wrapped as a [`SharedChannel`]
    pub fn shared<S: AsRef<str>>(id: S) -> SharedChannel {
        Arc::new(Self::new(id))
    }

    /// Telegrams sent so far
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    /// Number of telegrams sent so far
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Make subsequent sends fail with an I/O error
    pub fn set_fail(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TelegramChannel for MemoryChannel {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    fn kind(&self) -> NetChannelType {
        NetChannelType::Tcp
    }

    fn remote(&self) -> String {
        format!("memory:{}", self.id)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, telegram: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed(self.id.to_string()));
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated send failure",
            )));
        }
        self.sent.lock().push(telegram);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Inbound event captured by [`CollectingHandler`]
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A telegram arrived on the channel
    Telegram(ChannelId, Bytes),
    /// The channel closed
    Closed(ChannelId),
}

/// Handler forwarding everything it receives to a channel
#[derive(Debug, Clone)]
pub struct CollectingHandler {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl CollectingHandler {
    /// Create a handler and the receiver of its events
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl InboundHandler for CollectingHandler {
    async fn on_telegram(&self, channel: SharedChannel, telegram: Bytes) {
        let _ = self.tx.send(Inbound::Telegram(channel.id().clone(), telegram));
    }

    async fn on_channel_closed(&self, channel_id: &ChannelId) {
        let _ = self.tx.send(Inbound::Closed(channel_id.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_channel_records_and_fails() {
        let channel = MemoryChannel::new("mem");
        channel.send(Bytes::from_static(b"one")).await.unwrap();

        channel.set_fail(true);
        assert!(channel.send(Bytes::from_static(b"two")).await.is_err());
        channel.set_fail(false);

        channel.close().await.unwrap();
        assert!(!channel.is_open());
        assert!(matches!(
            channel.send(Bytes::from_static(b"three")).await,
            Err(TransportError::ChannelClosed(_))
        ));
        assert_eq!(channel.sent_count(), 1);
    }
}
