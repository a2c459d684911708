/*!
 * TCP transport.
 *
 * Each connection, accepted or dialled, becomes a [`TcpChannel`] with its own
 * read task. Telegrams are delimited with the configured frame delimiter.
 */
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn, Instrument};

use telegate_core::logging::telegram_span;
use telegate_core::types::NetChannelType;

use crate::channel::{ChannelId, InboundHandler, SharedChannel, TelegramChannel};
use crate::error::{Result, TransportError};
use crate::frame::{DelimiterFramer, FrameConfig};

const READ_CHUNK: usize = 4096;

/// Pause after a failed `accept`
pub const ACCEPT_PAUSE: Duration = Duration::from_millis(100);

/// One TCP connection
#[derive(Debug)]
pub struct TcpChannel {
    id: ChannelId,
    peer: SocketAddr,
    frame: FrameConfig,
    writer: Mutex<OwnedWriteHalf>,
    open: AtomicBool,
}

impl TcpChannel {
    /// Remote socket address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl TelegramChannel for TcpChannel {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    fn kind(&self) -> NetChannelType {
        NetChannelType::Tcp
    }

    fn remote(&self) -> String {
        self.peer.to_string()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, telegram: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed(self.id.to_string()));
        }
        let framed = self.frame.encode(&telegram);
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(&framed).await {
            self.open.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            let mut writer = self.writer.lock().await;
            writer.shutdown().await?;
        }
        Ok(())
    }
}

fn split_connection(stream: TcpStream, frame: FrameConfig) -> Result<(Arc<TcpChannel>, OwnedReadHalf)> {
    let peer = stream.peer_addr()?;
    let (reader, writer) = stream.into_split();

    let channel = Arc::new(TcpChannel {
        id: ChannelId::new(NetChannelType::Tcp),
        peer,
        frame,
        writer: Mutex::new(writer),
        open: AtomicBool::new(true),
    });
    Ok((channel, reader))
}

/// Wrap a connected stream into a channel and start its read task
pub fn spawn_connection(
    stream: TcpStream,
    frame: FrameConfig,
    handler: Arc<dyn InboundHandler>,
) -> Result<(Arc<TcpChannel>, JoinHandle<()>)> {
    let (channel, reader) = split_connection(stream, frame)?;
    let span = telegram_span(channel.id().as_str(), None);
    let task = tokio::spawn(read_loop(reader, channel.clone(), handler).instrument(span));
    Ok((channel, task))
}

// Marks the channel closed however the read task ends, aborts included.
struct MarkClosed(Arc<TcpChannel>);

impl Drop for MarkClosed {
    fn drop(&mut self) {
        self.0.open.store(false, Ordering::SeqCst);
    }
}

async fn read_loop(mut reader: OwnedReadHalf, channel: Arc<TcpChannel>, handler: Arc<dyn InboundHandler>) {
    let _closed = MarkClosed(channel.clone());
    let mut framer = DelimiterFramer::new(channel.frame);
    let mut buf = vec![0u8; READ_CHUNK];
    let shared: SharedChannel = channel.clone();

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("Peer {} closed the connection", channel.peer);
                break;
            }
            Ok(n) => {
                for telegram in framer.push(&buf[..n]) {
                    handler.on_telegram(shared.clone(), telegram).await;
                }
            }
            Err(e) => {
                warn!("Read from {} failed: {}", channel.peer, e);
                break;
            }
        }
    }

    channel.open.store(false, Ordering::SeqCst);
    handler.on_channel_closed(channel.id()).await;
}

/// Listening TCP endpoint
#[derive(Debug)]
pub struct TcpServer {
    listener: TcpListener,
    frame: FrameConfig,
}

impl TcpServer {
    /// Bind the listening socket
    pub async fn bind(host: &str, port: u16, frame: FrameConfig) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        info!("TCP server listening on {}", listener.local_addr()?);
        Ok(Self { listener, frame })
    }

    /// Address the server is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is aborted.
    ///
    /// Read tasks of accepted connections live in a `JoinSet` owned by this
    /// future and are aborted with it. Failed accepts are logged and retried
    /// after [`ACCEPT_PAUSE`], so descriptor exhaustion does not end the loop.
    pub async fn run(self, handler: Arc<dyn InboundHandler>) -> Result<()> {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                            tokio::time::sleep(ACCEPT_PAUSE).await;
                            continue;
                        }
                    };
                    let _ = stream.set_nodelay(true);
                    match split_connection(stream, self.frame) {
                        Ok((channel, reader)) => {
                            info!("Accepted {} as channel {}", addr, channel.id());
                            let span = telegram_span(channel.id().as_str(), None);
                            connections.spawn(read_loop(reader, channel, handler.clone()).instrument(span));
                        }
                        Err(e) => warn!("Failed to set up connection from {}: {}", addr, e),
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
    }
}

/// Dial a remote endpoint
pub async fn connect(
    host: &str,
    port: u16,
    frame: FrameConfig,
    handler: Arc<dyn InboundHandler>,
) -> Result<(Arc<TcpChannel>, JoinHandle<()>)> {
    let stream = TcpStream::connect((host, port)).await?;
    let _ = stream.set_nodelay(true);
    let (channel, task) = spawn_connection(stream, frame, handler)?;
    info!("Connected to {}:{} as channel {}", host, port, channel.id());
    Ok((channel, task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{CollectingHandler, Inbound};
    use tokio::time::timeout;

    #[test_log::test(tokio::test)]
    async fn test_loopback_telegrams_and_close() {
        let (handler, mut rx) = CollectingHandler::new();
        let server = TcpServer::bind("127.0.0.1", 0, FrameConfig::default()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let server_task = tokio::spawn(server.run(Arc::new(handler)));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"first\nsec").await.unwrap();
        client.write_all(b"ond\n").await.unwrap();

        let mut received = Vec::new();
        for _ in 0..2 {
            match timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap() {
                Inbound::Telegram(_, bytes) => received.push(bytes),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(received, vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]);

        drop(client);
        let closed = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(closed, Inbound::Closed(_)));

        server_task.abort();
    }

    #[tokio::test]
    async fn test_server_keeps_accepting_after_reset_peer() {
        let (handler, mut rx) = CollectingHandler::new();
        let server = TcpServer::bind("127.0.0.1", 0, FrameConfig::default()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let server_task = tokio::spawn(server.run(Arc::new(handler)));

        // reset before the server gets to it
        let reset = TcpStream::connect(addr).await.unwrap();
        reset.set_linger(Some(Duration::ZERO)).unwrap();
        drop(reset);

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"still-up\n").await.unwrap();
        loop {
            match timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap() {
                Inbound::Telegram(_, bytes) => {
                    assert_eq!(&bytes[..], b"still-up");
                    break;
                }
                Inbound::Closed(_) => continue,
            }
        }
        assert!(!server_task.is_finished());
        server_task.abort();
    }

    #[tokio::test]
    async fn test_channel_send_appends_delimiter() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (handler, _rx) = CollectingHandler::new();
        let (channel, _task) = connect("127.0.0.1", addr.port(), FrameConfig::default(), Arc::new(handler))
            .await
            .unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        channel.send(Bytes::from_static(b"{\"cmdKey\":\"go\"}")).await.unwrap();
        let mut buf = vec![0u8; 64];
        let n = timeout(Duration::from_secs(2), peer.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf[..n], b"{\"cmdKey\":\"go\"}\n");

        channel.close().await.unwrap();
        assert!(!channel.is_open());
        assert!(channel.send(Bytes::from_static(b"x")).await.is_err());
    }
}
