/*!
 * UDP transport.
 *
 * One datagram is one telegram. A single socket serves every peer; each peer
 * address gets its own [`UdpChannel`] so replies go back to the sender.
 *
 * UDP has no close, so the server remembers a bounded number of peers. When
 * the table is full, peers idle for longer than the idle limit are dropped,
 * then the least recently heard one. A dropped peer's channel is closed and
 * reported through `on_channel_closed`.
 */
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use telegate_core::types::NetChannelType;

use crate::channel::{ChannelId, InboundHandler, SharedChannel, TelegramChannel};
use crate::error::{Result, TransportError};

/// Datagram channel towards one peer
#[derive(Debug)]
pub struct UdpChannel {
    id: ChannelId,
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    open: AtomicBool,
}

impl UdpChannel {
    fn new(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self {
            id: ChannelId::new(NetChannelType::Udp),
            socket,
            peer,
            open: AtomicBool::new(true),
        }
    }

    /// Remote socket address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl TelegramChannel for UdpChannel {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    fn kind(&self) -> NetChannelType {
        NetChannelType::Udp
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
        let sent = self.socket.send_to(&telegram, self.peer).await?;
        if sent != telegram.len() {
            warn!("Datagram to {} truncated: {} of {} bytes", self.peer, sent, telegram.len());
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Peers a UDP server remembers at most
pub const MAX_UDP_PEERS: usize = 1024;

/// Silence after which a UDP peer may be forgotten
pub const UDP_PEER_IDLE: Duration = Duration::from_secs(300);

#[derive(Debug)]
struct PeerTable {
    capacity: usize,
    idle: Duration,
    peers: HashMap<SocketAddr, (Arc<UdpChannel>, Instant)>,
}

impl PeerTable {
    fn new(capacity: usize, idle: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            idle,
            peers: HashMap::new(),
        }
    }

    /// Channel of `peer`, plus the channels evicted to make room for it
    fn touch(
        &mut self,
        socket: &Arc<UdpSocket>,
        peer: SocketAddr,
        now: Instant,
    ) -> (Arc<UdpChannel>, Vec<Arc<UdpChannel>>) {
        if let Some((channel, seen)) = self.peers.get_mut(&peer) {
            *seen = now;
            return (channel.clone(), Vec::new());
        }

        let mut evicted = Vec::new();
        if self.peers.len() >= self.capacity {
            let idle = self.idle;
            let stale: Vec<SocketAddr> = self
                .peers
                .iter()
                .filter(|(_, (_, seen))| now.saturating_duration_since(*seen) >= idle)
                .map(|(addr, _)| *addr)
                .collect();
            evicted.extend(stale.iter().filter_map(|addr| self.peers.remove(addr)).map(|(c, _)| c));

            if self.peers.len() >= self.capacity {
                let oldest = self
                    .peers
                    .iter()
                    .min_by_key(|(_, (_, seen))| *seen)
                    .map(|(addr, _)| *addr);
                if let Some((channel, _)) = oldest.and_then(|addr| self.peers.remove(&addr)) {
                    evicted.push(channel);
                }
            }
        }

        debug!("New UDP peer {}", peer);
        let channel = Arc::new(UdpChannel::new(socket.clone(), peer));
        self.peers.insert(peer, (channel.clone(), now));
        (channel, evicted)
    }

    fn len(&self) -> usize {
        self.peers.len()
    }
}

/// UDP socket serving many peers
#[derive(Debug)]
pub struct UdpServer {
    socket: Arc<UdpSocket>,
    buffer_size: usize,
    peer_capacity: usize,
    peer_idle: Duration,
}

impl UdpServer {
    /// Bind the socket
    pub async fn bind(host: &str, port: u16, buffer_size: usize) -> Result<Self> {
        let socket = UdpSocket::bind((host, port)).await?;
        info!("UDP server listening on {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
            buffer_size,
            peer_capacity: MAX_UDP_PEERS,
            peer_idle: UDP_PEER_IDLE,
        })
    }

    /// Change how many peers are remembered and when they count as idle
    pub fn with_peer_limit(mut self, capacity: usize, idle: Duration) -> Self {
        self.peer_capacity = capacity;
        self.peer_idle = idle;
        self
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Create a channel replying to `peer` from this socket
    pub fn channel_for(&self, peer: SocketAddr) -> Arc<UdpChannel> {
        Arc::new(UdpChannel::new(self.socket.clone(), peer))
    }

    /// Receive datagrams until the task is aborted
    pub async fn run(self, handler: Arc<dyn InboundHandler>) -> Result<()> {
        let mut peers = PeerTable::new(self.peer_capacity, self.peer_idle);
        let mut buf = vec![0u8; self.buffer_size];

        loop {
            let (n, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    // ICMP port unreachable surfaces here on some platforms
                    warn!("UDP receive failed: {}", e);
                    continue;
                }
            };

            let (channel, evicted) = peers.touch(&self.socket, peer, Instant::now());
            for old in evicted {
                debug!("Forgetting UDP peer {} ({} remembered)", old.peer, peers.len());
                old.open.store(false, Ordering::SeqCst);
                handler.on_channel_closed(old.id()).await;
            }

            let shared: SharedChannel = channel;
            handler.on_telegram(shared, Bytes::copy_from_slice(&buf[..n])).await;
        }
    }
}

/// Open a socket towards one remote endpoint and start receiving from it
pub async fn connect(
    host: &str,
    port: u16,
    buffer_size: usize,
    handler: Arc<dyn InboundHandler>,
) -> Result<(Arc<UdpChannel>, JoinHandle<()>)> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.connect((host, port)).await?;
    let peer = socket.peer_addr()?;
    let socket = Arc::new(socket);

    let channel = Arc::new(UdpChannel::new(socket.clone(), peer));
    let reader = channel.clone();

    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; buffer_size];
        loop {
            match socket.recv(&mut buf).await {
                Ok(n) => {
                    let shared: SharedChannel = reader.clone();
                    handler.on_telegram(shared, Bytes::copy_from_slice(&buf[..n])).await;
                }
                Err(e) => {
                    warn!("UDP receive from {} failed: {}", peer, e);
                    if !reader.is_open() {
                        break;
                    }
                }
            }
        }
        handler.on_channel_closed(reader.id()).await;
    });

    info!("UDP channel {} targets {}", channel.id(), peer);
    Ok((channel, task))
}
