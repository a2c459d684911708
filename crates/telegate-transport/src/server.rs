/*!
 * Transport startup.
 *
 * Reads `net.channel.type` and `run.type` and brings up the matching
 * endpoint: a TCP or UDP server, a serial line, or one dialled connection per
 * entry in `client.endpoints`. Dialled connections are re-established when
 * they drop.
 */
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

use telegate_core::config::Settings;
use telegate_core::error::Error as CoreError;
use telegate_core::types::{NetChannelType, RunType};
use telegate_core::logging::component_span;
use telegate_core::utils::{spawn_and_log, with_retry, AbortOnDrop};

use crate::channel::{InboundHandler, SharedChannel};
use crate::client::{ClientEndpoint, ClientRegistry};
use crate::error::{Result, TransportError};
use crate::frame::FrameConfig;
use crate::tcp::{self, TcpServer};
use crate::udp::{self, UdpServer};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_RETRIES: usize = 2;
const RECONNECT_PAUSE: Duration = Duration::from_secs(2);

/// Running transport endpoints
#[derive(Debug)]
pub struct TransportHandle {
    kind: NetChannelType,
    run_type: RunType,
    local_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl TransportHandle {
    /// Transport kind that was started
    pub fn kind(&self) -> NetChannelType {
        self.kind
    }

    /// Server or client operation
    pub fn run_type(&self) -> RunType {
        self.run_type
    }

    /// Bound address of a TCP or UDP server
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop every endpoint task
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("{} transport stopped", self.kind);
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn port_u16(port: u32) -> Result<u16> {
    u16::try_from(port).map_err(|_| TransportError::invalid_endpoint(format!("port {} out of range", port)))
}

/// Start the transport described by `settings`.
///
/// Every `client.endpoints` entry is registered in `clients` under its
/// endpoint key and aliased to its name, in both run types.
pub async fn start(
    settings: &Settings,
    handler: Arc<dyn InboundHandler>,
    clients: Arc<ClientRegistry>,
) -> Result<TransportHandle> {
    let kind = settings.net_channel_type();
    let run_type = settings.run_type();
    let frame = FrameConfig::from_settings(settings);

    let mut endpoints = Vec::new();
    for raw in settings.client_endpoints() {
        let endpoint: ClientEndpoint = raw.parse()?;
        clients.bind_name(&endpoint.name, &endpoint.host, endpoint.port);
        endpoints.push(endpoint);
    }

    let mut handle = TransportHandle {
        kind,
        run_type,
        local_addr: None,
        tasks: Vec::new(),
    };

    if kind == NetChannelType::Rxtx {
        let task = start_serial(settings, frame, handler)?;
        handle.tasks.push(task);
        return Ok(handle);
    }

    match run_type {
        RunType::Server => {
            let host = settings.server_host();
            let port = port_u16(settings.server_port())?;
            match kind {
                NetChannelType::Tcp => {
                    let server = TcpServer::bind(&host, port, frame).await?;
                    handle.local_addr = Some(server.local_addr()?);
                    handle.tasks.push(spawn_and_log("tcp-server", server.run(handler)));
                }
                _ => {
                    let server = UdpServer::bind(&host, port, settings.udp_buffer_size()).await?;
                    handle.local_addr = Some(server.local_addr()?);
                    handle.tasks.push(spawn_and_log("udp-server", server.run(handler)));
                }
            }
        }
        RunType::Client => {
            if endpoints.is_empty() {
                warn!("Client run type without any {} configured", telegate_core::config::CLIENT_ENDPOINTS);
            }
            let buffer_size = settings.udp_buffer_size();
            for endpoint in endpoints {
                let span = component_span("client", Some(&endpoint.name));
                let task = tokio::spawn(
                    keep_connected(kind, endpoint, frame, buffer_size, handler.clone(), clients.clone())
                        .instrument(span),
                );
                handle.tasks.push(task);
            }
        }
    }

    info!("{} transport started in {} mode", kind, run_type);
    Ok(handle)
}

async fn dial(
    kind: NetChannelType,
    endpoint: &ClientEndpoint,
    frame: FrameConfig,
    buffer_size: usize,
    handler: Arc<dyn InboundHandler>,
) -> Result<(SharedChannel, JoinHandle<()>)> {
    let port = port_u16(endpoint.port)?;
    match kind {
        NetChannelType::Tcp => {
            let (channel, task) = tcp::connect(&endpoint.host, port, frame, handler).await?;
            Ok((channel, task))
        }
        NetChannelType::Udp => {
            let (channel, task) = udp::connect(&endpoint.host, port, buffer_size, handler).await?;
            Ok((channel, task))
        }
        NetChannelType::Rxtx => Err(TransportError::UnsupportedTransport(
            "serial lines are not dialled per endpoint".to_string(),
        )),
    }
}

async fn keep_connected(
    kind: NetChannelType,
    endpoint: ClientEndpoint,
    frame: FrameConfig,
    buffer_size: usize,
    handler: Arc<dyn InboundHandler>,
    clients: Arc<ClientRegistry>,
) {
    let key = endpoint.key();
    loop {
        let attempt = with_retry(CONNECT_TIMEOUT, CONNECT_RETRIES, RECONNECT_PAUSE, || {
            let handler = handler.clone();
            let endpoint = &endpoint;
            async move {
                dial(kind, endpoint, frame, buffer_size, handler)
                    .await
                    .map_err(|e| CoreError::runtime(e.to_string()))
            }
        })
        .await;

        match attempt {
            Ok((channel, reader)) => {
                info!("Client [{}] ({}) connected via {}", endpoint.name, key, channel.id());
                clients.set_channel(&key, channel);
                let mut reader = AbortOnDrop(reader);
                let _ = (&mut reader.0).await;
                warn!("Client [{}] ({}) disconnected", endpoint.name, key);
            }
            Err(e) => {
                error!("Could not reach [{}] at {}: {}", endpoint.name, key, e);
            }
        }

        tokio::time::sleep(RECONNECT_PAUSE).await;
    }
}

#[cfg(feature = "serial")]
fn start_serial(settings: &Settings, frame: FrameConfig, handler: Arc<dyn InboundHandler>) -> Result<JoinHandle<()>> {
    let name = settings.server_host();
    let baud_rate = settings.server_port();
    let (_channel, task) = crate::serial::open(&name, baud_rate, frame, handler)?;
    Ok(task)
}

#[cfg(not(feature = "serial"))]
fn start_serial(_settings: &Settings, _frame: FrameConfig, _handler: Arc<dyn InboundHandler>) -> Result<JoinHandle<()>> {
    Err(TransportError::UnsupportedTransport(
        "RXTX requires the `serial` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{CollectingHandler, Inbound};
    use telegate_core::config::{CLIENT_ENDPOINTS, NET_CHANNEL_TYPE, RUN_TYPE, SERVER_HOST, SERVER_PORT};
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_tcp_server_mode() {
        let settings = Settings::from_pairs(&[
            (NET_CHANNEL_TYPE, "tcp"),
            (SERVER_HOST, "127.0.0.1"),
            (SERVER_PORT, "0"),
            (CLIENT_ENDPOINTS, "A001=10.0.0.5:4001"),
        ])
        .unwrap();
        let clients = Arc::new(ClientRegistry::new());
        let (handler, mut rx) = CollectingHandler::new();

        let mut handle = start(&settings, Arc::new(handler), clients.clone()).await.unwrap();
        assert_eq!(handle.kind(), NetChannelType::Tcp);
        assert_eq!(clients.resolve_key("A001").as_deref(), Some("10.0.0.5:4001"));

        let addr = handle.local_addr().unwrap();
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"hello\n").await.unwrap();

        let inbound = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(inbound, Inbound::Telegram(_, ref b) if &b[..] == b"hello"));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_client_mode_binds_dialled_channel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let endpoint = format!("A001=127.0.0.1:{}", port);

        let settings = Settings::from_pairs(&[
            (NET_CHANNEL_TYPE, "TCP"),
            (RUN_TYPE, "CLIENT"),
            (CLIENT_ENDPOINTS, endpoint.as_str()),
        ])
        .unwrap();
        let clients = Arc::new(ClientRegistry::new());
        let (handler, _rx) = CollectingHandler::new();

        let mut handle = start(&settings, Arc::new(handler), clients.clone()).await.unwrap();
        let _accepted = timeout(Duration::from_secs(2), listener.accept()).await.unwrap().unwrap();

        let entry = clients.get("A001").unwrap();
        for _ in 0..50 {
            if entry.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(entry.is_connected());

        handle.shutdown();
    }

    async fn assert_no_telegram(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Inbound>) {
        loop {
            match timeout(Duration::from_millis(300), rx.recv()).await {
                Ok(Some(Inbound::Telegram(_, bytes))) => panic!("telegram delivered after shutdown: {:?}", bytes),
                Ok(Some(Inbound::Closed(_))) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepted_connections() {
        let settings = Settings::from_pairs(&[
            (NET_CHANNEL_TYPE, "TCP"),
            (SERVER_HOST, "127.0.0.1"),
            (SERVER_PORT, "0"),
        ])
        .unwrap();
        let (handler, mut rx) = CollectingHandler::new();
        let mut handle = start(&settings, Arc::new(handler), Arc::new(ClientRegistry::new()))
            .await
            .unwrap();
        let addr = handle.local_addr().unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"before\n").await.unwrap();
        let inbound = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(inbound, Inbound::Telegram(_, ref b) if &b[..] == b"before"));

        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let _ = stream.write_all(b"after-shutdown\n").await;
        assert_no_telegram(&mut rx).await;
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_dialled_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("A001=127.0.0.1:{}", listener.local_addr().unwrap().port());
        let settings = Settings::from_pairs(&[
            (NET_CHANNEL_TYPE, "TCP"),
            (RUN_TYPE, "CLIENT"),
            (CLIENT_ENDPOINTS, endpoint.as_str()),
        ])
        .unwrap();
        let clients = Arc::new(ClientRegistry::new());
        let (handler, mut rx) = CollectingHandler::new();

        let mut handle = start(&settings, Arc::new(handler), clients.clone()).await.unwrap();
        let (mut peer, _) = timeout(Duration::from_secs(2), listener.accept()).await.unwrap().unwrap();

        let entry = clients.get("A001").unwrap();
        for _ in 0..50 {
            if entry.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(entry.is_connected());

        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let _ = peer.write_all(b"after-shutdown\n").await;
        assert_no_telegram(&mut rx).await;
        assert!(!entry.channel().map_or(false, |channel| channel.is_open()));
    }

    #[cfg(not(feature = "serial"))]
    #[tokio::test]
    async fn test_serial_requires_feature() {
        let settings = Settings::from_pairs(&[(NET_CHANNEL_TYPE, "RXTX")]).unwrap();
        let (handler, _rx) = CollectingHandler::new();
        let err = start(&settings, Arc::new(handler), Arc::new(ClientRegistry::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedTransport(_)));
    }
}
