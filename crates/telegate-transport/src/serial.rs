/*!
 * Serial line transport (`RXTX` channel type).
 *
 * The port is read on a blocking thread; chunks are handed to an async task
 * that frames them and calls the inbound handler. Writes also run on the
 * blocking pool.
 */
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use telegate_core::types::NetChannelType;

use crate::channel::{ChannelId, InboundHandler, SharedChannel, TelegramChannel};
use crate::error::{Result, TransportError};
use crate::frame::{DelimiterFramer, FrameConfig};

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 1024;

/// An open serial line
pub struct SerialChannel {
    id: ChannelId,
    name: String,
    frame: FrameConfig,
    port: Arc<Mutex<Box<dyn SerialPort>>>,
    open: Arc<AtomicBool>,
}

impl std::fmt::Debug for SerialChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialChannel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("open", &self.is_open())
            .finish()
    }
}

#[async_trait]
impl TelegramChannel for SerialChannel {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    fn kind(&self) -> NetChannelType {
        NetChannelType::Rxtx
    }

    fn remote(&self) -> String {
        self.name.clone()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, telegram: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed(self.id.to_string()));
        }
        let framed = self.frame.encode(&telegram);
        let port = self.port.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut port = port.lock();
            port.write_all(&framed)?;
            port.flush()
        })
        .await
        .map_err(|e| TransportError::Serial(e.to_string()))??;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Open a serial port with 8N1 framing and start reading from it
pub fn open(
    name: &str,
    baud_rate: u32,
    frame: FrameConfig,
    handler: Arc<dyn InboundHandler>,
) -> Result<(Arc<SerialChannel>, JoinHandle<()>)> {
    let port = serialport::new(name, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()?;
    let reader = port.try_clone()?;
    info!("Opened serial port {} at {} baud", name, baud_rate);

    let open = Arc::new(AtomicBool::new(true));
    let channel = Arc::new(SerialChannel {
        id: ChannelId::new(NetChannelType::Rxtx),
        name: name.to_string(),
        frame,
        port: Arc::new(Mutex::new(port)),
        open: open.clone(),
    });

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
    let port_name = name.to_string();
    tokio::task::spawn_blocking(move || read_blocking(reader, port_name, open, tx));

    let shared = channel.clone();
    let task = tokio::spawn(async move {
        let _stop = StopReader(shared.open.clone());
        let mut framer = DelimiterFramer::new(frame);
        let as_channel: SharedChannel = shared.clone();
        while let Some(chunk) = rx.recv().await {
            for telegram in framer.push(&chunk) {
                handler.on_telegram(as_channel.clone(), telegram).await;
            }
        }
        shared.open.store(false, Ordering::SeqCst);
        handler.on_channel_closed(shared.id()).await;
    });

    Ok((channel, task))
}

// Clears the open flag when the dispatch task ends or is aborted, which stops
// the blocking reader at its next read timeout.
struct StopReader(Arc<AtomicBool>);

impl Drop for StopReader {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn read_blocking(mut port: Box<dyn SerialPort>, name: String, open: Arc<AtomicBool>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; READ_CHUNK];
    while open.load(Ordering::SeqCst) && !tx.is_closed() {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                warn!("Serial read on {} failed: {}", name, e);
                break;
            }
        }
    }
    open.store(false, Ordering::SeqCst);
    debug!("Serial reader for {} stopped", name);
}
