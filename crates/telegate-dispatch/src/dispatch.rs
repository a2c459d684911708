/*!
 * Dispatch engine.
 *
 * Turns inbound telegrams into handler invocations:
 *
 * 1. decode the telegram with the configured protocol matcher
 * 2. skip records without a device id
 * 3. skip records whose device has no client entry
 * 4. bind the arrival channel to the client entry
 * 5. resolve the action handler and queue the record on the device's worker
 *
 * Skips are logged and reported, never raised; one bad record does not stop
 * its siblings. Handlers run on one worker task per device, so records of a
 * device are handled in arrival order while the read loop moves on.
 */
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn, Instrument};

use telegate_core::logging::telegram_span;
use telegate_transport::{ChannelId, ClientRegistry, InboundHandler, Protocol, ProtocolMatcher, SharedChannel};

use crate::identity::IdentityResolver;
use crate::repeat::RepeatSendManager;
use crate::route::{ActionHandler, ActionRouteRegistry};

/// Why a decoded record was not dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The record carries no device id
    EmptyDeviceId,
    /// No client entry is registered for the device
    UnknownClient(String),
    /// No handler could be resolved for the device
    NoRoute(String),
    /// The device has several actions and the record names none of them
    Ambiguous(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::EmptyDeviceId => f.write_str("empty device id"),
            SkipReason::UnknownClient(id) => write!(f, "no client entry for [{}]", id),
            SkipReason::NoRoute(id) => write!(f, "no action route for [{}]", id),
            SkipReason::Ambiguous(id) => write!(f, "several action routes for [{}]", id),
        }
    }
}

/// What happened to one telegram
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Records decoded from the telegram
    pub decoded: usize,
    /// Records queued for a handler
    pub dispatched: usize,
    /// Records that acknowledged a pending command
    pub acknowledged: usize,
    /// Skipped records by position in the telegram
    pub skipped: Vec<(usize, SkipReason)>,
}

type Job = (Arc<dyn ActionHandler>, Protocol);

/// Per-device ordered handler queues
#[derive(Debug, Default)]
struct DeviceWorkers {
    queues: Mutex<HashMap<String, (mpsc::UnboundedSender<Job>, JoinHandle<()>)>>,
}

impl DeviceWorkers {
    fn submit(&self, device_id: &str, handler: Arc<dyn ActionHandler>, protocol: Protocol) {
        let mut queues = self.queues.lock();
        let mut job = (handler, protocol);

        if let Some((tx, _)) = queues.get(device_id) {
            match tx.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => job = returned,
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_worker(device_id.to_string(), rx));
        // A fresh receiver is alive, so this cannot fail.
        let _ = tx.send(job);
        queues.insert(device_id.to_string(), (tx, task));
    }

    fn len(&self) -> usize {
        self.queues.lock().len()
    }

    fn shutdown(&self) {
        for (_, (_, task)) in self.queues.lock().drain() {
            task.abort();
        }
    }
}

async fn run_worker(device_id: String, mut rx: mpsc::UnboundedReceiver<Job>) {
    debug!("Worker for device [{}] started", device_id);
    while let Some((handler, protocol)) = rx.recv().await {
        let cmd_key = protocol.cmd_key().to_string();
        if let Err(e) = handler.handle(protocol).await {
            error!("Handler for [{}] failed on [{}]: {}", device_id, cmd_key, e);
        }
    }
}

/// Routes decoded records to their action handlers
pub struct DispatchEngine {
    matcher: Arc<dyn ProtocolMatcher>,
    clients: Arc<ClientRegistry>,
    routes: Arc<ActionRouteRegistry>,
    identity: Arc<IdentityResolver>,
    repeat: Option<RepeatSendManager>,
    fallback: Option<Arc<dyn ActionHandler>>,
    workers: DeviceWorkers,
}

impl fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("matcher", &self.matcher.name())
            .field("routes", &self.routes.len())
            .field("clients", &self.clients.len())
            .field("workers", &self.workers.len())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl DispatchEngine {
    /// Create an engine
    pub fn new(
        matcher: Arc<dyn ProtocolMatcher>,
        clients: Arc<ClientRegistry>,
        routes: Arc<ActionRouteRegistry>,
        identity: Arc<IdentityResolver>,
    ) -> Self {
        Self {
            matcher,
            clients,
            routes,
            identity,
            repeat: None,
            fallback: None,
            workers: DeviceWorkers::default(),
        }
    }

    /// Offer records carrying a correlation id to the repeat-send manager
    pub fn with_repeat_send(mut self, repeat: RepeatSendManager) -> Self {
        self.repeat = Some(repeat);
        self
    }

    /// Handler receiving records no action route claims
    pub fn with_fallback(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    /// Process one inbound telegram
    pub fn on_inbound_telegram(&self, channel: &SharedChannel, telegram: &[u8]) -> DispatchReport {
        let records = self.matcher.decode(telegram);
        let mut report = DispatchReport {
            decoded: records.len(),
            ..DispatchReport::default()
        };

        if records.is_empty() {
            warn!(
                "Telegram of {} bytes on {} decoded to no records",
                telegram.len(),
                channel.id()
            );
            return report;
        }

        for (index, protocol) in records.into_iter().enumerate() {
            match self.dispatch_record(channel, protocol, &mut report) {
                Ok(()) => report.dispatched += 1,
                Err(reason) => {
                    warn!("Skipping record {} from {}: {}", index, channel.id(), reason);
                    report.skipped.push((index, reason));
                }
            }
        }

        report
    }

    fn dispatch_record(
        &self,
        channel: &SharedChannel,
        protocol: Protocol,
        report: &mut DispatchReport,
    ) -> std::result::Result<(), SkipReason> {
        let device_id = protocol.device_id().trim().to_string();
        if device_id.is_empty() {
            return Err(SkipReason::EmptyDeviceId);
        }

        let _span = telegram_span(channel.id().as_str(), Some(&device_id)).entered();

        let entry = self
            .clients
            .get(&device_id)
            .ok_or_else(|| SkipReason::UnknownClient(device_id.clone()))?;
        self.clients.set_channel(entry.key(), channel.clone());

        // only the client a command went to can acknowledge it
        if let (Some(repeat), Some(correlation_id)) = (&self.repeat, protocol.correlation_id()) {
            if repeat.acknowledge(entry.key(), correlation_id) {
                report.acknowledged += 1;
            }
        }

        let handler = self.resolve_handler(&device_id, protocol.cmd_key())?;
        debug!(
            "Dispatching [{}] of device [{}] via {}",
            protocol.cmd_key(),
            device_id,
            channel.id()
        );
        self.workers.submit(&device_id, handler, protocol);
        Ok(())
    }

    /// Find the handler for a record of `device_id` carrying `cmd_key`.
    ///
    /// Tried in order: the route registered under `cmd_key` when it belongs
    /// to the device, the device's only action route, the fallback handler.
    pub fn resolve_handler(&self, device_id: &str, cmd_key: &str) -> std::result::Result<Arc<dyn ActionHandler>, SkipReason> {
        let resolved_device = self.identity.resolve_device_id(device_id);

        if !cmd_key.is_empty() {
            if let Some(route) = self.routes.lookup(cmd_key) {
                let owns = route.device_id() == device_id
                    || resolved_device.as_deref() == Some(route.device_id());
                if owns {
                    return Ok(route.handler().clone());
                }
            }
        }

        let keys = self.identity.resolve_action_keys(device_id).ok().flatten();
        let ambiguous = match keys {
            Some(keys) if keys.len() == 1 => {
                let only = keys.iter().next().and_then(|key| self.routes.lookup(key));
                if let Some(route) = only {
                    return Ok(route.handler().clone());
                }
                false
            }
            Some(keys) => keys.len() > 1,
            None => false,
        };

        if let Some(fallback) = &self.fallback {
            return Ok(fallback.clone());
        }

        if ambiguous {
            Err(SkipReason::Ambiguous(device_id.to_string()))
        } else {
            Err(SkipReason::NoRoute(device_id.to_string()))
        }
    }

    /// Unbind a closed channel and cancel the resends of its client entries
    pub fn channel_closed(&self, channel_id: &ChannelId) -> Vec<String> {
        let keys = self.clients.release_channel(channel_id);
        for key in &keys {
            debug!("Client [{}] lost channel {}", key, channel_id);
            if let Some(repeat) = &self.repeat {
                repeat.cancel_for_client(key);
            }
        }
        keys
    }

    /// Number of device workers started so far
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop every device worker
    pub fn shutdown(&self) {
        self.workers.shutdown();
    }
}

impl Drop for DispatchEngine {
    fn drop(&mut self) {
        self.workers.shutdown();
    }
}

#[async_trait]
impl InboundHandler for DispatchEngine {
    async fn on_telegram(&self, channel: SharedChannel, telegram: Bytes) {
        let span = telegram_span(channel.id().as_str(), None);
        async {
            let report = self.on_inbound_telegram(&channel, &telegram);
            debug!(
                "Telegram decoded to {} records, {} dispatched, {} skipped",
                report.decoded,
                report.dispatched,
                report.skipped.len()
            );
        }
        .instrument(span)
        .await
    }

    async fn on_channel_closed(&self, channel_id: &ChannelId) {
        self.channel_closed(channel_id);
    }
}
