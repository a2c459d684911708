/*!
 * Repeat-send manager.
 *
 * Outbound commands are tracked by correlation id until the vehicle
 * acknowledges them. Each pending command owns a timer task that re-sends it
 * with exponential backoff; after the last attempt the command is reported as
 * failed and never sent again. Acknowledgements, cancellation and channel
 * close abort the timer.
 */
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use telegate_core::config::{
    Settings, REPEAT_ACK_TIMEOUT_MS, REPEAT_BACKOFF_MULTIPLIER, REPEAT_MAX_ATTEMPTS, REPEAT_MAX_BACKOFF_MS,
};
use telegate_core::types::RequestKind;
use telegate_core::utils::millis_to_duration;
use telegate_transport::{ClientRegistry, ProtocolMatcher};

use crate::error::Result;
use crate::request::Request;

/// Resend schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatPolicy {
    /// Total number of sends, the first one included
    pub max_attempts: u32,
    /// Wait after the first send before re-sending
    pub ack_timeout: Duration,
    /// Factor applied to the wait after every further send
    pub backoff_multiplier: f64,
    /// Upper bound of the wait
    pub max_backoff: Duration,
}

impl Default for RepeatPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            ack_timeout: Duration::from_millis(2000),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RepeatPolicy {
    /// Read the `repeat.*` settings
    pub fn from_settings(settings: &Settings) -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: settings
                .get_int_or(REPEAT_MAX_ATTEMPTS, defaults.max_attempts as i64)
                .clamp(1, u32::MAX as i64) as u32,
            ack_timeout: millis_to_duration(
                settings.get_int_or(REPEAT_ACK_TIMEOUT_MS, defaults.ack_timeout.as_millis() as i64),
            ),
            backoff_multiplier: settings
                .get_float_or(REPEAT_BACKOFF_MULTIPLIER, defaults.backoff_multiplier)
                .max(1.0),
            max_backoff: millis_to_duration(
                settings.get_int_or(REPEAT_MAX_BACKOFF_MS, defaults.max_backoff.as_millis() as i64),
            ),
        }
    }

    /// Wait after the given attempt (1-based) before the next one
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let factor = self.backoff_multiplier.powi(exponent);
        let millis = self.ack_timeout.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// Key pairing an outbound command with its acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Id derived from the addressed device and the request kind
    pub fn for_request(device_id: &str, kind: RequestKind) -> Self {
        Self(format!("{}:{}", device_id, kind))
    }

    /// Create an id from a string
    pub fn from_string<S: Into<String>>(s: S) -> Self {
        Self(s.into())
    }

    /// Get the string representation of the id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Final state of a tracked command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryOutcome {
    /// Acknowledged after the given number of sends
    Acknowledged {
        /// Sends performed
        attempts: u32,
    },
    /// Never acknowledged; every attempt was used
    Failed {
        /// Sends performed
        attempts: u32,
    },
    /// Cancelled, by request or because the channel closed
    Cancelled,
    /// Replaced by a newer command with the same correlation id
    Superseded,
}

impl DeliveryOutcome {
    /// Whether the vehicle acknowledged the command
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, DeliveryOutcome::Acknowledged { .. })
    }
}

/// Outcome broadcast to subscribers
#[derive(Debug, Clone)]
pub struct DeliveryEvent {
    /// Correlation id of the command
    pub correlation_id: CorrelationId,
    /// Client entry the command was sent to
    pub client_key: String,
    /// How it ended
    pub outcome: DeliveryOutcome,
}

/// Handle to the outcome of one tracked command
#[derive(Debug)]
pub struct DeliveryHandle {
    correlation_id: CorrelationId,
    rx: oneshot::Receiver<DeliveryOutcome>,
}

impl DeliveryHandle {
    /// Correlation id of the command
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Wait for the command to be acknowledged, fail or be cancelled
    pub async fn outcome(self) -> DeliveryOutcome {
        self.rx.await.unwrap_or(DeliveryOutcome::Cancelled)
    }
}

struct Pending {
    token: u64,
    client_key: String,
    attempts: Arc<AtomicU32>,
    task: JoinHandle<()>,
    done: oneshot::Sender<DeliveryOutcome>,
}

struct Inner {
    clients: Arc<ClientRegistry>,
    policy: RepeatPolicy,
    pending: Mutex<HashMap<CorrelationId, Pending>>,
    events: broadcast::Sender<DeliveryEvent>,
    tokens: AtomicU64,
    sequence: AtomicU64,
}

impl Inner {
    fn complete(&self, correlation_id: CorrelationId, pending: Pending, outcome: DeliveryOutcome) {
        let _ = pending.done.send(outcome);
        let _ = self.events.send(DeliveryEvent {
            correlation_id,
            client_key: pending.client_key,
            outcome,
        });
    }

    fn give_up(&self, correlation_id: &CorrelationId, token: u64) {
        let removed = {
            let mut pending = self.pending.lock();
            match pending.get(correlation_id) {
                Some(entry) if entry.token == token => pending.remove(correlation_id),
                _ => None,
            }
        };
        if let Some(entry) = removed {
            let attempts = entry.attempts.load(Ordering::SeqCst);
            warn!(
                "No acknowledgement for [{}] after {} attempts, giving up",
                correlation_id, attempts
            );
            self.complete(correlation_id.clone(), entry, DeliveryOutcome::Failed { attempts });
        }
    }
}

/// Tracks unacknowledged commands and re-sends them
#[derive(Clone)]
pub struct RepeatSendManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for RepeatSendManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepeatSendManager")
            .field("policy", &self.inner.policy)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl RepeatSendManager {
    /// Create a manager sending through the client registry
    pub fn new(clients: Arc<ClientRegistry>, policy: RepeatPolicy) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                clients,
                policy,
                pending: Mutex::new(HashMap::new()),
                events,
                tokens: AtomicU64::new(0),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    /// Resend policy in use
    pub fn policy(&self) -> &RepeatPolicy {
        &self.inner.policy
    }

    /// Next id of the per-manager sequence, strictly increasing
    pub fn next_sequence(&self) -> CorrelationId {
        let seq = self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        CorrelationId(seq.to_string())
    }

    /// Subscribe to delivery outcomes
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.inner.events.subscribe()
    }

    /// Send a telegram and keep re-sending it until acknowledged.
    ///
    /// A still pending command with the same correlation id is superseded.
    /// A send that fails at the transport counts as an attempt.
    pub fn send(&self, client_key: &str, correlation_id: CorrelationId, telegram: Bytes) -> DeliveryHandle {
        let inner = &self.inner;
        let client_key = inner
            .clients
            .resolve_key(client_key)
            .unwrap_or_else(|| client_key.to_string());
        let (done, rx) = oneshot::channel();
        let token = inner.tokens.fetch_add(1, Ordering::SeqCst);
        let attempts = Arc::new(AtomicU32::new(0));

        let mut pending = inner.pending.lock();

        if let Some(previous) = pending.remove(&correlation_id) {
            previous.task.abort();
            debug!("Command [{}] superseded", correlation_id);
            inner.complete(correlation_id.clone(), previous, DeliveryOutcome::Superseded);
        }

        let task = tokio::spawn(resend_loop(
            inner.clone(),
            client_key.clone(),
            correlation_id.clone(),
            token,
            telegram,
            attempts.clone(),
        ));

        pending.insert(
            correlation_id.clone(),
            Pending {
                token,
                client_key,
                attempts,
                task,
                done,
            },
        );

        DeliveryHandle { correlation_id, rx }
    }

    /// Encode a request and send it with [`send`](Self::send).
    ///
    /// The correlation id is derived from the request's device id and kind.
    pub fn send_request(
        &self,
        client_key: &str,
        request: &dyn Request,
        matcher: &dyn ProtocolMatcher,
    ) -> Result<DeliveryHandle> {
        let correlation_id = CorrelationId::for_request(request.device_id(), request.kind());
        let frame = request.to_frame(Some(correlation_id.to_string()));
        let telegram = matcher.encode(&frame)?;
        Ok(self.send(client_key, correlation_id, telegram))
    }

    /// Clear a pending command acknowledged by the client entry `client_key`.
    ///
    /// Unknown ids are ignored. An acknowledgement arriving from another
    /// client than the one the command was sent to is ignored as well and the
    /// command stays pending.
    pub fn acknowledge(&self, client_key: &str, correlation_id: &str) -> bool {
        let key = CorrelationId::from_string(correlation_id);
        let client_key = self
            .inner
            .clients
            .resolve_key(client_key)
            .unwrap_or_else(|| client_key.to_string());

        let removed = {
            let mut pending = self.inner.pending.lock();
            match pending.get(&key) {
                Some(entry) if entry.client_key == client_key => pending.remove(&key),
                Some(entry) => {
                    warn!(
                        "Ignoring acknowledgement for [{}] from [{}], command was sent to [{}]",
                        key, client_key, entry.client_key
                    );
                    return false;
                }
                None => None,
            }
        };

        match removed {
            Some(entry) => {
                entry.task.abort();
                let attempts = entry.attempts.load(Ordering::SeqCst);
                debug!("Command [{}] acknowledged after {} attempts", key, attempts);
                self.inner
                    .complete(key, entry, DeliveryOutcome::Acknowledged { attempts });
                true
            }
            None => {
                debug!("Ignoring acknowledgement for unknown command [{}]", correlation_id);
                false
            }
        }
    }

    /// Cancel every pending command of a client entry
    pub fn cancel_for_client(&self, client_key: &str) -> usize {
        let cancelled: Vec<(CorrelationId, Pending)> = {
            let mut pending = self.inner.pending.lock();
            let ids: Vec<CorrelationId> = pending
                .iter()
                .filter(|(_, p)| p.client_key == client_key)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|p| (id, p)))
                .collect()
        };

        let count = cancelled.len();
        for (id, entry) in cancelled {
            entry.task.abort();
            self.inner.complete(id, entry, DeliveryOutcome::Cancelled);
        }
        if count > 0 {
            info!("Cancelled {} pending commands for [{}]", count, client_key);
        }
        count
    }

    /// Whether a command is still waiting for its acknowledgement
    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.inner
            .pending
            .lock()
            .contains_key(&CorrelationId::from_string(correlation_id))
    }

    /// Number of commands waiting for acknowledgement
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Cancel everything
    pub fn shutdown(&self) {
        let drained: Vec<(CorrelationId, Pending)> = self.inner.pending.lock().drain().collect();
        for (id, entry) in drained {
            entry.task.abort();
            self.inner.complete(id, entry, DeliveryOutcome::Cancelled);
        }
    }
}

async fn resend_loop(
    inner: Arc<Inner>,
    client_key: String,
    correlation_id: CorrelationId,
    token: u64,
    telegram: Bytes,
    attempts: Arc<AtomicU32>,
) {
    let max_attempts = inner.policy.max_attempts;
    for attempt in 1..=max_attempts {
        attempts.store(attempt, Ordering::SeqCst);
        match inner.clients.send(&client_key, telegram.clone()).await {
            Ok(()) => debug!(
                "Sent [{}] to [{}], attempt {}/{}",
                correlation_id, client_key, attempt, max_attempts
            ),
            Err(e) => warn!(
                "Send of [{}] to [{}] failed on attempt {}/{}: {}",
                correlation_id, client_key, attempt, max_attempts, e
            ),
        }
        tokio::time::sleep(inner.policy.delay_after(attempt)).await;
    }
    inner.give_up(&correlation_id, token);
}

#[cfg(test)]
mod tests {
    use super::*;
    use telegate_transport::mock::MemoryChannel;

    fn setup(max_attempts: u32) -> (RepeatSendManager, Arc<MemoryChannel>) {
        let clients = Arc::new(ClientRegistry::new());
        clients.bind_name("A001", "10.0.0.5", 4001);
        let channel = Arc::new(MemoryChannel::new("mem"));
        clients.set_channel("A001", channel.clone());

        let policy = RepeatPolicy {
            max_attempts,
            ack_timeout: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(300),
        };
        (RepeatSendManager::new(clients, policy), channel)
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RepeatPolicy {
            max_attempts: 5,
            ack_timeout: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(300),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(300));
        assert_eq!(policy.delay_after(10), Duration::from_millis(300));
    }

    #[test]
    fn test_policy_from_settings() {
        let settings = Settings::from_pairs(&[(REPEAT_MAX_ATTEMPTS, "5"), (REPEAT_ACK_TIMEOUT_MS, "250")]).unwrap();
        let policy = RepeatPolicy::from_settings(&settings);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.ack_timeout, Duration::from_millis(250));
        assert_eq!(policy.max_backoff, Duration::from_secs(30));

        let settings = Settings::from_pairs(&[(REPEAT_MAX_ATTEMPTS, "0")]).unwrap();
        assert_eq!(RepeatPolicy::from_settings(&settings).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_command_fails_after_max_attempts() {
        let (manager, channel) = setup(3);
        let mut events = manager.subscribe();

        let handle = manager.send("A001", CorrelationId::from_string("7"), Bytes::from_static(b"go"));
        assert_eq!(handle.outcome().await, DeliveryOutcome::Failed { attempts: 3 });
        assert_eq!(channel.sent_count(), 3);
        assert_eq!(manager.pending_count(), 0);

        let event = events.recv().await.unwrap();
        assert_eq!(event.client_key, "10.0.0.5:4001");
        assert_eq!(event.outcome, DeliveryOutcome::Failed { attempts: 3 });

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(channel.sent_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledgement_stops_resending() {
        let (manager, channel) = setup(5);

        let handle = manager.send("A001", CorrelationId::for_request("A001", RequestKind::State), Bytes::from_static(b"st"));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(channel.sent_count(), 2);

        assert!(manager.acknowledge("A001", "A001:STATE"));
        assert!(!manager.acknowledge("A001", "A001:STATE"));
        assert_eq!(handle.outcome().await, DeliveryOutcome::Acknowledged { attempts: 2 });

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(channel.sent_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledgement_from_another_client_is_ignored() {
        let (manager, channel) = setup(3);
        manager.inner.clients.bind_name("A002", "10.0.0.6", 4001);

        let handle = manager.send("A001", CorrelationId::for_request("A001", RequestKind::Move), Bytes::from_static(b"mv"));
        tokio::task::yield_now().await;

        assert!(!manager.acknowledge("A002", "A001:MOVE"));
        assert!(!manager.acknowledge("X9", "A001:MOVE"));
        assert!(manager.is_pending("A001:MOVE"));

        // the entry key and its alias are the same client
        assert!(manager.acknowledge("10.0.0.5:4001", "A001:MOVE"));
        assert_eq!(handle.outcome().await, DeliveryOutcome::Acknowledged { attempts: 1 });
        assert_eq!(channel.sent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_counts_as_attempt() {
        let (manager, channel) = setup(2);
        channel.set_fail(true);

        let handle = manager.send("A001", manager.next_sequence(), Bytes::from_static(b"x"));
        assert_eq!(handle.outcome().await, DeliveryOutcome::Failed { attempts: 2 });
        assert_eq!(channel.sent_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_for_client_and_supersede() {
        let (manager, channel) = setup(3);

        let first = manager.send("A001", CorrelationId::from_string("c1"), Bytes::from_static(b"1"));
        let second = manager.send("A001", CorrelationId::from_string("c1"), Bytes::from_static(b"2"));
        assert_eq!(first.outcome().await, DeliveryOutcome::Superseded);
        assert!(manager.is_pending("c1"));

        tokio::task::yield_now().await;
        assert_eq!(manager.cancel_for_client("10.0.0.5:4001"), 1);
        assert_eq!(second.outcome().await, DeliveryOutcome::Cancelled);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(manager.pending_count(), 0);
        assert!(channel.sent_count() <= 2);
    }

    #[tokio::test]
    async fn test_sequence_is_strictly_increasing() {
        let (manager, _) = setup(1);
        let a: u64 = manager.next_sequence().as_str().parse().unwrap();
        let b: u64 = manager.next_sequence().as_str().parse().unwrap();
        assert!(b > a);
    }
}
