//! Handlers shared by the unit tests of this crate.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use telegate_transport::Protocol;

use crate::error::{Error, Result};
use crate::route::{ActionCapability, ActionHandler};

#[derive(Debug, Default)]
pub struct RecordingHandler {
    identity: Option<(String, String, String)>,
    seen: Mutex<Vec<Protocol>>,
    fail: bool,
    notify: Notify,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn with_identity(action_key: &str, device_id: &str, vehicle_id: &str) -> Arc<Self> {
        Arc::new(Self {
            identity: Some((action_key.to_string(), device_id.to_string(), vehicle_id.to_string())),
            ..Self::default()
        })
    }

    pub fn seen(&self) -> Vec<Protocol> {
        self.seen.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }

    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.notify.notified();
            if self.count() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ActionHandler for RecordingHandler {
    async fn handle(&self, protocol: Protocol) -> Result<()> {
        self.seen.lock().push(protocol);
        self.notify.notify_waiters();
        if self.fail {
            return Err(Error::handler("refused"));
        }
        Ok(())
    }
}

impl ActionCapability for RecordingHandler {
    fn device_id(&self) -> &str {
        self.identity.as_ref().map_or("", |(_, d, _)| d.as_str())
    }

    fn vehicle_id(&self) -> &str {
        self.identity.as_ref().map_or("", |(_, _, v)| v.as_str())
    }

    fn action_key(&self) -> &str {
        self.identity.as_ref().map_or("", |(a, _, _)| a.as_str())
    }
}
