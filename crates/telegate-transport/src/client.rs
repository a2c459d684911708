/*!
 * Client registry for TeleGate.
 *
 * Maps a stable endpoint key (derived from host and port, or a device id) to
 * the live channel of that endpoint. Entries are created once and their channel
 * slot is swapped in place whenever the endpoint reconnects.
 */
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::channel::{ChannelId, SharedChannel};
use crate::error::{Result, TransportError};

/// Build the registry key of a network endpoint.
///
/// The key is `host:port`; IPv6 literals are bracketed so the port is always
/// the text after the last colon. The host is normalized first: surrounding
/// whitespace is dropped and an already bracketed IPv6 literal is kept as is,
/// so `"::1"` and `"[::1]"` name the same endpoint. Keys are unique per
/// normalized host and port.
pub fn entry_key(host: &str, port: u32) -> String {
    let host = host.trim();
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// One registered endpoint and its current channel
pub struct ClientEntry {
    key: String,
    channel: RwLock<Option<SharedChannel>>,
}

impl ClientEntry {
    fn new(key: String) -> Self {
        Self {
            key,
            channel: RwLock::new(None),
        }
    }

    /// Get the entry key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the current channel, if connected
    pub fn channel(&self) -> Option<SharedChannel> {
        self.channel.read().clone()
    }

    /// Whether a channel is bound and open
    pub fn is_connected(&self) -> bool {
        self.channel.read().as_ref().map_or(false, |c| c.is_open())
    }

    /// Bind a channel, returning the one it replaces
    pub fn set_channel(&self, channel: SharedChannel) -> Option<SharedChannel> {
        let mut slot = self.channel.write();
        match slot.as_ref() {
            Some(current) if current.id() == channel.id() => None,
            _ => {
                debug!("Client [{}] bound to channel {}", self.key, channel.id());
                slot.replace(channel)
            }
        }
    }

    /// Unbind whatever channel is bound
    pub fn clear_channel(&self) -> Option<SharedChannel> {
        self.channel.write().take()
    }

    /// Unbind the channel only if it is the given one
    pub fn clear_if(&self, channel_id: &ChannelId) -> bool {
        let mut slot = self.channel.write();
        if slot.as_ref().map_or(false, |c| c.id() == channel_id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Send a telegram over the bound channel
    pub async fn send(&self, telegram: Bytes) -> Result<()> {
        let channel = self
            .channel()
            .ok_or_else(|| TransportError::NotConnected(self.key.clone()))?;
        channel.send(telegram).await
    }
}

impl fmt::Debug for ClientEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientEntry")
            .field("key", &self.key)
            .field("channel", &self.channel.read().as_ref().map(|c| c.id().clone()))
            .finish()
    }
}

/// Registry of client entries
#[derive(Debug, Default)]
pub struct ClientRegistry {
    entries: RwLock<HashMap<String, Arc<ClientEntry>>>,
    aliases: RwLock<HashMap<String, String>>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry, or return the existing one for the key
    pub fn register<S: Into<String>>(&self, key: S) -> Arc<ClientEntry> {
        let key = key.into();
        let mut entries = self.entries.write();
        entries
            .entry(key.clone())
            .or_insert_with(|| {
                debug!("Registered client entry [{}]", key);
                Arc::new(ClientEntry::new(key.clone()))
            })
            .clone()
    }

    /// Register the endpoint `host:port` and make it reachable under `name`
    pub fn bind_name(&self, name: &str, host: &str, port: u32) -> String {
        let key = entry_key(host, port);
        self.register(key.clone());
        self.alias(name, &key);
        key
    }

    /// Make an existing key reachable under another name
    pub fn alias(&self, name: &str, key: &str) {
        self.aliases.write().insert(name.to_string(), key.to_string());
    }

    /// Resolve a name to its entry key
    pub fn resolve_key(&self, name: &str) -> Option<String> {
        if self.entries.read().contains_key(name) {
            return Some(name.to_string());
        }
        self.aliases.read().get(name).cloned()
    }

    /// Look up an entry by key or alias
    pub fn get(&self, key: &str) -> Option<Arc<ClientEntry>> {
        if let Some(entry) = self.entries.read().get(key) {
            return Some(entry.clone());
        }
        let target = self.aliases.read().get(key).cloned()?;
        self.entries.read().get(&target).cloned()
    }

    /// Bind a channel to an entry; `false` when the key is unknown
    pub fn set_channel(&self, key: &str, channel: SharedChannel) -> bool {
        match self.get(key) {
            Some(entry) => {
                if let Some(previous) = entry.set_channel(channel) {
                    info!("Client [{}] reconnected, replaced channel {}", entry.key(), previous.id());
                }
                true
            }
            None => {
                warn!("Cannot bind channel, client [{}] is not registered", key);
                false
            }
        }
    }

    /// Unbind the channel of an entry
    pub fn clear_channel(&self, key: &str) {
        if let Some(entry) = self.get(key) {
            entry.clear_channel();
        }
    }

    /// Unbind a closed channel from every entry using it and return their keys
    pub fn release_channel(&self, channel_id: &ChannelId) -> Vec<String> {
        let entries = self.entries.read();
        entries
            .values()
            .filter(|entry| entry.clear_if(channel_id))
            .map(|entry| entry.key().to_string())
            .collect()
    }

    /// Send a telegram to the entry registered under `key`
    pub async fn send(&self, key: &str, telegram: Bytes) -> Result<()> {
        let entry = self
            .get(key)
            .ok_or_else(|| TransportError::NotRegistered(key.to_string()))?;
        entry.send(telegram).await
    }

    /// All registered keys
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of registered entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every entry and alias
    pub fn clear(&self) {
        self.entries.write().clear();
        self.aliases.write().clear();
    }
}

/// A remote endpoint dialled in client mode, written `name=host:port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEndpoint {
    /// Device or vehicle name the endpoint serves
    pub name: String,
    /// Remote host
    pub host: String,
    /// Remote port
    pub port: u32,
}

impl ClientEndpoint {
    /// Registry key of the endpoint
    pub fn key(&self) -> String {
        entry_key(&self.host, self.port)
    }
}

impl FromStr for ClientEndpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        let (name, address) = s
            .split_once('=')
            .ok_or_else(|| TransportError::invalid_endpoint(format!("missing '=' in {}", s)))?;
        let (host, port) = address
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| TransportError::invalid_endpoint(format!("missing port in {}", s)))?;
        let port = port
            .parse::<u32>()
            .map_err(|e| TransportError::invalid_endpoint(format!("bad port in {}: {}", s, e)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');

        if name.trim().is_empty() || host.is_empty() {
            return Err(TransportError::invalid_endpoint(s));
        }

        Ok(Self {
            name: name.trim().to_string(),
            host: host.to_string(),
            port,
        })
    }
}
