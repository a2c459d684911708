/*!
 * Protocol matcher interface and codec registry.
 *
 * A [`ProtocolMatcher`] turns raw telegrams into [`Protocol`] records and
 * outbound [`RequestFrame`]s into telegrams. Vendor codecs plug in through a
 * [`CodecProvider`] registered under a name; the gateway resolves the name
 * configured in `codec.name` once at startup.
 */
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info};

use telegate_core::config::Settings;
use telegate_core::types::{Fields, RequestKind};

use crate::codecs::json::JsonCodecProvider;
use crate::error::{Result, TransportError};
use crate::protocol::Protocol;

/// Outbound request flattened for encoding
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFrame {
    /// Request kind discriminant
    pub kind: RequestKind,
    /// Routing target
    pub target: String,
    /// Device the request is addressed to
    pub device_id: String,
    /// Command keyword
    pub cmd_key: String,
    /// Correlation id expected back in the acknowledgement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Kind-specific fields
    pub fields: Fields,
}

/// Wire codec of one vendor protocol
pub trait ProtocolMatcher: Send + Sync + Debug {
    /// Get the codec name
    fn name(&self) -> &'static str;

    /// Decode a telegram into its records, in telegram order.
    ///
    /// Telegrams that do not parse yield an empty sequence. Implementations
    /// must not block.
    fn decode(&self, telegram: &[u8]) -> Vec<Protocol>;

    /// Encode an outbound request into one telegram, without framing
    fn encode(&self, frame: &RequestFrame) -> Result<Bytes>;
}

/// Factory creating a matcher from settings
pub trait CodecProvider: Send + Sync + Debug {
    /// Get the provider name, used as the `codec.name` value
    fn name(&self) -> &'static str;

    /// Create a matcher instance
    fn create(&self, settings: &Settings) -> Result<Arc<dyn ProtocolMatcher>>;
}

/// CodecRegistry maps codec names to providers
#[derive(Debug, Default)]
pub struct CodecRegistry {
    providers: HashMap<String, Box<dyn CodecProvider>>,
}

impl CodecRegistry {
    /// Create an empty codec registry
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Create a registry holding the codecs shipped with TeleGate
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_provider(JsonCodecProvider);
        registry
    }

    /// Register a codec provider, replacing one with the same name
    pub fn register_provider<P: CodecProvider + 'static>(&mut self, provider: P) {
        let name = provider.name().to_string();
        debug!("Registered codec provider {}", name);
        self.providers.insert(name, Box::new(provider));
    }

    /// Whether a provider is registered under the name
    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Names of all registered providers
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Create the matcher registered under `name`
    pub fn create(&self, name: &str, settings: &Settings) -> Result<Arc<dyn ProtocolMatcher>> {
        let provider = self
            .providers
            .get(name)
            .ok_or_else(|| TransportError::CodecNotFound(name.to_string()))?;
        let matcher = provider.create(settings)?;
        info!("Using codec {}", matcher.name());
        Ok(matcher)
    }

    /// Create the matcher selected by `codec.name`
    pub fn create_from_settings(&self, settings: &Settings) -> Result<Arc<dyn ProtocolMatcher>> {
        self.create(&settings.codec_name(), settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telegate_core::config::CODEC_NAME;

    #[derive(Debug)]
    struct NullMatcher;

    impl ProtocolMatcher for NullMatcher {
        fn name(&self) -> &'static str {
            "null"
        }

        fn decode(&self, _telegram: &[u8]) -> Vec<Protocol> {
            Vec::new()
        }

        fn encode(&self, _frame: &RequestFrame) -> Result<Bytes> {
            Ok(Bytes::new())
        }
    }

    #[derive(Debug)]
    struct NullProvider;

    impl CodecProvider for NullProvider {
        fn name(&self) -> &'static str {
            "null"
        }

        fn create(&self, _settings: &Settings) -> Result<Arc<dyn ProtocolMatcher>> {
            Ok(Arc::new(NullMatcher))
        }
    }

    #[test]
    fn test_builtin_registry_resolves_default_codec() {
        let registry = CodecRegistry::with_builtin();
        let settings = Settings::defaults().unwrap();

        let matcher = registry.create_from_settings(&settings).unwrap();
        assert_eq!(matcher.name(), "json");
    }

    #[test]
    fn test_unknown_codec_is_reported() {
        let registry = CodecRegistry::with_builtin();
        let settings = Settings::from_pairs(&[(CODEC_NAME, "vendor-x")]).unwrap();

        let err = registry.create_from_settings(&settings).unwrap_err();
        assert!(matches!(err, TransportError::CodecNotFound(name) if name == "vendor-x"));
    }

    #[test]
    fn test_custom_provider() {
        let mut registry = CodecRegistry::new();
        registry.register_provider(NullProvider);
        let settings = Settings::defaults().unwrap();

        assert!(registry.contains("null"));
        assert_eq!(registry.names(), vec!["null".to_string()]);
        let matcher = registry.create("null", &settings).unwrap();
        assert!(matcher.decode(b"anything").is_empty());
    }
}
