/*!
 * Decoded protocol records.
 *
 * A [`Protocol`] is what a codec makes of one telegram (or of one record
 * inside a batched telegram). Records are immutable once built and are
 * consumed by value by the dispatch engine.
 */
use chrono::{DateTime, Utc};
use serde::Serialize;

use telegate_core::types::{Fields, RequestKind, Value};

/// One decoded telegram record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    device_id: String,
    cmd_key: String,
    request_kind: RequestKind,
    payload: Fields,
    correlation_id: Option<String>,
    received_at: DateTime<Utc>,
}

impl Protocol {
    /// Create a record with an empty payload
    pub fn new<D, C>(device_id: D, cmd_key: C, request_kind: RequestKind) -> Self
    where
        D: Into<String>,
        C: Into<String>,
    {
        Self {
            device_id: device_id.into(),
            cmd_key: cmd_key.into(),
            request_kind,
            payload: Fields::new(),
            correlation_id: None,
            received_at: Utc::now(),
        }
    }

    /// Replace the payload
    pub fn with_payload(mut self, payload: Fields) -> Self {
        self.payload = payload;
        self
    }

    /// Add a single payload field
    pub fn with_field<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Attach the correlation id of the command this record acknowledges
    pub fn with_correlation_id<S: Into<String>>(mut self, correlation_id: S) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Device identifier the record was sent by
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Command keyword
    pub fn cmd_key(&self) -> &str {
        &self.cmd_key
    }

    /// Request kind discriminant
    pub fn request_kind(&self) -> RequestKind {
        self.request_kind
    }

    /// Decoded fields
    pub fn payload(&self) -> &Fields {
        &self.payload
    }

    /// A single decoded field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Correlation id, present on acknowledgements
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// When the record was decoded
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Take the payload out of the record
    pub fn into_payload(self) -> Fields {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_accessors() {
        let protocol = Protocol::new("A001", "rptac", RequestKind::Action)
            .with_field("point", "P12")
            .with_field("battery", 87)
            .with_correlation_id("A001:ACTION");

        assert_eq!(protocol.device_id(), "A001");
        assert_eq!(protocol.cmd_key(), "rptac");
        assert_eq!(protocol.request_kind(), RequestKind::Action);
        assert_eq!(protocol.field("point").and_then(Value::as_str), Some("P12"));
        assert_eq!(protocol.field("battery").and_then(Value::as_integer), Some(87));
        assert_eq!(protocol.correlation_id(), Some("A001:ACTION"));
        assert_eq!(protocol.into_payload().len(), 2);
    }
}
