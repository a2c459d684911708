/*!
 * JSON reference codec.
 *
 * One telegram is a JSON object, or an array of objects for batched
 * telegrams:
 *
 * ```text
 * {"deviceId":"A001","cmdKey":"rptac","kind":"ACTION","correlationId":"7","payload":{"point":"P1"}}
 * ```
 *
 * Every field is optional on the wire; a missing `deviceId` decodes to an
 * empty id and is left for the dispatch engine to skip.
 */
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use telegate_core::config::Settings;
use telegate_core::types::{RequestKind, Value};

use crate::error::Result;
use crate::matcher::{CodecProvider, ProtocolMatcher, RequestFrame};
use crate::protocol::Protocol;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    #[serde(default)]
    device_id: String,
    #[serde(default)]
    cmd_key: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    correlation_id: Option<String>,
    #[serde(default)]
    payload: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    device_id: &'a str,
    cmd_key: &'a str,
    kind: &'a str,
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<&'a str>,
    payload: serde_json::Map<String, serde_json::Value>,
}

/// JSON protocol matcher
#[derive(Debug, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec
    pub fn new() -> Self {
        Self
    }

    fn decode_record(item: serde_json::Value) -> Option<Protocol> {
        let record: WireRecord = match serde_json::from_value(item) {
            Ok(record) => record,
            Err(e) => {
                debug!("Skipping malformed telegram record: {}", e);
                return None;
            }
        };

        let kind = record
            .kind
            .as_deref()
            .map(RequestKind::parse_lenient)
            .unwrap_or(RequestKind::Unknown);

        let payload = record
            .payload
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect();

        let mut protocol = Protocol::new(record.device_id, record.cmd_key, kind).with_payload(payload);
        if let Some(correlation_id) = record.correlation_id {
            protocol = protocol.with_correlation_id(correlation_id);
        }
        Some(protocol)
    }
}

impl ProtocolMatcher for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, telegram: &[u8]) -> Vec<Protocol> {
        let text = match std::str::from_utf8(telegram) {
            Ok(text) => text.trim(),
            Err(_) => {
                debug!("Telegram of {} bytes is not UTF-8", telegram.len());
                return Vec::new();
            }
        };

        if text.is_empty() {
            return Vec::new();
        }

        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                debug!("Telegram is not JSON: {}", e);
                return Vec::new();
            }
        };

        let items = match value {
            serde_json::Value::Array(items) => items,
            object @ serde_json::Value::Object(_) => vec![object],
            _ => return Vec::new(),
        };

        items.into_iter().filter_map(Self::decode_record).collect()
    }

    fn encode(&self, frame: &RequestFrame) -> Result<Bytes> {
        let payload = frame
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
            .collect();

        let wire = WireRequest {
            device_id: &frame.device_id,
            cmd_key: &frame.cmd_key,
            kind: frame.kind.as_str(),
            target: &frame.target,
            correlation_id: frame.correlation_id.as_deref(),
            payload,
        };

        Ok(Bytes::from(serde_json::to_vec(&wire)?))
    }
}

/// Provider registering [`JsonCodec`] under the name `json`
#[derive(Debug, Default)]
pub struct JsonCodecProvider;

impl CodecProvider for JsonCodecProvider {
    fn name(&self) -> &'static str {
        "json"
    }

    fn create(&self, _settings: &Settings) -> Result<Arc<dyn ProtocolMatcher>> {
        Ok(Arc::new(JsonCodec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telegate_core::types::Fields;

    #[test]
    fn test_decode_single_record() {
        let codec = JsonCodec::new();
        let records = codec.decode(
            br#"{"deviceId":"A001","cmdKey":"rptac","kind":"action","correlationId":"9","payload":{"point":"P1","battery":80}}"#,
        );

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.device_id(), "A001");
        assert_eq!(record.cmd_key(), "rptac");
        assert_eq!(record.request_kind(), RequestKind::Action);
        assert_eq!(record.correlation_id(), Some("9"));
        assert_eq!(record.field("point").and_then(Value::as_str), Some("P1"));
        assert_eq!(record.field("battery").and_then(Value::as_integer), Some(80));
    }

    #[test]
    fn test_decode_batch_keeps_order_and_drops_bad_items() {
        let codec = JsonCodec::new();
        let records = codec.decode(
            br#"[{"deviceId":"A001","kind":"STATE"},42,{"deviceId":"","cmdKey":"x"},{"deviceId":"A002","payload":"oops"},{"deviceId":"A003"}]"#,
        );

        let ids: Vec<&str> = records.iter().map(|r| r.device_id()).collect();
        assert_eq!(ids, vec!["A001", "", "A003"]);
        assert_eq!(records[2].request_kind(), RequestKind::Unknown);
    }

    #[test]
    fn test_garbage_decodes_to_nothing() {
        let codec = JsonCodec::new();
        assert!(codec.decode(b"").is_empty());
        assert!(codec.decode(b"   ").is_empty());
        assert!(codec.decode(b"##A001,rptac,##").is_empty());
        assert!(codec.decode(&[0xff, 0xfe, 0x00]).is_empty());
        assert!(codec.decode(b"\"just a string\"").is_empty());
    }

    #[test]
    fn test_encode_request_frame() {
        let codec = JsonCodec::new();
        let mut fields = Fields::new();
        fields.insert("nextPointName".to_string(), Value::from("P2"));

        let frame = RequestFrame {
            kind: RequestKind::State,
            target: "state".to_string(),
            device_id: "A001".to_string(),
            cmd_key: "getst".to_string(),
            correlation_id: Some("A001:STATE".to_string()),
            fields,
        };

        let bytes = codec.encode(&frame).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["deviceId"], "A001");
        assert_eq!(json["kind"], "STATE");
        assert_eq!(json["target"], "state");
        assert_eq!(json["correlationId"], "A001:STATE");
        assert_eq!(json["payload"]["nextPointName"], "P2");
    }
}
