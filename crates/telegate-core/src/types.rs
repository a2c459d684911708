/*!
 * Shared data types for TeleGate.
 *
 * Telegram field values, the request kind discriminant and the transport
 * selection enums used by settings and transports alike.
 */
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A decoded telegram field
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent / null field
    #[default]
    Null,
    /// Boolean field
    Bool(bool),
    /// Integer field
    Integer(i64),
    /// Floating-point field
    Float(f64),
    /// Text field
    String(String),
    /// Repeated field
    Array(Vec<Value>),
    /// Nested record
    Object(HashMap<String, Value>),
}

impl Value {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get a boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get an integer value
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if *f == (*f as i64) as f64 => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get a float value
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get an object value
    pub fn as_object(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Value::Array(a)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(o: HashMap<String, Value>) -> Self {
        Value::Object(o)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Object(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Integer(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Value::from(f),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(a) => {
                serde_json::Value::Array(a.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Object(o) => serde_json::Value::Object(
                o.into_iter().map(|(k, v)| (k, serde_json::Value::from(v))).collect(),
            ),
        }
    }
}

/// Field map carried by telegrams and requests
pub type Fields = HashMap<String, Value>;

/// Discriminant shared by protocol records and outbound requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestKind {
    /// Vehicle movement along a route
    Move,
    /// Station / load handling action
    Action,
    /// Application level request
    Business,
    /// Vehicle state report or query
    State,
    /// Anything the codec could not classify
    Unknown,
}

impl RequestKind {
    /// Upper-case wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Move => "MOVE",
            RequestKind::Action => "ACTION",
            RequestKind::Business => "BUSINESS",
            RequestKind::State => "STATE",
            RequestKind::Unknown => "UNKNOWN",
        }
    }

    /// Parse a wire name; unrecognised names map to `Unknown`
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "MOVE" => RequestKind::Move,
            "ACTION" => RequestKind::Action,
            "BUSINESS" => RequestKind::Business,
            "STATE" => RequestKind::State,
            _ => RequestKind::Unknown,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical transport used to reach vehicles and stations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetChannelType {
    /// TCP stream
    Tcp,
    /// UDP datagrams
    Udp,
    /// Serial line
    Rxtx,
}

impl FromStr for NetChannelType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCP" => Ok(NetChannelType::Tcp),
            "UDP" => Ok(NetChannelType::Udp),
            "RXTX" => Ok(NetChannelType::Rxtx),
            other => Err(Error::validation(format!("unknown channel type {}", other))),
        }
    }
}

impl fmt::Display for NetChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetChannelType::Tcp => f.write_str("TCP"),
            NetChannelType::Udp => f.write_str("UDP"),
            NetChannelType::Rxtx => f.write_str("RXTX"),
        }
    }
}

/// Whether the gateway listens or dials out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunType {
    /// Accept connections from vehicles
    Server,
    /// Connect to each vehicle
    Client,
}

impl FromStr for RunType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SERVER" => Ok(RunType::Server),
            "CLIENT" => Ok(RunType::Client),
            other => Err(Error::validation(format!("unknown run type {}", other))),
        }
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunType::Server => f.write_str("SERVER"),
            RunType::Client => f.write_str("CLIENT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_kind_parsing() {
        assert_eq!(RequestKind::parse_lenient("move"), RequestKind::Move);
        assert_eq!(RequestKind::parse_lenient(" State "), RequestKind::State);
        assert_eq!(RequestKind::parse_lenient("ACTION"), RequestKind::Action);
        assert_eq!(RequestKind::parse_lenient("business"), RequestKind::Business);
        assert_eq!(RequestKind::parse_lenient("teleport"), RequestKind::Unknown);
        assert_eq!(RequestKind::Move.to_string(), "MOVE");
    }

    #[test]
    fn test_channel_and_run_type_parsing() {
        assert_eq!("udp".parse::<NetChannelType>().unwrap(), NetChannelType::Udp);
        assert_eq!("RxTx".parse::<NetChannelType>().unwrap(), NetChannelType::Rxtx);
        assert!("can".parse::<NetChannelType>().is_err());

        assert_eq!("client".parse::<RunType>().unwrap(), RunType::Client);
        assert!("peer".parse::<RunType>().is_err());
    }

    #[test]
    fn test_json_value_conversion() {
        let json = serde_json::json!({
            "speed": 1.5,
            "point": "P12",
            "loaded": true,
            "steps": [1, 2],
            "extra": null
        });

        let value = Value::from(json.clone());
        let object = value.as_object().unwrap();
        assert_eq!(object["speed"].as_float(), Some(1.5));
        assert_eq!(object["point"].as_str(), Some("P12"));
        assert_eq!(object["loaded"].as_bool(), Some(true));
        assert!(object["extra"].is_null());

        let back: serde_json::Value = value.into();
        assert_eq!(back, json);
    }

    #[test]
    fn test_value_as_methods() {
        let v = Value::Float(3.0);
        assert_eq!(v.as_integer(), Some(3));

        let v = Value::Float(3.14);
        assert_eq!(v.as_integer(), None);

        let v = Value::Integer(42);
        assert_eq!(v.as_float(), Some(42.0));
        assert_eq!(v.as_str(), None);
    }
}
