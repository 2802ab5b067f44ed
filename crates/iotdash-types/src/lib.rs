//! `iotdash-types` – shared domain types for the telemetry bridge.
//!
//! Everything that crosses a crate boundary lives here: the connection
//! state reported to consumers, the records held in the debug ring, the
//! decoded telemetry payload and the workspace-wide error type.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Channels every dashboard knows about out of the box.
pub const DEFAULT_CHANNELS: [&str; 3] = ["temp", "hum", "prox"];

/// Delivery guarantee requested from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityOfService {
    AtMostOnce,
    /// Every published message reaches subscribers at least once; duplicates
    /// are possible.
    AtLeastOnce,
    ExactlyOnce,
}

/// Connection status as last reported by the transport callbacks.
///
/// This is written directly by the on-connect / on-disconnect callbacks
/// under the store lock, so consumers never have to infer it from log text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "code", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The broker refused the connection (`Some(rc)`) or the transport
    /// failed without a return code (`None`).
    Error(Option<u8>),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionState::Error(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Error(Some(rc)) => write!(f, "error(rc={rc})"),
            ConnectionState::Error(None) => write!(f, "error"),
        }
    }
}

/// A decoded telemetry message.
///
/// Only `value` is required. The remaining fields are carried through to
/// the debug log untouched and are `None` when the publisher omitted them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub value: f64,
    /// Publisher-side timestamp, in whatever shape the publisher chose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<Value>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<Value>,
    /// Schema version tag some publishers attach.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<Value>,
}

/// The redacted view of a message that is kept in the debug ring.
///
/// Serialises with every key present (absent fields as `null`) so each debug
/// line has the same shape regardless of what the publisher sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    pub topic: String,
    pub t: Option<Value>,
    #[serde(rename = "type")]
    pub kind: Option<Value>,
    pub unit: Option<Value>,
    pub value: Option<f64>,
    pub v: Option<Value>,
}

impl MessageSummary {
    pub fn from_payload(topic: impl Into<String>, payload: &TelemetryPayload) -> Self {
        Self {
            topic: topic.into(),
            t: payload.t.clone(),
            kind: payload.kind.clone(),
            unit: payload.unit.clone(),
            value: Some(payload.value),
            v: payload.v.clone(),
        }
    }
}

/// A single entry of the bounded debug ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DebugRecord {
    /// A successfully decoded message (buffered or not).
    Message(MessageSummary),
    /// A payload that could not be decoded or lacked a numeric `value`.
    ParseError { topic: String, detail: String },
    /// Connection lifecycle event, e.g. `on_connect` / `transport-thread`.
    Lifecycle { source: String, detail: String },
}

impl DebugRecord {
    pub fn lifecycle(source: impl Into<String>, detail: impl Into<String>) -> Self {
        DebugRecord::Lifecycle {
            source: source.into(),
            detail: detail.into(),
        }
    }

    pub fn parse_error(topic: impl Into<String>, detail: impl Into<String>) -> Self {
        DebugRecord::ParseError {
            topic: topic.into(),
            detail: detail.into(),
        }
    }

    pub fn is_parse_error(&self) -> bool {
        matches!(self, DebugRecord::ParseError { .. })
    }
}

impl fmt::Display for DebugRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugRecord::Message(summary) => match serde_json::to_string(summary) {
                Ok(json) => f.write_str(&json),
                Err(_) => write!(f, "{{\"topic\":{:?}}}", summary.topic),
            },
            DebugRecord::ParseError { topic, detail } => {
                write!(f, "[parse-error] {detail} topic={topic}")
            }
            DebugRecord::Lifecycle { source, detail } => write!(f, "[{source}] {detail}"),
        }
    }
}

/// Workspace-wide error type.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DashError {
    #[error("Payload Decode Error: {0}")]
    Decode(String),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Connection Refused by broker (rc={0})")]
    ConnectionRefused(u8),

    #[error("Supervisor Error: {0}")]
    Supervisor(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}

impl DashError {
    /// The [`ConnectionState`] a consumer should see after this failure.
    pub fn connection_state(&self) -> ConnectionState {
        match self {
            DashError::ConnectionRefused(rc) => ConnectionState::Error(Some(*rc)),
            _ => ConnectionState::Error(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Error(Some(5)).to_string(), "error(rc=5)");
        assert_eq!(ConnectionState::Error(None).to_string(), "error");
    }

    #[test]
    fn connection_state_defaults_to_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(!ConnectionState::default().is_connected());
    }

    #[test]
    fn payload_accepts_optional_fields() {
        let payload: TelemetryPayload = serde_json::from_value(json!({
            "value": 21.5,
            "type": "temperature",
            "unit": "C"
        }))
        .unwrap();
        assert!((payload.value - 21.5).abs() < f64::EPSILON);
        assert_eq!(payload.kind, Some(json!("temperature")));
        assert!(payload.t.is_none());
    }

    #[test]
    fn message_summary_keeps_every_key() {
        let payload = TelemetryPayload {
            value: 1.0,
            t: None,
            kind: None,
            unit: Some(json!("cm")),
            v: None,
        };
        let record = DebugRecord::Message(MessageSummary::from_payload("demo/prox", &payload));
        let line = record.to_string();
        assert!(line.contains("\"topic\":\"demo/prox\""));
        assert!(line.contains("\"t\":null"));
        assert!(line.contains("\"unit\":\"cm\""));
        assert!(line.contains("\"value\":1.0"));
    }

    #[test]
    fn parse_error_display_names_topic() {
        let record = DebugRecord::parse_error("demo/temp", "missing field `value`");
        assert!(record.is_parse_error());
        assert_eq!(
            record.to_string(),
            "[parse-error] missing field `value` topic=demo/temp"
        );
    }

    #[test]
    fn lifecycle_display() {
        let record = DebugRecord::lifecycle("on_connect", "rc=0");
        assert_eq!(record.to_string(), "[on_connect] rc=0");
    }

    #[test]
    fn refused_connection_maps_to_error_state() {
        assert_eq!(
            DashError::ConnectionRefused(4).connection_state(),
            ConnectionState::Error(Some(4))
        );
        assert_eq!(
            DashError::Transport("reset".into()).connection_state(),
            ConnectionState::Error(None)
        );
    }

    #[test]
    fn dash_error_display() {
        let err = DashError::Decode("expected value".to_string());
        assert!(err.to_string().contains("Payload Decode Error"));
    }
}
