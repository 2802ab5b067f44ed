//! Message ingestion: raw transport message → store mutation.
//!
//! [`IngestionHandler::handle`] runs on the transport thread for every
//! incoming message. It only ever touches the [`SharedStore`] and it never
//! fails outward: a bad payload becomes a `parse-error` debug record.

use std::sync::Arc;

use iotdash_types::{DashError, DebugRecord, MessageSummary, TelemetryPayload};
use serde_json::{Map, Value};
use tracing::debug;

use crate::store::SharedStore;

/// What happened to one incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Appended to a known channel buffer.
    Buffered { channel: String, value: f64 },
    /// Decoded and logged, but the channel is not one the store tracks.
    Unbuffered { channel: String },
    /// Could not be decoded; logged as a parse error.
    Rejected,
}

/// Translates transport messages into [`SharedStore`] mutations.
#[derive(Clone)]
pub struct IngestionHandler {
    store: Arc<SharedStore>,
}

impl IngestionHandler {
    pub fn new(store: Arc<SharedStore>) -> Self {
        Self { store }
    }

    /// Ingest one message.
    ///
    /// Appends `value` to the channel named by the last topic segment (if the
    /// store knows it) and logs a redacted summary. Decode failures are
    /// logged as a single parse error and leave every buffer untouched.
    pub fn handle(&self, topic: &str, payload: &[u8]) -> IngestOutcome {
        let channel = channel_of(topic);
        match decode_payload(payload) {
            Ok(decoded) => {
                let buffered = self.store.append(channel, decoded.value);
                self.store
                    .log_event(DebugRecord::Message(MessageSummary::from_payload(topic, &decoded)));
                if buffered {
                    debug!(topic, channel, value = decoded.value, "sample buffered");
                    IngestOutcome::Buffered {
                        channel: channel.to_string(),
                        value: decoded.value,
                    }
                } else {
                    debug!(topic, channel, "message on untracked channel");
                    IngestOutcome::Unbuffered {
                        channel: channel.to_string(),
                    }
                }
            }
            Err(e) => {
                debug!(topic, error = %e, "payload rejected");
                let detail = match e {
                    DashError::Decode(detail) => detail,
                    other => other.to_string(),
                };
                self.store.log_event(DebugRecord::parse_error(topic, detail));
                IngestOutcome::Rejected
            }
        }
    }
}

/// Last `/`-separated segment of `topic`.
///
/// ```
/// use iotdash_middleware::ingest::channel_of;
///
/// assert_eq!(channel_of("cursoIoT/demo/temp"), "temp");
/// assert_eq!(channel_of("temp"), "temp");
/// ```
pub fn channel_of(topic: &str) -> &str {
    topic.rsplit_once('/').map_or(topic, |(_, last)| last)
}

/// Decode a UTF-8 JSON object carrying a numeric `value`.
///
/// `value` may be a JSON number or a string holding a finite number
/// (`"23.5"`); anything else is rejected with [`DashError::Decode`].
pub fn decode_payload(payload: &[u8]) -> Result<TelemetryPayload, DashError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| DashError::Decode(format!("payload is not valid UTF-8: {e}")))?;
    let json: Value = serde_json::from_str(text)
        .map_err(|e| DashError::Decode(format!("invalid JSON: {e}")))?;
    let Value::Object(mut fields) = json else {
        return Err(DashError::Decode("payload is not a JSON object".to_string()));
    };

    let value = match fields.get("value") {
        None => return Err(DashError::Decode("missing field `value`".to_string())),
        Some(raw) => numeric(raw)
            .ok_or_else(|| DashError::Decode(format!("field `value` is not numeric: {raw}")))?,
    };

    Ok(TelemetryPayload {
        value,
        t: take_present(&mut fields, "t"),
        kind: take_present(&mut fields, "type"),
        unit: take_present(&mut fields, "unit"),
        v: take_present(&mut fields, "v"),
    })
}

fn numeric(raw: &Value) -> Option<f64> {
    let value = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

fn take_present(fields: &mut Map<String, Value>, key: &str) -> Option<Value> {
    fields.remove(key).filter(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotdash_types::DEFAULT_CHANNELS;
    use serde_json::json;

    fn make_handler() -> (Arc<SharedStore>, IngestionHandler) {
        let store = Arc::new(SharedStore::new(DEFAULT_CHANNELS));
        let handler = IngestionHandler::new(Arc::clone(&store));
        (store, handler)
    }

    #[test]
    fn known_channel_value_is_buffered() {
        let (store, handler) = make_handler();
        let outcome = handler.handle("base/temp", br#"{"value": 23.5}"#);
        assert_eq!(
            outcome,
            IngestOutcome::Buffered {
                channel: "temp".to_string(),
                value: 23.5
            }
        );
        assert_eq!(store.latest("temp"), Some(23.5));
        assert_eq!(store.debug_records().len(), 1);
    }

    #[test]
    fn unknown_channel_is_logged_not_buffered() {
        let (store, handler) = make_handler();
        let outcome = handler.handle("base/unknown", br#"{"value": 23.5}"#);
        assert!(matches!(outcome, IngestOutcome::Unbuffered { .. }));
        assert!(store.snapshot_all().values().all(Vec::is_empty));

        let lines = store.snapshot_debug();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("base/unknown"));
    }

    #[test]
    fn state_suffix_has_no_special_meaning() {
        let (store, handler) = make_handler();
        let outcome = handler.handle("base/state", br#"{"value": 1}"#);
        assert!(matches!(outcome, IngestOutcome::Unbuffered { .. }));
        assert!(store.snapshot_all().values().all(Vec::is_empty));
    }

    #[test]
    fn missing_value_produces_exactly_one_parse_error() {
        let (store, handler) = make_handler();
        let outcome = handler.handle("base/temp", br#"{"notvalue": 1}"#);
        assert_eq!(outcome, IngestOutcome::Rejected);
        assert!(store.snapshot_all().values().all(Vec::is_empty));

        let records = store.debug_records();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_parse_error());
        assert!(records[0].to_string().starts_with("[parse-error]"));
        assert!(records[0].to_string().contains("topic=base/temp"));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let (store, handler) = make_handler();
        assert_eq!(handler.handle("base/hum", b"{not json"), IngestOutcome::Rejected);
        assert_eq!(handler.handle("base/hum", &[0xff, 0xfe]), IngestOutcome::Rejected);
        assert_eq!(handler.handle("base/hum", b"[1,2,3]"), IngestOutcome::Rejected);
        assert_eq!(store.latest("hum"), None);
        assert!(store.debug_records().iter().all(DebugRecord::is_parse_error));
    }

    #[test]
    fn non_numeric_value_is_rejected() {
        let (store, handler) = make_handler();
        assert_eq!(
            handler.handle("base/temp", br#"{"value": "warm"}"#),
            IngestOutcome::Rejected
        );
        assert_eq!(
            handler.handle("base/temp", br#"{"value": null}"#),
            IngestOutcome::Rejected
        );
        assert_eq!(store.latest("temp"), None);
    }

    #[test]
    fn numeric_string_value_is_accepted() {
        let (store, handler) = make_handler();
        handler.handle("base/prox", br#"{"value": "42.0"}"#);
        assert_eq!(store.latest("prox"), Some(42.0));
    }

    #[test]
    fn optional_fields_pass_through_to_debug_log() {
        let (store, handler) = make_handler();
        handler.handle(
            "base/hum",
            br#"{"value": 51.2, "t": 1700000000, "type": "humidity", "unit": "%", "extra": "x"}"#,
        );
        let line = &store.snapshot_debug()[0];
        let parsed: Value = serde_json::from_str(line).unwrap();
        assert_eq!(parsed["topic"], json!("base/hum"));
        assert_eq!(parsed["t"], json!(1700000000));
        assert_eq!(parsed["type"], json!("humidity"));
        assert_eq!(parsed["unit"], json!("%"));
        assert_eq!(parsed["value"], json!(51.2));
        assert_eq!(parsed["v"], Value::Null);
        assert!(parsed.get("extra").is_none(), "unrecognised fields are redacted");
    }

    #[test]
    fn arrival_order_is_preserved_per_channel() {
        let (store, handler) = make_handler();
        for i in 0..5 {
            handler.handle("base/temp", format!(r#"{{"value": {i}}}"#).as_bytes());
        }
        assert_eq!(store.snapshot("temp"), Some(vec![0.0, 1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    fn channel_of_handles_edge_cases() {
        assert_eq!(channel_of("a/b/c"), "c");
        assert_eq!(channel_of("single"), "single");
        assert_eq!(channel_of("trailing/"), "");
    }
}
