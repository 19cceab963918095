//! Telemetry events and their typed payloads.
//!
//! On the wire an event is `{id, event_type, data, symbol?, timestamp}` with
//! `data` shaped by `event_type`. Decoding turns that into [`EventPayload`];
//! unknown event types are kept as [`EventPayload::Other`] rather than
//! dropped, while a known type with an unusable `data` is malformed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{FeedError, FeedResult};
use crate::wire::WireTimestamp;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStarted {
    #[serde(default)]
    pub symbols: Vec<String>,
    pub timeframe: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanCompleted {
    #[serde(default)]
    pub symbols_scanned: u32,
    #[serde(default)]
    pub signals_found: u32,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalGenerated {
    pub direction: Option<String>,
    pub confidence: Option<f64>,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalRejected {
    #[serde(default)]
    pub reason: String,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AltStopSuggested {
    pub suggested_stop: f64,
    pub current_stop: Option<f64>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorOccurred {
    pub message: String,
    pub component: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    ScanStarted(ScanStarted),
    ScanCompleted(ScanCompleted),
    SignalGenerated(SignalGenerated),
    SignalRejected(SignalRejected),
    AltStopSuggested(AltStopSuggested),
    ErrorOccurred(ErrorOccurred),
    Other { event_type: String, data: Value },
}

impl EventPayload {
    pub fn event_type(&self) -> &str {
        match self {
            EventPayload::ScanStarted(_) => "scan_started",
            EventPayload::ScanCompleted(_) => "scan_completed",
            EventPayload::SignalGenerated(_) => "signal_generated",
            EventPayload::SignalRejected(_) => "signal_rejected",
            EventPayload::AltStopSuggested(_) => "alt_stop_suggested",
            EventPayload::ErrorOccurred(_) => "error_occurred",
            EventPayload::Other { event_type, .. } => event_type,
        }
    }

    fn decode(event_type: &str, data: Value) -> FeedResult<Self> {
        // absent data is an empty object, not a type error
        let data = if data.is_null() { Value::Object(Default::default()) } else { data };
        let payload = match event_type {
            "scan_started" => EventPayload::ScanStarted(serde_json::from_value(data)?),
            "scan_completed" => EventPayload::ScanCompleted(serde_json::from_value(data)?),
            "signal_generated" => EventPayload::SignalGenerated(serde_json::from_value(data)?),
            "signal_rejected" => EventPayload::SignalRejected(serde_json::from_value(data)?),
            "alt_stop_suggested" => EventPayload::AltStopSuggested(serde_json::from_value(data)?),
            "error_occurred" => EventPayload::ErrorOccurred(serde_json::from_value(data)?),
            "" => return Err(FeedError::malformed("empty event_type")),
            other => EventPayload::Other { event_type: other.to_string(), data },
        };
        Ok(payload)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub id: String,
    pub payload: EventPayload,
    pub symbol: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryEvent {
    pub fn event_type(&self) -> &str {
        self.payload.event_type()
    }
}

// ids show up as strings or integers depending on the producer
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Num(i64),
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: RawId,
    event_type: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    symbol: Option<String>,
    timestamp: WireTimestamp,
}

impl TryFrom<Value> for TelemetryEvent {
    type Error = FeedError;

    fn try_from(value: Value) -> FeedResult<Self> {
        let raw: RawEvent = serde_json::from_value(value)?;
        let id = match raw.id {
            RawId::Text(s) => s,
            RawId::Num(n) => n.to_string(),
        };
        if id.trim().is_empty() {
            return Err(FeedError::malformed("event without id"));
        }
        let payload = EventPayload::decode(&raw.event_type, raw.data)
            .map_err(|e| FeedError::malformed(format!("event {id}: {e}")))?;
        Ok(TelemetryEvent {
            id,
            payload,
            symbol: raw.symbol.filter(|s| !s.is_empty()),
            timestamp: raw.timestamp.to_datetime()?,
        })
    }
}

/// Decode a response's members one by one; malformed members are logged and
/// dropped without affecting the rest.
pub fn decode_events(values: Vec<Value>) -> Vec<TelemetryEvent> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        match TelemetryEvent::try_from(value) {
            Ok(ev) => out.push(ev),
            Err(e) => {
                warn!(error = %e, "dropping malformed telemetry event");
                metrics::counter!("feedhub_events_dropped_total").increment(1);
            }
        }
    }
    out
}
