// Wire shapes for the price and telemetry endpoints.
// Upstream is loose about types (numbers sometimes arrive as strings,
// timestamps as epoch-ms or ISO strings), so these stay permissive and
// the normaliser / event decoder do the validation.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::error::{FeedError, FeedResult};

/// A number that may be sent as `101.5` or `"101.5"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireNumber {
    Num(f64),
    Text(String),
}

impl WireNumber {
    pub fn to_f64(&self) -> FeedResult<f64> {
        match self {
            WireNumber::Num(n) => Ok(*n),
            WireNumber::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| FeedError::malformed(format!("not a number: {s:?}"))),
        }
    }
}

/// Epoch milliseconds or an ISO-8601 / RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    Millis(i64),
    FloatMillis(f64),
    Text(String),
}

impl WireTimestamp {
    pub fn to_datetime(&self) -> FeedResult<DateTime<Utc>> {
        match self {
            WireTimestamp::Millis(ms) => from_millis(*ms),
            WireTimestamp::FloatMillis(ms) if ms.is_finite() => from_millis(ms.round() as i64),
            WireTimestamp::FloatMillis(ms) => Err(FeedError::malformed(format!("bad timestamp {ms}"))),
            WireTimestamp::Text(s) => parse_text(s),
        }
    }
}

fn from_millis(ms: i64) -> FeedResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| FeedError::malformed(format!("timestamp out of range: {ms}")))
}

fn parse_text(s: &str) -> FeedResult<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // Naive ISO strings (no offset) are taken as UTC.
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| FeedError::malformed(format!("unparseable timestamp: {s:?}")))
}

// Source: GET /price?symbol=S
#[derive(Debug, Clone, Deserialize)]
pub struct WireTick {
    pub symbol: String,
    pub price: WireNumber,
    #[serde(default, rename = "changePercent24h", alias = "change_percent_24h")]
    pub change_percent_24h: Option<WireNumber>,
    #[serde(default)]
    pub timestamp: Option<WireTimestamp>,
}

// Source: GET /events?limit=N -> { "events": [...] }
// Members are kept as raw JSON so one bad event cannot sink the batch.
#[derive(Debug, Deserialize)]
pub struct EventsResponse {
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
}

// Websocket frames: { "channel": "price", "data": { ...tick... } }
#[derive(Debug, Deserialize)]
pub struct StreamMessage {
    pub channel: String,
    #[serde(default)]
    pub data: serde_json::Value,
}
