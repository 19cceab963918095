use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FeedError, FeedResult};

/// Latest price observation for one symbol. A newer tick supersedes the
/// previous one; history is not retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
    pub change_percent_24h: f64,
    pub timestamp: DateTime<Utc>,
}

impl PriceTick {
    pub fn new(symbol: impl Into<String>, price: f64, change_percent_24h: f64, timestamp: DateTime<Utc>) -> Self {
        Self { symbol: symbol.into(), price, change_percent_24h, timestamp }
    }

    pub fn validate(&self) -> FeedResult<()> {
        if self.symbol.trim().is_empty() {
            return Err(FeedError::malformed("tick without symbol"));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(FeedError::malformed(format!("{}: bad price {}", self.symbol, self.price)));
        }
        if !self.change_percent_24h.is_finite() {
            return Err(FeedError::malformed(format!("{}: bad 24h change", self.symbol)));
        }
        Ok(())
    }
}

/// One flush worth of ticks, keyed by symbol.
pub type PriceBatch = BTreeMap<String, PriceTick>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Stored as latest and handed to the batcher.
    Queued,
    /// Nobody is subscribed to the symbol.
    NoSubscribers,
    /// Older than the latest tick already held for the symbol.
    Stale,
    /// Failed validation.
    Malformed,
    /// Stored as latest, but no runtime was available to schedule delivery.
    NoRuntime,
}
