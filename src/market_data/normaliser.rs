// Convert wire ticks into validated PriceTicks.

use chrono::Utc;

use crate::error::{FeedError, FeedResult};
use crate::market_data::types::PriceTick;
use crate::wire::WireTick;

#[derive(Debug, Clone)]
pub struct Normaliser {
    /// Stamp ticks that arrive without a timestamp with the receive time
    /// instead of rejecting them.
    pub stamp_missing: bool,
}

impl Default for Normaliser {
    fn default() -> Self {
        Self { stamp_missing: true }
    }
}

impl Normaliser {
    pub fn new(stamp_missing: bool) -> Self {
        Self { stamp_missing }
    }

    /// "btc/usdt " -> "BTC/USDT"
    pub fn symbol(&self, s: &str) -> FeedResult<String> {
        let sym = s.trim();
        if sym.is_empty() {
            return Err(FeedError::malformed("empty symbol"));
        }
        Ok(sym.to_ascii_uppercase())
    }

    pub fn tick(&self, wire: WireTick) -> FeedResult<PriceTick> {
        let symbol = self.symbol(&wire.symbol)?;
        let price = wire.price.to_f64()?;
        let change = match &wire.change_percent_24h {
            Some(n) => n.to_f64()?,
            None => 0.0,
        };
        let timestamp = match &wire.timestamp {
            Some(ts) => ts.to_datetime()?,
            None if self.stamp_missing => Utc::now(),
            None => return Err(FeedError::malformed(format!("{symbol}: tick without timestamp"))),
        };

        let tick = PriceTick { symbol, price, change_percent_24h: change, timestamp };
        tick.validate()?;
        Ok(tick)
    }

    /// Decode and normalise a raw JSON tick.
    pub fn tick_from_json(&self, value: serde_json::Value) -> FeedResult<PriceTick> {
        let wire: WireTick = serde_json::from_value(value)?;
        self.tick(wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_price_and_symbol_case() {
        let n = Normaliser::default();
        let tick = n
            .tick_from_json(json!({"symbol": " eth/usdt", "price": "2000.50", "changePercent24h": "-1.25", "timestamp": 1_700_000_000_000i64}))
            .unwrap();
        assert_eq!(tick.symbol, "ETH/USDT");
        assert_eq!(tick.price, 2000.5);
        assert_eq!(tick.change_percent_24h, -1.25);
        assert_eq!(tick.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_missing_timestamp() {
        let raw = json!({"symbol": "BTC/USDT", "price": 100});
        assert!(Normaliser::default().tick_from_json(raw.clone()).is_ok());
        assert!(matches!(
            Normaliser::new(false).tick_from_json(raw),
            Err(FeedError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_rejects_bad_prices() {
        let n = Normaliser::default();
        assert!(n.tick_from_json(json!({"symbol": "BTC/USDT", "price": 0})).is_err());
        assert!(n.tick_from_json(json!({"symbol": "BTC/USDT", "price": "n/a"})).is_err());
        assert!(n.tick_from_json(json!({"symbol": "", "price": 1})).is_err());
        assert!(n.tick_from_json(json!({"price": 1})).is_err());
    }
}
