// Router wires the price sources into the hub

use std::sync::Arc;

use tracing::info;

use crate::config::PriceConfig;
use crate::error::FeedResult;
use crate::market_data::adapters::http::HttpPriceSource;
use crate::market_data::adapters::PriceSource;
use crate::market_data::adapters::stream::PriceStream;
use crate::market_data::hub::{PriceCallback, PriceHub, Subscription};
use crate::task::TaskSlot;

/// Owns the hub plus the optional websocket stream feeding it.
pub struct PriceRouter {
    hub: PriceHub,
    stream: TaskSlot,
    stream_url: Option<String>,
}

impl PriceRouter {
    /// 1. REST source for initial fetch + refresh, 2. hub with the batch window.
    pub fn from_config(cfg: &PriceConfig) -> FeedResult<Self> {
        let source = Arc::new(HttpPriceSource::new(cfg)?);
        Ok(Self::with_source(cfg, source))
    }

    /// Same wiring with a caller-supplied request/response source.
    pub fn with_source(cfg: &PriceConfig, source: Arc<dyn PriceSource>) -> Self {
        let hub = PriceHub::with_source(cfg.batch_window(), source, cfg.refresh_interval());
        Self { hub, stream: TaskSlot::new(), stream_url: cfg.stream_url.clone() }
    }

    pub fn hub(&self) -> &PriceHub {
        &self.hub
    }

    /// Subscribe `callback` to every symbol and (re)start the stream for them.
    pub fn watch(&mut self, symbols: &[String], callback: PriceCallback) -> FeedResult<Vec<Subscription>> {
        let subs = symbols
            .iter()
            .map(|s| self.hub.subscribe(s, Arc::clone(&callback)))
            .collect::<FeedResult<Vec<_>>>()?;

        if let Some(url) = &self.stream_url {
            let stream = PriceStream::new(url, self.hub.symbols());
            info!(url = %url, symbols = ?stream.symbols, "starting price stream");
            self.stream.spawn(stream.run(self.hub.clone()))?;
        }
        Ok(subs)
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_active()
    }

    pub fn stop(&mut self) {
        self.stream.cancel();
        self.hub.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::types::{PriceBatch, PriceTick};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedSource {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PriceSource for FixedSource {
        async fn fetch(&self, symbol: &str) -> FeedResult<PriceTick> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PriceTick::new(symbol, 42.0, 0.5, Utc::now()))
        }
    }

    fn router() -> (PriceRouter, Arc<FixedSource>) {
        let source = Arc::new(FixedSource { calls: AtomicUsize::new(0) });
        (PriceRouter::with_source(&PriceConfig::default(), source.clone()), source)
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_without_stream_url() {
        let (mut router, source) = router();
        let cb: PriceCallback = Arc::new(|_: &PriceBatch| -> anyhow::Result<()> { Ok(()) });
        let subs = router
            .watch(&["btc/usdt".to_string(), "ETH/USDT".to_string()], cb)
            .unwrap();

        assert_eq!(subs.len(), 2);
        assert_eq!(router.hub().symbols(), vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()]);
        assert!(!router.is_streaming());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(router.hub().latest("BTC/USDT").unwrap().price, 42.0);

        router.stop();
        assert!(router.hub().symbols().is_empty());
    }

    #[tokio::test]
    async fn test_watch_rejects_empty_symbol() {
        let (mut router, _source) = router();
        let cb: PriceCallback = Arc::new(|_: &PriceBatch| -> anyhow::Result<()> { Ok(()) });
        assert!(router.watch(&["  ".to_string()], cb).is_err());
    }
}
