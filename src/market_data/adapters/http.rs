// REST price source: GET {base_url}/price?symbol=S

use tracing::{debug, instrument};

use super::PriceSource;
use crate::config::PriceConfig;
use crate::error::FeedResult;
use crate::market_data::normaliser::Normaliser;
use crate::market_data::types::PriceTick;
use crate::wire::WireTick;

pub struct HttpPriceSource {
    client: reqwest::Client,
    pub base_url: String, // e.g. "http://localhost:8000"
    normaliser: Normaliser,
}

impl HttpPriceSource {
    pub fn new(cfg: &PriceConfig) -> FeedResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            normaliser: Normaliser::default(),
        })
    }

    fn price_url(&self) -> String {
        format!("{}/price", self.base_url)
    }
}

#[async_trait::async_trait]
impl PriceSource for HttpPriceSource {
    #[instrument(skip(self))]
    async fn fetch(&self, symbol: &str) -> FeedResult<PriceTick> {
        let wire: WireTick = self
            .client
            .get(self.price_url())
            .query(&[("symbol", symbol)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let tick = self.normaliser.tick(wire)?;
        debug!(price = tick.price, "fetched price");
        Ok(tick)
    }
}
