// Shared trait for price sources

use crate::error::FeedResult;
use crate::market_data::types::PriceTick;

/// Request/response price source (`GET /price?symbol=S`). The hub calls it
/// once when a symbol gains its first subscriber and then on every refresh.
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch(&self, symbol: &str) -> FeedResult<PriceTick>;
}

pub mod http;
pub mod stream;
