// Websocket price stream: pushes ticks into the hub as they arrive.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::market_data::hub::PriceHub;
use crate::market_data::types::PublishOutcome;
use crate::wire::StreamMessage;

pub struct PriceStream {
    pub ws_url: String,        // e.g. "ws://localhost:8000/ws/prices"
    pub symbols: Vec<String>,  // e.g. ["BTC/USDT", "ETH/USDT"]
    pub reconnect_delay: Duration,
}

impl PriceStream {
    pub fn new(ws_url: &str, symbols: Vec<String>) -> Self {
        Self {
            ws_url: ws_url.to_string(),
            symbols,
            reconnect_delay: Duration::from_secs(3),
        }
    }

    pub fn subscribe_message(symbol: &str) -> serde_json::Value {
        serde_json::json!({
            "method": "subscribe",
            "subscription": {
                "type": "price",
                "symbol": symbol
            }
        })
    }

    /// Connect, subscribe, publish, reconnect. Runs until the task is aborted.
    pub async fn run(self, hub: PriceHub) {
        loop {
            match self.stream_once(&hub).await {
                Ok(count) => info!(url = %self.ws_url, count, "price stream closed"),
                Err(e) => warn!(url = %self.ws_url, error = %e, "price stream failed"),
            }
            metrics::counter!("feedhub_stream_reconnects_total").increment(1);
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    // Returns the number of messages handled before the connection ended.
    async fn stream_once(&self, hub: &PriceHub) -> anyhow::Result<u64> {
        let (ws, _response) = tokio_tungstenite::connect_async(&self.ws_url).await?;
        info!(url = %self.ws_url, "price stream connected");
        let (mut write, mut read) = ws.split();

        for symbol in &self.symbols {
            let msg = Self::subscribe_message(symbol);
            write.send(Message::Text(msg.to_string())).await?;
        }

        let mut handled = 0u64;
        while let Some(msg) = read.next().await {
            match msg? {
                Message::Text(text) => {
                    handled += 1;
                    handle_text(hub, &text);
                }
                Message::Ping(payload) => {
                    write.send(Message::Pong(payload)).await?;
                }
                Message::Close(_) => break,
                other => debug!(?other, "ignoring non-text frame"),
            }
        }
        Ok(handled)
    }
}

pub(crate) fn handle_text(hub: &PriceHub, text: &str) -> Option<PublishOutcome> {
    let msg: StreamMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "unparseable stream frame");
            return None;
        }
    };
    if msg.channel != "price" {
        debug!(channel = %msg.channel, "ignoring stream channel");
        return None;
    }
    Some(hub.publish_json(msg.data))
}
