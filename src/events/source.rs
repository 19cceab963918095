// Telemetry event source: GET {base_url}/events?limit=N[&since=cursor]

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, instrument};

use crate::config::EventsConfig;
use crate::error::FeedResult;
use crate::events::types::{decode_events, TelemetryEvent};
use crate::wire::EventsResponse;

#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    /// Most recent `limit` events, or only those after `since` when given.
    async fn fetch_events(&self, limit: usize, since: Option<DateTime<Utc>>) -> FeedResult<Vec<TelemetryEvent>>;
}

pub struct HttpEventSource {
    client: reqwest::Client,
    pub base_url: String,
}

impl HttpEventSource {
    pub fn new(cfg: &EventsConfig) -> FeedResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .build()?;
        Ok(Self { client, base_url: cfg.base_url.trim_end_matches('/').to_string() })
    }

    fn query(limit: usize, since: Option<DateTime<Utc>>) -> Vec<(&'static str, String)> {
        let mut q = vec![("limit", limit.to_string())];
        if let Some(ts) = since {
            q.push(("since", ts.to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
        q
    }
}

#[async_trait::async_trait]
impl EventSource for HttpEventSource {
    #[instrument(skip(self))]
    async fn fetch_events(&self, limit: usize, since: Option<DateTime<Utc>>) -> FeedResult<Vec<TelemetryEvent>> {
        let body: EventsResponse = self
            .client
            .get(format!("{}/events", self.base_url))
            .query(&Self::query(limit, since))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let received = body.events.len();
        let events = decode_events(body.events);
        debug!(received, decoded = events.len(), "fetched events");
        Ok(events)
    }
}
