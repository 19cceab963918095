//! Layered configuration: defaults, then an optional TOML file, then
//! `FEEDHUB_*` environment variables (`__` separates sections).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FeedError, FeedResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub price: PriceConfig,
    pub events: EventsConfig,
    pub notify: NotifyConfig,
    /// Fallback `EnvFilter` directive when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            price: PriceConfig::default(),
            events: EventsConfig::default(),
            notify: NotifyConfig::default(),
            log_filter: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    /// REST base for `GET /price?symbol=S`.
    pub base_url: String,
    /// Optional websocket endpoint pushing ticks.
    pub stream_url: Option<String>,
    /// Coalescing window for the update batcher.
    pub batch_window_ms: u64,
    /// Refresh cadence of the per-symbol REST feed.
    pub refresh_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            stream_url: None,
            batch_window_ms: 50,
            refresh_interval_ms: 5_000,
            request_timeout_ms: 5_000,
        }
    }
}

impl PriceConfig {
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// REST base for `GET /events?limit=N`.
    pub base_url: String,
    pub poll_interval_ms: u64,
    /// Buffer cap, also sent as `limit`.
    pub limit: usize,
    /// Send the newest buffered timestamp as `since`.
    pub incremental: bool,
    pub request_timeout_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            poll_interval_ms: 5_000,
            limit: 100,
            incremental: false,
            request_timeout_ms: 5_000,
        }
    }
}

impl EventsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub sound_enabled: bool,
    pub max_queued: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self { enabled: true, sound_enabled: true, max_queued: 50 }
    }
}

impl AppConfig {
    /// Load `.env`, then layer the file at `path` (if present) and the environment.
    pub fn load(path: Option<&Path>) -> FeedResult<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        match path {
            Some(p) => {
                builder = builder.add_source(config::File::from(p).required(true));
            }
            None => {
                builder = builder.add_source(config::File::with_name("feedhub").required(false));
            }
        }
        let cfg: AppConfig = builder
            .add_source(
                config::Environment::with_prefix("FEEDHUB")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> FeedResult<()> {
        if self.price.batch_window_ms == 0 {
            return bad("price.batch_window_ms");
        }
        if self.price.refresh_interval_ms == 0 {
            return bad("price.refresh_interval_ms");
        }
        if self.events.poll_interval_ms == 0 {
            return bad("events.poll_interval_ms");
        }
        if self.events.limit == 0 {
            return bad("events.limit");
        }
        Ok(())
    }
}

fn bad(field: &str) -> FeedResult<()> {
    Err(FeedError::Config(config::ConfigError::Message(format!("{field} must be > 0"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.price.batch_window(), Duration::from_millis(50));
        assert_eq!(cfg.events.limit, 100);
        assert_eq!(cfg.log_filter, "info");
    }

    #[test]
    fn test_zero_limit_rejected() {
        let mut cfg = AppConfig::default();
        cfg.events.limit = 0;
        assert!(matches!(cfg.validate(), Err(FeedError::Config(_))));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[price]\nbatch_window_ms = 20\n[events]\nincremental = true\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.price.batch_window_ms, 20);
        assert_eq!(cfg.price.refresh_interval_ms, 5_000);
        assert!(cfg.events.incremental);
        assert!(cfg.notify.sound_enabled);
    }
}
