use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use feedhub::config::AppConfig;
use feedhub::events::{HttpEventSource, PollBatch, TelemetryPoller};
use feedhub::market_data::router::PriceRouter;
use feedhub::market_data::{PriceBatch, PriceCallback};
use feedhub::notify::{LogAudio, LogPlatform, NotificationManager, PermissionState};
use feedhub::telemetry::{init_metrics, init_tracing};

/// Headless watcher: logs price batches and telemetry events, and raises
/// notifications for the events worth one.
#[derive(Parser, Debug)]
#[command(name = "feedhub", version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file (defaults to ./feedhub.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Symbols to watch, comma separated
    #[arg(long, value_delimiter = ',', default_value = "BTC/USDT,ETH/USDT")]
    symbols: Vec<String>,

    /// Override events.poll_interval_ms
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Do not poll the telemetry source
    #[arg(long)]
    no_events: bool,

    /// Answer the notification permission prompt with "granted"
    #[arg(long)]
    grant_notifications: bool,

    /// Prometheus exporter port (only with the metrics-exporter feature)
    #[arg(long, default_value_t = 9000)]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut cfg = AppConfig::load(args.config.as_deref())?;
    if let Some(ms) = args.poll_interval_ms {
        cfg.events.poll_interval_ms = ms;
    }
    cfg.validate()?;

    init_tracing(&cfg.log_filter);
    init_metrics(args.metrics_port)?;

    // Notifications: the headless platform starts undecided and answers
    // the one prompt according to --grant-notifications.
    let platform = Arc::new(LogPlatform::new(PermissionState::Default, args.grant_notifications));
    let notifier = NotificationManager::new(platform, Some(Arc::new(LogAudio)), &cfg.notify);
    notifier.initialize();
    let permission = notifier.request_permission().await;
    info!(%permission, "notification permission");

    // Prices
    let mut router = PriceRouter::from_config(&cfg.price)?;
    let on_prices: PriceCallback = Arc::new(|batch: &PriceBatch| -> anyhow::Result<()> {
        for tick in batch.values() {
            info!(
                symbol = %tick.symbol,
                price = tick.price,
                change_24h = tick.change_percent_24h,
                "price"
            );
        }
        Ok(())
    });
    let subscriptions = router.watch(&args.symbols, on_prices)?;
    info!(symbols = ?router.hub().symbols(), "watching prices");

    // Telemetry
    let poller = if args.no_events {
        None
    } else {
        let source = Arc::new(HttpEventSource::new(&cfg.events)?);
        let poller = TelemetryPoller::from_config(source, &cfg.events);
        let events_notifier = notifier.clone();
        poller.start_polling(
            Arc::new(move |batch: &PollBatch| {
                // added is newest first; log in arrival order
                for event in batch.added.iter().rev() {
                    info!(id = %event.id, event_type = event.event_type(), symbol = ?event.symbol, "event");
                    events_notifier.notify_event(event);
                }
            }),
            cfg.events.poll_interval(),
        )?;
        Some(poller)
    };

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    if let Some(poller) = &poller {
        poller.stop_polling();
        info!(stats = ?poller.stats(), "telemetry poller stopped");
    }
    drop(subscriptions);
    router.stop();

    let stats = notifier.get_stats();
    info!(
        active = stats.active_count,
        queued = stats.queued_count,
        permission = %stats.permission,
        "notification stats"
    );
    Ok(())
}
