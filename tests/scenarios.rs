// End-to-end behaviour through the public API, with in-process fakes for
// the event source and notification platform.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;

use feedhub::config::{EventsConfig, NotifyConfig};
use feedhub::error::FeedResult;
use feedhub::events::types::{EventPayload, ScanCompleted};
use feedhub::events::{EventSource, PollBatch, TelemetryEvent, TelemetryPoller};
use feedhub::market_data::{PriceBatch, PriceCallback, PriceHub, PriceTick};
use feedhub::notify::{
    NotificationManager, NotificationPlatform, NotifierState, PermissionState, PlatformEventHandler,
    QueuedNotification, SignalAlert,
};

fn ts(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

fn event(id: &str, ms: i64) -> TelemetryEvent {
    TelemetryEvent {
        id: id.to_string(),
        payload: EventPayload::ScanCompleted(ScanCompleted::default()),
        symbol: None,
        timestamp: ts(ms),
    }
}

/// Returns responses in order, then keeps returning the last one.
struct SequencedSource {
    responses: Vec<Vec<TelemetryEvent>>,
    fetch_time: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SequencedSource {
    fn new(responses: Vec<Vec<TelemetryEvent>>, fetch_time: Duration) -> Arc<Self> {
        Arc::new(Self {
            responses,
            fetch_time,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EventSource for SequencedSource {
    async fn fetch_events(&self, _limit: usize, _since: Option<DateTime<Utc>>) -> FeedResult<Vec<TelemetryEvent>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let live = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(live, Ordering::SeqCst);
        tokio::time::sleep(self.fetch_time).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let idx = n.min(self.responses.len().saturating_sub(1));
        Ok(self.responses.get(idx).cloned().unwrap_or_default())
    }
}

struct RecordingPlatform {
    permission: Mutex<PermissionState>,
    shown: Mutex<Vec<QueuedNotification>>,
}

#[async_trait]
impl NotificationPlatform for RecordingPlatform {
    fn is_supported(&self) -> bool {
        true
    }

    fn permission(&self) -> FeedResult<PermissionState> {
        Ok(*self.permission.lock())
    }

    async fn request_permission(&self) -> FeedResult<PermissionState> {
        Ok(*self.permission.lock())
    }

    fn can_notify(&self) -> bool {
        *self.permission.lock() == PermissionState::Granted
    }

    fn show(&self, _id: u64, n: &QueuedNotification, _events: PlatformEventHandler) -> FeedResult<()> {
        self.shown.lock().push(n.clone());
        Ok(())
    }

    fn close(&self, _id: u64) {}
}

#[tokio::test(start_paused = true)]
async fn scenario_a_ticks_within_one_window_flush_once() {
    let hub = PriceHub::new(Duration::from_millis(50));
    let flushes: Arc<Mutex<Vec<(Duration, PriceBatch)>>> = Arc::default();
    let start = Instant::now();
    let sink = Arc::clone(&flushes);
    let cb: PriceCallback = Arc::new(move |batch: &PriceBatch| -> anyhow::Result<()> {
        sink.lock().push((start.elapsed(), batch.clone()));
        Ok(())
    });
    let _btc = hub.subscribe("BTC/USDT", Arc::clone(&cb)).unwrap();
    let _eth = hub.subscribe("ETH/USDT", cb).unwrap();

    hub.publish(PriceTick::new("BTC/USDT", 100.0, 0.0, ts(0)));
    tokio::time::advance(Duration::from_millis(10)).await;
    hub.publish(PriceTick::new("ETH/USDT", 200.0, 0.0, ts(10)));
    tokio::time::advance(Duration::from_millis(10)).await;
    hub.publish(PriceTick::new("BTC/USDT", 101.0, 0.0, ts(20)));

    tokio::time::advance(Duration::from_millis(25)).await;
    assert!(flushes.lock().is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let flushes = flushes.lock();
    assert_eq!(flushes.len(), 1);
    let (at, batch) = &flushes[0];
    assert!(*at >= Duration::from_millis(50) && *at < Duration::from_millis(52), "flushed at {at:?}");
    assert_eq!(batch.len(), 2);
    assert_eq!(batch["BTC/USDT"].price, 101.0);
    assert_eq!(batch["ETH/USDT"].price, 200.0);
}

#[tokio::test(start_paused = true)]
async fn scenario_b_overlapping_polls_merge_without_duplicates() {
    let source = SequencedSource::new(
        vec![vec![event("1", 10), event("2", 20)], vec![event("2", 20), event("3", 30)]],
        Duration::ZERO,
    );
    let poller = TelemetryPoller::new(source, 100);
    let batches: Arc<Mutex<Vec<PollBatch>>> = Arc::default();
    let sink = Arc::clone(&batches);

    poller.start_polling(Arc::new(move |b: &PollBatch| sink.lock().push(b.clone())), Duration::from_secs(5)).unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    poller.stop_polling();

    let ids: Vec<String> = poller.events().into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec!["3", "2", "1"]);
    let stamps: Vec<i64> = poller.events().iter().map(|e| e.timestamp.timestamp_millis()).collect();
    assert_eq!(stamps, vec![30, 20, 10]);
    assert_eq!(batches.lock().len(), 2);
}

#[tokio::test]
async fn scenario_c_default_permission_queues_signal() {
    let platform = Arc::new(RecordingPlatform {
        permission: Mutex::new(PermissionState::Default),
        shown: Mutex::new(Vec::new()),
    });
    let manager = NotificationManager::new(platform.clone(), None, &NotifyConfig::default());
    assert_eq!(manager.initialize(), NotifierState::ReadyDefault);

    let before = manager.get_stats();
    manager.notify_signal(&SignalAlert {
        symbol: "BTC/USDT".into(),
        direction: "long".into(),
        confidence: Some(0.7),
        ..SignalAlert::default()
    });
    let after = manager.get_stats();

    assert_eq!(after.queued_count, before.queued_count + 1);
    assert_eq!(after.active_count, before.active_count);
    assert!(platform.shown.lock().is_empty());
    assert_eq!(after.permission, PermissionState::Default);
}

#[tokio::test(start_paused = true)]
async fn scenario_d_slow_fetch_is_never_overlapped() {
    let source = SequencedSource::new(vec![vec![event("1", 1)]], Duration::from_millis(250));
    let cfg = EventsConfig { poll_interval_ms: 100, ..EventsConfig::default() };
    let poller = TelemetryPoller::from_config(source.clone(), &cfg);

    // start twice; the second call replaces the first timer
    poller.start_polling(Arc::new(|_: &PollBatch| {}), cfg.poll_interval()).unwrap();
    poller.start_polling(Arc::new(|_: &PollBatch| {}), cfg.poll_interval()).unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    // fetch 1 is still running; the 100ms tick has not issued fetch 2
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(source.calls.load(Ordering::SeqCst) >= 4);

    assert!(poller.stop_polling());
    let calls = source.calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(source.calls.load(Ordering::SeqCst), calls);
}
