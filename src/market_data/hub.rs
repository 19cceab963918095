//! Price hub: symbol -> subscriber registry plus the latest tick per symbol.
//!
//! The hub is the only writer of that state. Ticks enter through
//! [`PriceHub::publish`], are stored as the symbol's latest value and handed
//! to the [`UpdateBatcher`]; when the window flushes, each distinct callback
//! gets exactly one call carrying the ticks for the symbols it follows.
//!
//! Callback identity is the `Arc` allocation: registering the same
//! `PriceCallback` twice for a symbol still delivers to it once per flush.
//! Each registration returns its own [`Subscription`] guard, and the callback
//! stays registered until every guard for it has been released.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::FeedResult;
use crate::market_data::adapters::PriceSource;
use crate::market_data::batcher::{FlushSink, UpdateBatcher};
use crate::market_data::normaliser::Normaliser;
use crate::market_data::types::{PriceBatch, PriceTick, PublishOutcome};
use crate::task::{current_runtime, TaskSlot};

/// Consumer callback. Returning an error (or panicking) only affects this
/// callback; siblings still receive the batch.
pub type PriceCallback = Arc<dyn Fn(&PriceBatch) -> anyhow::Result<()> + Send + Sync>;

type CallbackKey = usize;
type SubscriptionId = u64;

fn symbol_key(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

fn callback_key(cb: &PriceCallback) -> CallbackKey {
    Arc::as_ptr(cb) as *const () as usize
}

struct Registration {
    callback: PriceCallback,
    ids: SmallVec<[SubscriptionId; 1]>,
}

#[derive(Default)]
struct SymbolEntry {
    subscribers: AHashMap<CallbackKey, Registration>,
    latest: Option<PriceTick>,
    // per-symbol REST refresh; dropped (and aborted) with the entry
    feed: TaskSlot,
}

#[derive(Default)]
struct Registry {
    symbols: AHashMap<String, SymbolEntry>,
    next_id: SubscriptionId,
}

impl Registry {
    fn is_registered(&self, symbol: &str, key: CallbackKey) -> bool {
        self.symbols
            .get(symbol)
            .map_or(false, |e| e.subscribers.contains_key(&key))
    }
}

struct HubInner {
    registry: Mutex<Registry>,
    batcher: UpdateBatcher<PriceTick>,
    source: Option<Arc<dyn PriceSource>>,
    refresh: Duration,
    normaliser: Normaliser,
    // runtime the hub was built in; feed tasks run here
    runtime: Option<Handle>,
}

#[derive(Clone)]
pub struct PriceHub {
    inner: Arc<HubInner>,
}

impl PriceHub {
    /// Hub without a request/response source; ticks only arrive via `publish`.
    pub fn new(batch_window: Duration) -> Self {
        Self::build(batch_window, None, Duration::from_secs(5))
    }

    /// Hub that fetches each symbol from `source` when it gains its first
    /// subscriber, then again every `refresh`.
    pub fn with_source(batch_window: Duration, source: Arc<dyn PriceSource>, refresh: Duration) -> Self {
        Self::build(batch_window, Some(source), refresh)
    }

    fn build(batch_window: Duration, source: Option<Arc<dyn PriceSource>>, refresh: Duration) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<HubInner>| {
            let weak = weak.clone();
            let sink: FlushSink<PriceTick> = Arc::new(move |batch| {
                if let Some(inner) = weak.upgrade() {
                    inner.deliver(batch);
                }
            });
            HubInner {
                registry: Mutex::new(Registry::default()),
                batcher: UpdateBatcher::new(batch_window, sink),
                source,
                refresh,
                normaliser: Normaliser::default(),
                runtime: Handle::try_current().ok(),
            }
        });
        info!(window_ms = batch_window.as_millis() as u64, "price hub ready");
        Self { inner }
    }

    /// Register `callback` for `symbol`. The returned guard removes exactly
    /// this registration when dropped or when `unsubscribe` is called.
    ///
    /// Callable from any thread. A hub with a price source needs a runtime
    /// (the one it was built in, or the caller's) to start a symbol's feed;
    /// without one this fails with `NoRuntime` and registers nothing.
    #[instrument(skip(self, callback))]
    pub fn subscribe(&self, symbol: &str, callback: PriceCallback) -> FeedResult<Subscription> {
        let symbol = self.inner.normaliser.symbol(symbol)?;
        let key = callback_key(&callback);

        let mut reg = self.inner.registry.lock();
        let first = !reg.symbols.contains_key(&symbol);
        let feed_runtime = match (&self.inner.source, first) {
            (Some(_), true) => Some(self.inner.runtime()?),
            _ => None,
        };

        let id = reg.next_id;
        reg.next_id += 1;
        let entry = reg.symbols.entry(symbol.clone()).or_default();
        entry
            .subscribers
            .entry(key)
            .or_insert_with(|| Registration { callback, ids: SmallVec::new() })
            .ids
            .push(id);

        if let (Some(runtime), Some(source)) = (feed_runtime, &self.inner.source) {
            debug!("first subscriber, starting feed");
            let task = feed_task(
                Arc::downgrade(&self.inner),
                Arc::clone(source),
                symbol.clone(),
                self.inner.refresh,
            );
            entry.feed.spawn_on(&runtime, task);
        }
        metrics::gauge!("feedhub_symbols").set(reg.symbols.len() as f64);

        Ok(Subscription {
            hub: Arc::downgrade(&self.inner),
            symbol,
            key,
            id,
            active: true,
        })
    }

    /// Feed-adapter entry point, callable from any thread. Never panics or
    /// errors; rejected ticks are logged and reported through the outcome.
    pub fn publish(&self, mut tick: PriceTick) -> PublishOutcome {
        if let Err(e) = tick.validate() {
            warn!(error = %e, "dropping malformed tick");
            metrics::counter!("feedhub_ticks_dropped_total", "reason" => "malformed").increment(1);
            return PublishOutcome::Malformed;
        }
        tick.symbol = symbol_key(&tick.symbol);

        let mut reg = self.inner.registry.lock();
        let Some(entry) = reg.symbols.get_mut(&tick.symbol) else {
            trace!(symbol = %tick.symbol, "no subscribers, tick ignored");
            return PublishOutcome::NoSubscribers;
        };
        if let Some(prev) = &entry.latest {
            if tick.timestamp < prev.timestamp {
                debug!(symbol = %tick.symbol, "stale tick ignored");
                metrics::counter!("feedhub_ticks_dropped_total", "reason" => "stale").increment(1);
                return PublishOutcome::Stale;
            }
        }
        entry.latest = Some(tick.clone());
        // lock order is always registry -> batcher
        if let Err(e) = self.inner.batcher.push(tick.symbol.clone(), tick) {
            warn!(error = %e, "tick stored but not scheduled for delivery");
            metrics::counter!("feedhub_ticks_dropped_total", "reason" => "no_runtime").increment(1);
            return PublishOutcome::NoRuntime;
        }
        metrics::counter!("feedhub_ticks_published_total").increment(1);
        PublishOutcome::Queued
    }

    /// Decode a raw JSON tick and publish it.
    pub fn publish_json(&self, value: serde_json::Value) -> PublishOutcome {
        match self.inner.normaliser.tick_from_json(value) {
            Ok(tick) => self.publish(tick),
            Err(e) => {
                warn!(error = %e, "dropping undecodable tick");
                metrics::counter!("feedhub_ticks_dropped_total", "reason" => "malformed").increment(1);
                PublishOutcome::Malformed
            }
        }
    }

    pub fn latest(&self, symbol: &str) -> Option<PriceTick> {
        let reg = self.inner.registry.lock();
        reg.symbols.get(&symbol_key(symbol)).and_then(|e| e.latest.clone())
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.inner.registry.lock().symbols.keys().cloned().collect();
        out.sort();
        out
    }

    /// Distinct callbacks registered for `symbol`.
    pub fn subscriber_count(&self, symbol: &str) -> usize {
        let reg = self.inner.registry.lock();
        reg.symbols.get(&symbol_key(symbol)).map_or(0, |e| e.subscribers.len())
    }

    pub fn batch_window(&self) -> Duration {
        self.inner.batcher.window()
    }

    /// Drop every registration, stop all feeds and cancel the pending flush.
    pub fn dispose(&self) {
        let dropped = {
            let mut reg = self.inner.registry.lock();
            std::mem::take(&mut reg.symbols)
        };
        self.inner.batcher.dispose();
        info!(symbols = dropped.len(), "price hub disposed");
        // entries (and their feed tasks) drop here, outside the lock
    }
}

impl HubInner {
    fn runtime(&self) -> FeedResult<Handle> {
        match &self.runtime {
            Some(rt) => Ok(rt.clone()),
            None => current_runtime(),
        }
    }

    fn unsubscribe(&self, symbol: &str, key: CallbackKey, id: SubscriptionId) {
        // Removed state is carried out of the lock and dropped after it: a
        // callback may own Subscriptions whose drop re-enters the registry.
        let (removed_registration, removed_entry) = {
            let mut reg = self.registry.lock();
            let Some(entry) = reg.symbols.get_mut(symbol) else { return };
            let mut removed_registration = None;
            if let Some(registration) = entry.subscribers.get_mut(&key) {
                registration.ids.retain(|i| *i != id);
                if registration.ids.is_empty() {
                    removed_registration = entry.subscribers.remove(&key);
                }
            }
            let removed_entry = if entry.subscribers.is_empty() {
                let entry = reg.symbols.remove(symbol);
                self.batcher.discard(symbol);
                metrics::gauge!("feedhub_symbols").set(reg.symbols.len() as f64);
                entry
            } else {
                None
            };
            (removed_registration, removed_entry)
        };
        if removed_entry.is_some() {
            debug!(symbol, "last subscriber gone, feed stopped");
        }
        drop(removed_registration);
        drop(removed_entry);
    }

    fn deliver(&self, batch: PriceBatch) {
        // group by callback so each one sees a single call per flush
        let mut groups: AHashMap<CallbackKey, (PriceCallback, PriceBatch)> = AHashMap::new();
        {
            let reg = self.registry.lock();
            for (symbol, tick) in &batch {
                let Some(entry) = reg.symbols.get(symbol) else { continue };
                for (key, registration) in &entry.subscribers {
                    groups
                        .entry(*key)
                        .or_insert_with(|| (Arc::clone(&registration.callback), PriceBatch::new()))
                        .1
                        .insert(symbol.clone(), tick.clone());
                }
            }
        }

        for (key, (callback, mut ticks)) in groups {
            // an earlier callback in this flush may have unsubscribed this one
            {
                let reg = self.registry.lock();
                ticks.retain(|symbol, _| reg.is_registered(symbol, key));
            }
            if ticks.is_empty() {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| callback(&ticks))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "price callback failed");
                    metrics::counter!("feedhub_callback_failures_total").increment(1);
                }
                Err(_) => {
                    error!("price callback panicked");
                    metrics::counter!("feedhub_callback_failures_total").increment(1);
                }
            }
        }
    }
}

// Initial fetch, then refresh on a fixed cadence. Failures wait for the next tick.
async fn feed_task(hub: Weak<HubInner>, source: Arc<dyn PriceSource>, symbol: String, refresh: Duration) {
    let mut ticker = tokio::time::interval(refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let result = source.fetch(&symbol).await;
        let Some(inner) = hub.upgrade() else { break };
        match result {
            Ok(tick) => {
                PriceHub { inner }.publish(tick);
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "price fetch failed");
                metrics::counter!("feedhub_price_fetch_failures_total").increment(1);
            }
        }
    }
}

/// Guard for one registration. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    hub: Weak<HubInner>,
    symbol: String,
    key: CallbackKey,
    id: SubscriptionId,
    active: bool,
}

impl Subscription {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(&self.symbol, self.key, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
