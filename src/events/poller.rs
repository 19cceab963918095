//! Telemetry poller.
//!
//! Periodically pulls events from an [`EventSource`] and merges them into a
//! capped [`EventBuffer`]. Polls never overlap: the timer loop awaits each
//! fetch before waiting for its next tick, and a tick that comes due while a
//! fetch is outstanding fires as soon as that fetch resolves
//! (`MissedTickBehavior::Delay`). A manual [`TelemetryPoller::poll_once`]
//! shares the single-flight gate: it backs off with `InFlight` when a fetch
//! is running, while a timer tick waits for the running fetch and then
//! issues its own.
//!
//! Failed fetches are retried at the same fixed interval; there is no backoff.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::config::EventsConfig;
use crate::error::FeedResult;
use crate::events::buffer::EventBuffer;
use crate::events::source::EventSource;
use crate::events::types::TelemetryEvent;
use crate::task::TaskSlot;

/// What consumers receive when a poll changed the buffer.
#[derive(Debug, Clone)]
pub struct PollBatch {
    /// Full buffer after the merge, newest first.
    pub events: Vec<TelemetryEvent>,
    /// The events this poll added, newest first.
    pub added: Vec<TelemetryEvent>,
}

pub type BatchCallback = Arc<dyn Fn(&PollBatch) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Buffer gained this many events.
    Changed(usize),
    Unchanged,
    /// Another fetch was already in flight; nothing issued.
    InFlight,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerStats {
    pub polls_ok: u64,
    pub polls_failed: u64,
    pub consecutive_failures: u32,
    pub buffered: usize,
    pub running: bool,
}

struct PollerState {
    buffer: EventBuffer,
    on_batch: Option<BatchCallback>,
    timer: TaskSlot,
    last_error: Option<String>,
    stats: PollerStats,
}

struct PollerInner {
    source: Arc<dyn EventSource>,
    incremental: bool,
    state: Mutex<PollerState>,
    // held for the duration of a fetch; manual polls skip while it is held, ticks wait
    gate: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
pub struct TelemetryPoller {
    inner: Arc<PollerInner>,
}

impl TelemetryPoller {
    pub fn new(source: Arc<dyn EventSource>, limit: usize) -> Self {
        Self::build(source, limit, false)
    }

    pub fn from_config(source: Arc<dyn EventSource>, cfg: &EventsConfig) -> Self {
        Self::build(source, cfg.limit, cfg.incremental)
    }

    fn build(source: Arc<dyn EventSource>, limit: usize, incremental: bool) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                source,
                incremental,
                state: Mutex::new(PollerState {
                    buffer: EventBuffer::new(limit),
                    on_batch: None,
                    timer: TaskSlot::new(),
                    last_error: None,
                    stats: PollerStats::default(),
                }),
                gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Start (or restart) recurring polls. The first poll runs immediately.
    /// Calling this while running replaces the timer; it never stacks a
    /// second one. Fails with `NoRuntime` outside a tokio runtime.
    #[instrument(skip(self, on_batch))]
    pub fn start_polling(&self, on_batch: BatchCallback, interval: Duration) -> FeedResult<()> {
        let interval = if interval.is_zero() {
            warn!("zero poll interval, using 1ms");
            Duration::from_millis(1)
        } else {
            interval
        };

        let weak = Arc::downgrade(&self.inner);
        let mut state = self.inner.state.lock();
        let restarted = state.timer.spawn(poll_loop(weak, interval))?;
        state.on_batch = Some(on_batch);
        if restarted {
            info!(interval_ms = interval.as_millis() as u64, "telemetry polling restarted");
        } else {
            info!(interval_ms = interval.as_millis() as u64, "telemetry polling started");
        }
        Ok(())
    }

    /// Cancel the timer (and any fetch it has in flight). Idempotent.
    pub fn stop_polling(&self) -> bool {
        let mut state = self.inner.state.lock();
        let was_running = state.timer.cancel();
        if was_running {
            info!("telemetry polling stopped");
        }
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().timer.is_active()
    }

    /// Manual refresh. Returns `InFlight` without fetching if another
    /// fetch is running.
    pub async fn poll_once(&self) -> PollOutcome {
        let Ok(_gate) = self.inner.gate.try_lock() else {
            debug!("fetch already in flight, skipping");
            return PollOutcome::InFlight;
        };
        self.inner.fetch_and_merge().await
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.inner.state.lock().buffer.events().to_vec()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().last_error.clone()
    }

    pub fn stats(&self) -> PollerStats {
        let state = self.inner.state.lock();
        PollerStats {
            buffered: state.buffer.len(),
            running: state.timer.is_active(),
            ..state.stats.clone()
        }
    }

    /// Stop polling and forget buffered events.
    pub fn dispose(&self) {
        let mut state = self.inner.state.lock();
        state.timer.cancel();
        state.on_batch = None;
        state.buffer.clear();
    }
}

async fn poll_loop(inner: Weak<PollerInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else { break };
        // a manual fetch may hold the gate; this attempt runs once it resolves
        let _gate = inner.gate.lock().await;
        inner.fetch_and_merge().await;
    }
}

impl PollerInner {
    // Callers hold `gate`.
    async fn fetch_and_merge(&self) -> PollOutcome {
        let (limit, since) = {
            let state = self.state.lock();
            let since = if self.incremental { state.buffer.newest() } else { None };
            (state.buffer.limit(), since)
        };

        let fetched = match self.source.fetch_events(limit, since).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "telemetry fetch failed");
                metrics::counter!("feedhub_polls_total", "result" => "failed").increment(1);
                let mut state = self.state.lock();
                state.last_error = Some(e.to_string());
                state.stats.polls_failed += 1;
                state.stats.consecutive_failures += 1;
                return PollOutcome::Failed;
            }
        };
        metrics::counter!("feedhub_polls_total", "result" => "ok").increment(1);

        let (batch, callback) = {
            let mut state = self.state.lock();
            state.last_error = None;
            state.stats.polls_ok += 1;
            state.stats.consecutive_failures = 0;
            let outcome = state.buffer.merge(fetched);
            metrics::gauge!("feedhub_event_buffer_len").set(state.buffer.len() as f64);
            if !outcome.changed() {
                return PollOutcome::Unchanged;
            }
            let batch = PollBatch { events: state.buffer.events().to_vec(), added: outcome.added };
            (batch, state.on_batch.clone())
        };

        let added = batch.added.len();
        debug!(added, buffered = batch.events.len(), "telemetry buffer updated");
        if let Some(cb) = callback {
            if catch_unwind(AssertUnwindSafe(|| cb(&batch))).is_err() {
                error!("telemetry batch callback panicked");
            }
        }
        PollOutcome::Changed(added)
    }
}
