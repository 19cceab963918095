//! Update batcher.
//!
//! Coalesces bursts of per-key updates into one flush. The first push into an
//! empty window arms a single timer; every push before it fires overwrites
//! the pending value for its key (last writer wins). When the timer fires the
//! whole pending map is handed to the sink in one call.
//!
//! The window is a fixed delay on the tokio clock rather than a "next tick"
//! boundary, which keeps flushes deterministic under `tokio::time::pause`.
//!
//! The flush timer runs on the runtime the batcher was built in, so `push`
//! may be called from plain threads. A batcher built outside any runtime
//! falls back to the caller's runtime; with neither, `push` fails with
//! `NoRuntime` and the window is discarded.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{trace, warn};

use crate::error::FeedResult;
use crate::task::{current_runtime, TaskSlot};

pub type FlushSink<T> = Arc<dyn Fn(BTreeMap<String, T>) + Send + Sync>;

pub struct UpdateBatcher<T> {
    state: Arc<Mutex<BatchState<T>>>,
    window: Duration,
    sink: FlushSink<T>,
    runtime: Option<Handle>,
}

struct BatchState<T> {
    pending: BTreeMap<String, T>,
    scheduled: bool,
    timer: TaskSlot,
}

impl<T: Send + 'static> UpdateBatcher<T> {
    pub fn new(window: Duration, sink: FlushSink<T>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BatchState {
                pending: BTreeMap::new(),
                scheduled: false,
                timer: TaskSlot::new(),
            })),
            window,
            sink,
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record `value` as the latest for `key` in the current window.
    pub fn push(&self, key: String, value: T) -> FeedResult<()> {
        let mut state = self.state.lock();
        if state.scheduled {
            state.pending.insert(key, value);
            return Ok(());
        }

        let runtime = match &self.runtime {
            Some(rt) => rt.clone(),
            None => match current_runtime() {
                Ok(rt) => rt,
                Err(e) => {
                    // nothing is armed, so nothing else is pending either
                    state.pending.clear();
                    warn!(key = %key, "no runtime to schedule a flush on, update dropped");
                    return Err(e);
                }
            },
        };
        state.pending.insert(key, value);
        state.scheduled = true;

        let weak = Arc::downgrade(&self.state);
        let sink = Arc::clone(&self.sink);
        let window = self.window;
        // deadline is fixed at the first push, on the owning runtime's clock
        let deadline = {
            let _enter = runtime.enter();
            tokio::time::Instant::now() + window
        };
        state.timer.spawn_on(&runtime, async move {
            tokio::time::sleep_until(deadline).await;
            flush(&weak, &sink);
        });
        trace!(window_ms = window.as_millis() as u64, "flush scheduled");
        Ok(())
    }

    /// Drop `key` from the pending window. Returns true if it was pending.
    pub fn discard(&self, key: &str) -> bool {
        self.state.lock().pending.remove(key).is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_scheduled(&self) -> bool {
        self.state.lock().scheduled
    }

    /// Cancel the armed flush and forget everything pending.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        state.timer.cancel();
        state.pending.clear();
        state.scheduled = false;
    }
}

fn flush<T>(state: &Weak<Mutex<BatchState<T>>>, sink: &FlushSink<T>) {
    let Some(state) = state.upgrade() else { return };
    let batch = {
        let mut guard = state.lock();
        // this task is finishing; forget the handle so a push made from the
        // sink arms a fresh timer instead of aborting us
        guard.timer.clear();
        guard.scheduled = false;
        std::mem::take(&mut guard.pending)
    };
    if batch.is_empty() {
        return;
    }
    metrics::counter!("feedhub_batches_flushed_total").increment(1);
    sink(batch);
}
