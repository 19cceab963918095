//! Cancellable task slot.
//!
//! Holds at most one spawned tokio task. Replacing or cancelling aborts the
//! previous task, and dropping the slot aborts whatever it still holds, so
//! timers owned by a slot never outlive their owner.

use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{FeedError, FeedResult};

/// Handle of the runtime we are currently inside, if any.
pub fn current_runtime() -> FeedResult<Handle> {
    Handle::try_current().map_err(|_| FeedError::NoRuntime)
}

#[derive(Debug, Default)]
pub struct TaskSlot {
    handle: Option<JoinHandle<()>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Spawn `fut` on the current runtime, aborting any task already in the
    /// slot. Returns true if a previous task was still running. Outside a
    /// runtime the slot is left untouched and `NoRuntime` is returned.
    pub fn spawn<F>(&mut self, fut: F) -> FeedResult<bool>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runtime = current_runtime()?;
        Ok(self.spawn_on(&runtime, fut))
    }

    /// Like `spawn`, on an explicit runtime. Callable from any thread.
    pub fn spawn_on<F>(&mut self, runtime: &Handle, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let replaced = self.cancel();
        self.handle = Some(runtime.spawn(fut));
        replaced
    }

    /// Abort the held task. Safe to call any number of times.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(h) => {
                let live = !h.is_finished();
                h.abort();
                live
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Forget a finished task without aborting; used by tasks that clear
    /// their own slot on completion.
    pub fn clear(&mut self) {
        self.handle = None;
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let mut slot = TaskSlot::new();
        assert!(!slot.cancel());
        slot.spawn(async { tokio::time::sleep(Duration::from_secs(60)).await }).unwrap();
        assert!(slot.is_active());
        assert!(slot.cancel());
        assert!(!slot.cancel());
        assert!(!slot.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_replaces_previous() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut slot = TaskSlot::new();
        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            slot.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                hits.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts() {
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let mut slot = TaskSlot::new();
            let hits = Arc::clone(&hits);
            slot.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                hits.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_spawn_without_runtime_is_an_error() {
        let mut slot = TaskSlot::new();
        assert!(matches!(slot.spawn(async {}), Err(FeedError::NoRuntime)));
        assert!(!slot.is_active());
    }

    #[test]
    fn test_spawn_on_from_plain_thread() {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let mut slot = TaskSlot::new();
        let task_hits = Arc::clone(&hits);
        slot.spawn_on(rt.handle(), async move {
            task_hits.fetch_add(1, Ordering::SeqCst);
        });
        rt.block_on(async { tokio::time::sleep(Duration::from_millis(5)).await });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
