//! Coalesces a burst of rapid filter edits into a single delayed callback
//! run. Wire the callback to `PagedCollection::set_filters` (or
//! `set_filter`) and feed it raw keystrokes.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type FilterCallback = Arc<dyn Fn(String) -> BoxFuture + Send + Sync>;

struct Pending {
    handle: Option<JoinHandle<()>>,
    value: Option<String>,
}

/// Debounce binding for one filter input.
///
/// Every [`notify_change`](Self::notify_change) restarts the timer; only the
/// last value survives an uninterrupted delay, at which point the bound
/// callback runs with it. At most one timer exists per binding, and a newer
/// change supersedes an older callback run even if the abort arrives late
/// (sequence check). Requires a tokio runtime.
pub struct DebouncedFilterBinding {
    delay: Duration,
    callback: FilterCallback,
    /// Bumped on every change, cancel, and flush; a sleeping task re-checks
    /// it after waking and stands down if it moved on.
    sequence: Arc<AtomicU64>,
    pending: Arc<Mutex<Pending>>,
}

impl DebouncedFilterBinding {
    pub fn new<F, Fut>(delay: Duration, callback: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            delay,
            callback: Arc::new(move |value| Box::pin(callback(value))),
            sequence: Arc::new(AtomicU64::new(0)),
            pending: Arc::new(Mutex::new(Pending {
                handle: None,
                value: None,
            })),
        }
    }

    /// Binding with the domain's customary 500 ms quiet period.
    pub fn with_default_delay<F, Fut>(callback: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::new(crate::DEFAULT_DEBOUNCE, callback)
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// A value is waiting for its quiet period to elapse.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        lock(&self.pending).value.is_some()
    }

    /// Records an edit and (re)starts the timer.
    pub fn notify_change(&self, value: impl Into<String>) {
        let value = value.into();
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let mut pending = lock(&self.pending);
        if let Some(handle) = pending.handle.take() {
            handle.abort();
        }
        pending.value = Some(value.clone());

        let callback = Arc::clone(&self.callback);
        let sequence = Arc::clone(&self.sequence);
        let pending_slot = Arc::clone(&self.pending);
        let delay = self.delay;
        debug!(seq, "filter edit; debounce timer restarted");

        pending.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut pending = lock(&pending_slot);
                if sequence.load(Ordering::SeqCst) != seq {
                    return;
                }
                pending.value = None;
                pending.handle = None;
            }
            debug!(seq, "filter value settled");
            callback(value).await;
        }));
    }

    /// Drops any pending value and stops the timer. Call on view unmount.
    pub fn cancel(&self) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        let mut pending = lock(&self.pending);
        if let Some(handle) = pending.handle.take() {
            handle.abort();
        }
        pending.value = None;
    }

    /// Fires the pending value immediately instead of waiting out the delay.
    /// No-op when nothing is pending.
    pub async fn flush(&self) {
        let value = {
            self.sequence.fetch_add(1, Ordering::SeqCst);
            let mut pending = lock(&self.pending);
            if let Some(handle) = pending.handle.take() {
                handle.abort();
            }
            pending.value.take()
        };
        if let Some(value) = value {
            debug!("flushing pending filter value");
            (self.callback)(value).await;
        }
    }
}

impl Drop for DebouncedFilterBinding {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for DebouncedFilterBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebouncedFilterBinding")
            .field("delay", &self.delay)
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}
