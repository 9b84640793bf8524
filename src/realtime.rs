//! Process-wide realtime notification hub: one shared connection, many
//! independent subscribers. Created lazily on first use and never torn down
//! short of process exit (tests use their own instances and `shutdown`).

use crate::error::{ApiResult, ConfigError};
use crate::model::ItemId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

// ============================================================================
// Messages
// ============================================================================

/// One decoded frame off the push channel. The channel promises nothing
/// beyond "JSON object per message", so every field is optional and the full
/// object rides along in `extra` for listeners that need more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Dot-namespaced message type, e.g. `case.assigned`.
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub case_id: Option<ItemId>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

// ============================================================================
// Transport seam
// ============================================================================

/// An open push connection yielding raw text frames. `None` means the
/// connection closed.
#[async_trait::async_trait]
pub trait PushStream: Send {
    async fn next_frame(&mut self) -> Option<String>;
}

/// Dials the push channel. The shell installs the real socket transport;
/// tests install scripted channels.
#[async_trait::async_trait]
pub trait PushTransport: Send + Sync + 'static {
    async fn connect(&self) -> ApiResult<Box<dyn PushStream>>;
}

// ============================================================================
// Reconnect policy
// ============================================================================

/// Bounded exponential backoff with jitter for re-dialing a dropped
/// connection. A notification feed that dies silently is indistinguishable
/// from "no news", so the hub always reconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: crate::BASE_RECONNECT_DELAY_MS,
            max_delay_ms: crate::MAX_RECONNECT_DELAY_MS,
            jitter_max_ms: crate::RECONNECT_JITTER_MAX_MS,
        }
    }
}

impl ReconnectPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay_ms == 0 || self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::BackoffInverted {
                base_ms: self.base_delay_ms,
                cap_ms: self.max_delay_ms,
            });
        }
        Ok(())
    }

    /// Delay before reconnect attempt `attempt` (0-based): base doubled per
    /// attempt, capped, plus random jitter.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.min(16)));
        let capped = exponential.min(self.max_delay_ms);
        let jitter = if self.jitter_max_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_max_ms)
        };
        Duration::from_millis(capped.saturating_add(jitter))
    }
}

// ============================================================================
// Hub
// ============================================================================

type Listener = Arc<dyn Fn(&PushMessage) + Send + Sync>;

struct ListenerEntry {
    id: Uuid,
    listener: Listener,
}

struct HubState {
    listeners: Vec<ListenerEntry>,
    transport: Option<Arc<dyn PushTransport>>,
    reader: Option<JoinHandle<()>>,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct HubMetrics {
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
    reconnects: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubMetricsSnapshot {
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub reconnects: u64,
}

struct HubInner {
    state: Mutex<HubState>,
    policy: ReconnectPolicy,
    metrics: HubMetrics,
}

/// The notification hub. Use [`NotificationHub::global`] for the app-wide
/// instance; construct your own in tests.
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

/// Listener registration handed back by [`NotificationHub::subscribe`].
/// Dropping it (or calling [`unsubscribe`](Subscription::unsubscribe))
/// removes the listener; keep it alive as long as delivery is wanted.
#[must_use = "dropping the subscription removes the listener"]
pub struct Subscription {
    inner: Arc<HubInner>,
    id: Uuid,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the removal.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut state = lock_state(&self.inner.state);
        state.listeners.retain(|entry| entry.id != self.id);
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

impl NotificationHub {
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(HubState {
                    listeners: Vec::new(),
                    transport: None,
                    reader: None,
                    shutdown: false,
                }),
                policy,
                metrics: HubMetrics::default(),
            }),
        }
    }

    /// The process-wide hub, created lazily on first access.
    pub fn global() -> &'static NotificationHub {
        static GLOBAL: OnceLock<NotificationHub> = OnceLock::new();
        GLOBAL.get_or_init(NotificationHub::default)
    }

    /// Installs the transport the hub dials. The connection itself starts
    /// lazily: with the first subscriber, or right here if subscribers are
    /// already waiting.
    pub fn set_transport(&self, transport: impl PushTransport) {
        {
            let mut state = lock_state(&self.inner.state);
            state.transport = Some(Arc::new(transport));
        }
        self.ensure_reader();
    }

    /// Registers a listener for every decoded push message.
    pub fn subscribe(&self, listener: impl Fn(&PushMessage) + Send + Sync + 'static) -> Subscription {
        let id = Uuid::new_v4();
        {
            let mut state = lock_state(&self.inner.state);
            state.listeners.push(ListenerEntry {
                id,
                listener: Arc::new(listener),
            });
        }
        self.ensure_reader();
        Subscription {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock_state(&self.inner.state).listeners.len()
    }

    #[must_use]
    pub fn metrics(&self) -> HubMetricsSnapshot {
        HubMetricsSnapshot {
            frames_delivered: self.inner.metrics.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.inner.metrics.frames_dropped.load(Ordering::Relaxed),
            reconnects: self.inner.metrics.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Stops the connection for good. Meant for orderly process exit and
    /// tests; the global hub normally lives until the process does.
    pub fn shutdown(&self) {
        let mut state = lock_state(&self.inner.state);
        state.shutdown = true;
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        info!("notification hub shut down");
    }

    fn ensure_reader(&self) {
        let mut state = lock_state(&self.inner.state);
        if state.shutdown || state.reader.is_some() || state.listeners.is_empty() {
            return;
        }
        let Some(transport) = state.transport.clone() else {
            return;
        };
        debug!("starting realtime reader");
        state.reader = Some(tokio::spawn(run_reader(
            Arc::clone(&self.inner),
            transport,
        )));
    }
}

#[instrument(skip_all)]
async fn run_reader(inner: Arc<HubInner>, transport: Arc<dyn PushTransport>) {
    let mut attempt: u32 = 0;
    loop {
        match transport.connect().await {
            Ok(mut stream) => {
                info!("realtime channel connected");
                attempt = 0;
                while let Some(frame) = stream.next_frame().await {
                    dispatch_frame(&inner, &frame);
                }
                warn!("realtime channel closed");
            }
            Err(error) => {
                warn!(code = error.code(), "realtime connect failed");
            }
        }

        if lock_state(&inner.state).shutdown {
            return;
        }
        let delay = inner.policy.delay_for_attempt(attempt);
        inner.metrics.reconnects.fetch_add(1, Ordering::Relaxed);
        info!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );
        attempt = attempt.saturating_add(1);
        tokio::time::sleep(delay).await;
    }
}

fn dispatch_frame(inner: &HubInner, frame: &str) {
    let message: PushMessage = match serde_json::from_str(frame) {
        Ok(message) => message,
        Err(error) => {
            // Malformed frames are diagnostics, never user-visible.
            inner.metrics.frames_dropped.fetch_add(1, Ordering::Relaxed);
            debug!(%error, "dropping malformed realtime frame");
            return;
        }
    };

    // Snapshot the listener list so subscribe/unsubscribe during dispatch
    // cannot skip or double-deliver.
    let listeners: Vec<Listener> = lock_state(&inner.state)
        .listeners
        .iter()
        .map(|entry| Arc::clone(&entry.listener))
        .collect();
    for listener in &listeners {
        listener(&message);
    }
    inner.metrics.frames_delivered.fetch_add(1, Ordering::Relaxed);
}

fn lock_state<'a>(state: &'a Mutex<HubState>) -> MutexGuard<'a, HubState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
