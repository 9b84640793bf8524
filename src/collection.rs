//! The paged-collection controller: owns fetch state for one filterable,
//! paginated resource listing and keeps it consistent across racing fetches,
//! pagination, and optimistic mutations.

use crate::client::{DeleteReceipt, PageRequest, ResourceClient};
use crate::error::{ApiError, ApiResult, ConfigError, ErrorKind};
use crate::model::{
    CollectionConfig, CollectionItem, CollectionSnapshot, FilterSet, ItemId, LoadPhase, PageCursor,
};
use crate::notice::NoticeCenter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, instrument, warn};

/// What a `load_more` call actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMoreOutcome {
    /// Appended `added` new items (after identity dedup).
    Appended { added: usize },
    /// No next page to fetch.
    NoNextPage,
    /// A first-page load or another `load_more` is already in flight.
    AlreadyInFlight,
    /// A newer first-page load superseded this fetch; its result was dropped.
    Superseded,
}

/// Counters for observability and tests. Mirrors the controller's life:
/// every fetch, every discard, every applied mutation.
#[derive(Debug, Default)]
pub struct CollectionMetrics {
    first_loads: AtomicU64,
    pages_loaded: AtomicU64,
    stale_discards: AtomicU64,
    fetch_failures: AtomicU64,
    mutations_applied: AtomicU64,
    mutation_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub first_loads: u64,
    pub pages_loaded: u64,
    pub stale_discards: u64,
    pub fetch_failures: u64,
    pub mutations_applied: u64,
    pub mutation_failures: u64,
}

impl CollectionMetrics {
    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            first_loads: self.first_loads.load(Ordering::Relaxed),
            pages_loaded: self.pages_loaded.load(Ordering::Relaxed),
            stale_discards: self.stale_discards.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            mutations_applied: self.mutations_applied.load(Ordering::Relaxed),
            mutation_failures: self.mutation_failures.load(Ordering::Relaxed),
        }
    }
}

struct CollectionState<T> {
    items: Vec<T>,
    total_count: u64,
    next_cursor: Option<PageCursor>,
    prev_cursor: Option<PageCursor>,
    phase: LoadPhase,
    filters: FilterSet,
    /// Bumped by every first-page load and by `dispose`. A fetch captures the
    /// value when it starts and its result is dropped if the value moved on.
    generation: u64,
    disposed: bool,
}

impl<T> CollectionState<T> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            total_count: 0,
            next_cursor: None,
            prev_cursor: None,
            phase: LoadPhase::Idle,
            filters: FilterSet::new(),
            generation: 0,
            disposed: false,
        }
    }
}

struct CollectionInner<C: ResourceClient> {
    client: Arc<C>,
    config: CollectionConfig,
    notices: NoticeCenter,
    state: RwLock<CollectionState<C::Item>>,
    watch_tx: watch::Sender<CollectionSnapshot<C::Item>>,
    metrics: CollectionMetrics,
}

/// Controller for one incrementally-loaded, filterable resource listing.
///
/// Cheap to clone (clones share state); `Send + Sync`, so views, bindings,
/// and realtime handlers can all hold one. All mutation goes through the
/// async operations; reads go through [`snapshot`](Self::snapshot) or the
/// watch channel from [`subscribe`](Self::subscribe).
pub struct PagedCollection<C: ResourceClient> {
    inner: Arc<CollectionInner<C>>,
}

impl<C: ResourceClient> Clone for PagedCollection<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: ResourceClient> PagedCollection<C> {
    pub fn new(
        client: Arc<C>,
        config: CollectionConfig,
        notices: NoticeCenter,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (watch_tx, _) = watch::channel(CollectionSnapshot::default());
        Ok(Self {
            inner: Arc::new(CollectionInner {
                client,
                config,
                notices,
                state: RwLock::new(CollectionState::new()),
                watch_tx,
                metrics: CollectionMetrics::default(),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &CollectionConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn notices(&self) -> &NoticeCenter {
        &self.inner.notices
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Receiver that yields a fresh snapshot after every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CollectionSnapshot<C::Item>> {
        self.inner.watch_tx.subscribe()
    }

    pub async fn snapshot(&self) -> CollectionSnapshot<C::Item> {
        let state = self.inner.state.read().await;
        Self::snapshot_of(&state)
    }

    pub async fn filters(&self) -> FilterSet {
        self.inner.state.read().await.filters.clone()
    }

    // ------------------------------------------------------------------
    // Fetching
    // ------------------------------------------------------------------

    /// Fetches page one for the current filters, replacing the item list
    /// wholesale on success.
    ///
    /// A newer call supersedes any in-flight one: the older response is
    /// dropped when it resolves, so the list always reflects the latest
    /// filters. A superseded call returns `Ok(())`; the newer call owns the
    /// outcome. Failure keeps already-loaded items visible; only a failure
    /// with nothing to show lands in [`LoadPhase::Failed`].
    #[instrument(skip(self))]
    pub async fn load_first_page(&self) -> ApiResult<()> {
        self.run_first_page(None).await
    }

    /// Replaces the whole filter set, then fetches page one.
    ///
    /// This is the "settled value" entry point the debounce binding calls;
    /// keystroke-level coalescing happens before this, in the binding.
    #[instrument(skip(self, filters), fields(filter_count = filters.len()))]
    pub async fn set_filters(&self, filters: FilterSet) -> ApiResult<()> {
        self.run_first_page(Some(filters)).await
    }

    /// Sets one filter field (empty value clears it), then fetches page one.
    pub async fn set_filter(
        &self,
        field: impl Into<String> + Send,
        value: impl Into<String> + Send,
    ) -> ApiResult<()> {
        let mut filters = self.filters().await;
        filters.set(field, value);
        self.run_first_page(Some(filters)).await
    }

    /// Back to defaults: no filters, fresh first page.
    pub async fn clear_filters(&self) -> ApiResult<()> {
        self.run_first_page(Some(FilterSet::new())).await
    }

    /// Re-fetches page one with unchanged filters. Also the manual path for
    /// healing any divergence left behind by optimistic mutations.
    pub async fn refresh(&self) -> ApiResult<()> {
        self.run_first_page(None).await
    }

    /// Retry affordance for the `Failed` phase. Same fetch as `refresh`.
    pub async fn retry(&self) -> ApiResult<()> {
        self.run_first_page(None).await
    }

    async fn run_first_page(&self, new_filters: Option<FilterSet>) -> ApiResult<()> {
        let (generation, request) = {
            let mut state = self.inner.state.write().await;
            if state.disposed {
                return Err(disposed_error());
            }
            if let Some(filters) = new_filters {
                state.filters = filters;
            }
            state.generation += 1;
            state.phase = LoadPhase::Loading;
            self.publish_locked(&state);
            (
                state.generation,
                PageRequest::first_page(state.filters.clone(), self.inner.config.page_size),
            )
        };
        self.inner.metrics.first_loads.fetch_add(1, Ordering::Relaxed);
        debug!(generation, "loading first page");

        let result = self.inner.client.fetch_page(request).await;

        let mut state = self.inner.state.write().await;
        if state.generation != generation {
            self.inner.metrics.stale_discards.fetch_add(1, Ordering::Relaxed);
            debug!(
                generation,
                current = state.generation,
                "first-page response superseded, dropping"
            );
            return Ok(());
        }

        match result {
            Ok(page) => {
                state.items = page.items;
                state.total_count = page.total_count;
                state.next_cursor = page.next;
                state.prev_cursor = page.prev;
                state.phase = LoadPhase::ready();
                self.publish_locked(&state);
                Ok(())
            }
            Err(error) => {
                self.inner.metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                warn!(code = error.code(), "first-page load failed");
                if state.items.is_empty() {
                    state.phase = LoadPhase::Failed(error.clone());
                } else {
                    // A failed refresh keeps showing what we already have.
                    state.phase = LoadPhase::ready();
                }
                self.publish_locked(&state);
                drop(state);
                self.inner.notices.notify_api_error(&error);
                Err(error)
            }
        }
    }

    /// Fetches the next page and appends it, preserving server order.
    ///
    /// No-ops (with a telling outcome) when there is no next page or another
    /// fetch is already in flight. A pagination failure stops paging but
    /// never blanks the list; the phase stays Ready with `load_more_failed`
    /// set.
    #[instrument(skip(self))]
    pub async fn load_more(&self) -> ApiResult<LoadMoreOutcome> {
        let (generation, request) = {
            let mut state = self.inner.state.write().await;
            if state.disposed {
                return Err(disposed_error());
            }
            match state.phase {
                LoadPhase::Ready {
                    loading_more: false,
                    load_more_failed,
                } => {
                    let Some(cursor) = state.next_cursor.clone() else {
                        return Ok(LoadMoreOutcome::NoNextPage);
                    };
                    state.phase = LoadPhase::Ready {
                        loading_more: true,
                        load_more_failed,
                    };
                    self.publish_locked(&state);
                    (
                        state.generation,
                        PageRequest::follow(
                            cursor,
                            state.filters.clone(),
                            self.inner.config.page_size,
                        ),
                    )
                }
                LoadPhase::Loading
                | LoadPhase::Ready {
                    loading_more: true, ..
                } => return Ok(LoadMoreOutcome::AlreadyInFlight),
                LoadPhase::Idle | LoadPhase::Failed(_) => return Ok(LoadMoreOutcome::NoNextPage),
            }
        };
        debug!(generation, "loading next page");

        let result = self.inner.client.fetch_page(request).await;

        let mut state = self.inner.state.write().await;
        if state.generation != generation {
            self.inner.metrics.stale_discards.fetch_add(1, Ordering::Relaxed);
            debug!(
                generation,
                current = state.generation,
                "next-page response superseded, dropping"
            );
            // The newer first-page load owns the phase now.
            return Ok(LoadMoreOutcome::Superseded);
        }

        match result {
            Ok(page) => {
                let added = Self::append_deduped(&mut state.items, page.items);
                state.total_count = page.total_count;
                state.next_cursor = page.next;
                state.prev_cursor = page.prev;
                state.phase = LoadPhase::ready();
                self.publish_locked(&state);
                self.inner.metrics.pages_loaded.fetch_add(1, Ordering::Relaxed);
                Ok(LoadMoreOutcome::Appended { added })
            }
            Err(error) => {
                self.inner.metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                warn!(code = error.code(), "next-page load failed; pagination stopped");
                if let LoadPhase::Ready { .. } = state.phase {
                    state.phase = LoadPhase::Ready {
                        loading_more: false,
                        load_more_failed: true,
                    };
                }
                self.publish_locked(&state);
                drop(state);
                self.inner.notices.notify_api_error(&error);
                Err(error)
            }
        }
    }

    // ------------------------------------------------------------------
    // Optimistic mutations
    // ------------------------------------------------------------------

    /// Creates a record, then prepends the server's echo locally and bumps
    /// the total count. On failure nothing local changes.
    #[instrument(skip(self, draft))]
    pub async fn create(&self, draft: C::Draft) -> ApiResult<C::Item> {
        self.ensure_live().await?;
        let created = match self.inner.client.create(draft).await {
            Ok(item) => item,
            Err(error) => return Err(self.surface_mutation_error(error)),
        };

        let mut state = self.inner.state.write().await;
        if !state.disposed {
            let id = created.item_id();
            // The realtime feed may already have delivered this record.
            if !state.items.iter().any(|item| item.item_id() == id) {
                state.items.insert(0, created.clone());
                state.total_count = state.total_count.saturating_add(1);
            }
            self.publish_locked(&state);
        }
        self.inner.metrics.mutations_applied.fetch_add(1, Ordering::Relaxed);
        Ok(created)
    }

    /// Updates a record, then replaces it in place with the server's echo.
    /// A record not currently listed (filtered out) updates server-side only.
    #[instrument(skip(self, draft), fields(id = %id))]
    pub async fn update(&self, id: &ItemId, draft: C::Draft) -> ApiResult<C::Item> {
        self.ensure_live().await?;
        let updated = match self.inner.client.update(id, draft).await {
            Ok(item) => item,
            Err(error) => return Err(self.surface_mutation_error(error)),
        };

        let mut state = self.inner.state.write().await;
        if !state.disposed {
            if let Some(slot) = state.items.iter_mut().find(|item| &item.item_id() == id) {
                *slot = updated.clone();
            }
            self.publish_locked(&state);
        }
        self.inner.metrics.mutations_applied.fetch_add(1, Ordering::Relaxed);
        Ok(updated)
    }

    /// Deletes a record, then removes it locally and drops the total count.
    /// On failure items and count are untouched.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn delete(&self, id: &ItemId) -> ApiResult<DeleteReceipt> {
        self.ensure_live().await?;
        let receipt = match self.inner.client.delete(id).await {
            Ok(receipt) => receipt,
            Err(error) => return Err(self.surface_mutation_error(error)),
        };

        let mut state = self.inner.state.write().await;
        if !state.disposed {
            let before = state.items.len();
            state.items.retain(|item| &item.item_id() != id);
            if state.items.len() < before {
                state.total_count = state.total_count.saturating_sub(1);
            }
            self.publish_locked(&state);
        }
        self.inner.metrics.mutations_applied.fetch_add(1, Ordering::Relaxed);
        Ok(receipt)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Marks the controller disposed (view unmounted). In-flight fetch
    /// results are dropped instead of applied, and further operations fail
    /// with a cancellation error.
    pub async fn dispose(&self) {
        let mut state = self.inner.state.write().await;
        state.disposed = true;
        state.generation += 1;
        state.phase = match state.phase.clone() {
            LoadPhase::Loading => LoadPhase::Idle,
            LoadPhase::Ready {
                load_more_failed, ..
            } => LoadPhase::Ready {
                loading_more: false,
                load_more_failed,
            },
            other => other,
        };
        self.publish_locked(&state);
        debug!("collection disposed");
    }

    pub async fn is_disposed(&self) -> bool {
        self.inner.state.read().await.disposed
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn ensure_live(&self) -> ApiResult<()> {
        if self.inner.state.read().await.disposed {
            return Err(disposed_error());
        }
        Ok(())
    }

    fn surface_mutation_error(&self, error: ApiError) -> ApiError {
        self.inner.metrics.mutation_failures.fetch_add(1, Ordering::Relaxed);
        warn!(code = error.code(), "mutation failed; local state unchanged");
        self.inner.notices.notify_api_error(&error);
        error
    }

    /// Appends in server order, skipping ids already present.
    fn append_deduped(items: &mut Vec<C::Item>, incoming: Vec<C::Item>) -> usize {
        let mut added = 0;
        for item in incoming {
            let id = item.item_id();
            if !items.iter().any(|existing| existing.item_id() == id) {
                items.push(item);
                added += 1;
            }
        }
        added
    }

    fn snapshot_of(state: &CollectionState<C::Item>) -> CollectionSnapshot<C::Item> {
        CollectionSnapshot {
            items: state.items.clone(),
            total_count: state.total_count,
            next_cursor: state.next_cursor.clone(),
            prev_cursor: state.prev_cursor.clone(),
            phase: state.phase.clone(),
            filters: state.filters.clone(),
        }
    }

    fn publish_locked(&self, state: &CollectionState<C::Item>) {
        self.inner.watch_tx.send_replace(Self::snapshot_of(state));
    }
}

fn disposed_error() -> ApiError {
    ApiError::new(ErrorKind::Cancelled, "collection is disposed")
}
