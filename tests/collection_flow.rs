//! End-to-end controller behavior over a scripted client: debounce
//! coalescing, stale-response discard, pagination guards, optimistic
//! mutation consistency, and URL-driven selection.

use async_trait::async_trait;
use casedesk_core::{
    ApiError, ApiResult, CollectionConfig, CollectionItem, DebouncedFilterBinding, FilterSet,
    ItemId, LoadPhase, MemoryUrlBar, NoticeCenter, Page, PageCursor, PageRequest, PagedCollection,
    QueryParams, ResourceClient, Selection, SelectionSync, UrlBar,
};
use casedesk_core::client::DeleteReceipt;
use casedesk_core::collection::LoadMoreOutcome;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq)]
struct Row {
    id: u64,
    label: String,
}

impl CollectionItem for Row {
    fn item_id(&self) -> ItemId {
        ItemId::from(self.id)
    }
}

fn row(id: u64, label: &str) -> Row {
    Row {
        id,
        label: label.to_owned(),
    }
}

fn page(ids: &[u64], total: u64, next: Option<&str>) -> Page<Row> {
    Page {
        items: ids.iter().map(|id| row(*id, &format!("row-{id}"))).collect(),
        total_count: total,
        next: next.map(PageCursor::new),
        prev: None,
    }
}

struct Scripted {
    delay: Duration,
    result: ApiResult<Page<Row>>,
}

/// Fake backend: each fetch pops the next scripted response and sleeps its
/// scripted delay before resolving, so tests can interleave fetches under the
/// paused clock.
struct FakeClient {
    script: Mutex<VecDeque<Scripted>>,
    fetch_calls: AtomicUsize,
    requests: Mutex<Vec<PageRequest>>,
    fail_mutations: std::sync::atomic::AtomicBool,
}

impl FakeClient {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fetch_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            fail_mutations: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn queue(&self, page: Page<Row>) {
        self.queue_delayed(Duration::ZERO, Ok(page));
    }

    fn queue_delayed(&self, delay: Duration, result: ApiResult<Page<Row>>) {
        self.script.lock().unwrap().push_back(Scripted { delay, result });
    }

    fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceClient for FakeClient {
    type Item = Row;
    type Draft = Row;

    async fn fetch_page(&self, request: PageRequest) -> ApiResult<Page<Row>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let scripted = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Scripted {
                delay: Duration::ZERO,
                result: Ok(Page::empty()),
            });
        if !scripted.delay.is_zero() {
            sleep(scripted.delay).await;
        }
        scripted.result
    }

    async fn create(&self, draft: Row) -> ApiResult<Row> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(ApiError::from_status_body(500, None));
        }
        Ok(draft)
    }

    async fn update(&self, _id: &ItemId, draft: Row) -> ApiResult<Row> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(ApiError::from_status_body(500, None));
        }
        Ok(draft)
    }

    async fn delete(&self, _id: &ItemId) -> ApiResult<DeleteReceipt> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(ApiError::from_status_body(500, None));
        }
        Ok(DeleteReceipt {
            message: "deleted".to_owned(),
        })
    }
}

fn controller(client: &Arc<FakeClient>) -> PagedCollection<FakeClient> {
    PagedCollection::new(
        Arc::clone(client),
        CollectionConfig::default(),
        NoticeCenter::default(),
    )
    .unwrap()
}

/// P1: a burst of edits inside the debounce window fires exactly one fetch,
/// with the last value.
#[tokio::test(start_paused = true)]
async fn debounced_edits_coalesce_into_one_fetch() {
    let client = FakeClient::new();
    client.queue(page(&[1, 2], 2, None));
    let list = controller(&client);

    let bound = list.clone();
    let binding = DebouncedFilterBinding::new(Duration::from_millis(500), move |value: String| {
        let list = bound.clone();
        async move {
            let _ = list.set_filter("q", value).await;
        }
    });

    binding.notify_change("a");
    sleep(Duration::from_millis(100)).await;
    binding.notify_change("ab");
    sleep(Duration::from_millis(100)).await;
    binding.notify_change("abc");
    sleep(Duration::from_millis(600)).await;

    assert_eq!(client.fetch_count(), 1);
    let request = client.requests().pop().unwrap();
    assert_eq!(request.filters.get("q"), Some("abc"));
    assert_eq!(list.snapshot().await.len(), 2);
}

/// P2: a fetch superseded by a newer filter never overwrites the newer
/// results, even when it resolves later.
#[tokio::test(start_paused = true)]
async fn stale_response_is_discarded() {
    let client = FakeClient::new();
    // Fetch A (filter=x) resolves after fetch B (filter=y).
    client.queue_delayed(Duration::from_millis(300), Ok(page(&[101], 1, None)));
    client.queue_delayed(Duration::from_millis(50), Ok(page(&[202], 1, None)));
    let list = controller(&client);

    let slow = {
        let list = list.clone();
        tokio::spawn(async move { list.set_filters(FilterSet::search("x")).await })
    };
    sleep(Duration::from_millis(10)).await;
    let fast = {
        let list = list.clone();
        tokio::spawn(async move { list.set_filters(FilterSet::search("y")).await })
    };

    slow.await.unwrap().unwrap();
    fast.await.unwrap().unwrap();

    let snap = list.snapshot().await;
    assert_eq!(snap.items, vec![row(202, "row-202")]);
    assert_eq!(snap.filters.get("q"), Some("y"));
    assert_eq!(list.metrics().stale_discards, 1);
}

/// P3: a second load_more while the first is pending does not hit the
/// network.
#[tokio::test(start_paused = true)]
async fn concurrent_load_more_fires_one_network_call() {
    let client = FakeClient::new();
    client.queue(page(&[1, 2], 4, Some("page-2")));
    let list = controller(&client);
    list.load_first_page().await.unwrap();

    client.queue_delayed(Duration::from_millis(100), Ok(page(&[3, 4], 4, None)));
    let (first, second) = tokio::join!(list.load_more(), list.load_more());

    let outcomes = [first.unwrap(), second.unwrap()];
    assert!(outcomes.contains(&LoadMoreOutcome::Appended { added: 2 }));
    assert!(outcomes.contains(&LoadMoreOutcome::AlreadyInFlight));
    // One fetch for the first page, exactly one more for the shared load_more.
    assert_eq!(client.fetch_count(), 2);
}

/// P4: a failed delete leaves items and total_count untouched.
#[tokio::test(start_paused = true)]
async fn failed_delete_changes_nothing() {
    let client = FakeClient::new();
    client.queue(page(&[1, 2, 3], 3, None));
    let list = controller(&client);
    list.load_first_page().await.unwrap();
    let before = list.snapshot().await;

    client.fail_mutations.store(true, Ordering::SeqCst);
    let error = list.delete(&ItemId::from(2)).await.unwrap_err();
    assert_eq!(error.status, Some(500));

    let after = list.snapshot().await;
    assert_eq!(after.items, before.items);
    assert_eq!(after.total_count, before.total_count);
}

/// P5: URL selection resolves present ids and degrades to Missing for absent
/// ones, without panicking.
#[tokio::test(start_paused = true)]
async fn selection_resolves_from_url() {
    let client = FakeClient::new();
    client.queue(page(&[1, 2], 2, None));
    let list = controller(&client);
    list.load_first_page().await.unwrap();
    let snap = list.snapshot().await;

    let url = Arc::new(MemoryUrlBar::with_params(QueryParams::from_pairs([(
        "selected_case",
        "2",
    )])));
    let sync: SelectionSync<Row, _> = SelectionSync::new(Arc::clone(&url), "selected_case");

    let selection = sync.resolve(&snap).await;
    assert_eq!(selection.resolved().map(|r| r.id), Some(2));

    url.replace(QueryParams::from_pairs([("selected_case", "99")]))
        .await;
    assert_eq!(sync.resolve(&snap).await, Selection::Missing(ItemId::from(99)));
}

/// P6: load_more appends in server order and total_count holds across the
/// two calls.
#[tokio::test(start_paused = true)]
async fn pages_append_in_server_order() {
    let client = FakeClient::new();
    client.queue(page(&[1, 2, 3], 5, Some("page-2")));
    let list = controller(&client);
    list.load_first_page().await.unwrap();
    assert_eq!(list.snapshot().await.total_count, 5);

    client.queue(page(&[4, 5], 5, None));
    list.load_more().await.unwrap();

    let snap = list.snapshot().await;
    let ids: Vec<u64> = snap.items.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(snap.total_count, 5);
    assert!(snap.next_cursor.is_none());
}

/// "Suc" typed character by character: one request with
/// q="Suc" about 500 ms after the last keystroke, three results, no next
/// page, load_more a no-op.
#[tokio::test(start_paused = true)]
async fn typed_search_scenario() {
    let client = FakeClient::new();
    client.queue(page(&[10, 11, 12], 3, None));
    let list = controller(&client);

    let bound = list.clone();
    let binding = DebouncedFilterBinding::with_default_delay(move |value: String| {
        let list = bound.clone();
        async move {
            let _ = list.set_filter("q", value).await;
        }
    });

    for typed in ["S", "Su", "Suc"] {
        binding.notify_change(typed);
        sleep(Duration::from_millis(100)).await;
    }
    sleep(Duration::from_millis(500)).await;

    assert_eq!(client.fetch_count(), 1);
    let request = client.requests().pop().unwrap();
    assert_eq!(request.filters.get("q"), Some("Suc"));

    let snap = list.snapshot().await;
    assert_eq!(snap.len(), 3);
    assert!(snap.next_cursor.is_none());
    assert_eq!(snap.phase, LoadPhase::ready());

    assert_eq!(list.load_more().await.unwrap(), LoadMoreOutcome::NoNextPage);
    assert_eq!(client.fetch_count(), 1);
}

/// Unmount mid-fetch: the resolved response is dropped, not applied.
#[tokio::test(start_paused = true)]
async fn dispose_drops_in_flight_response() {
    let client = FakeClient::new();
    client.queue_delayed(Duration::from_millis(200), Ok(page(&[1, 2], 2, None)));
    let list = controller(&client);

    let pending = {
        let list = list.clone();
        tokio::spawn(async move { list.load_first_page().await })
    };
    sleep(Duration::from_millis(10)).await;
    list.dispose().await;
    pending.await.unwrap().unwrap();

    let snap = list.snapshot().await;
    assert!(snap.is_empty());
    assert_eq!(list.metrics().stale_discards, 1);
}

/// Selection follows the collection: a filter change that drops the selected
/// id degrades the selection to Missing.
#[tokio::test(start_paused = true)]
async fn selection_follows_filter_changes() {
    let client = FakeClient::new();
    client.queue(page(&[1, 2], 2, None));
    let list = controller(&client);

    let url = Arc::new(MemoryUrlBar::with_params(QueryParams::from_pairs([(
        "selected_case",
        "2",
    )])));
    let sync = Arc::new(SelectionSync::<Row, _>::new(url, "selected_case"));
    let follower = Arc::clone(&sync).follow(list.subscribe());
    let mut selection_rx = sync.subscribe();

    list.load_first_page().await.unwrap();
    selection_rx
        .wait_for(|s| s.resolved().is_some())
        .await
        .unwrap();

    client.queue(page(&[1, 3], 2, None));
    list.set_filters(FilterSet::search("other")).await.unwrap();
    selection_rx
        .wait_for(|s| matches!(s, Selection::Missing(_)))
        .await
        .unwrap();

    list.dispose().await;
    drop(list);
    follower.abort();
}
