//! Binds "the selected item" to a navigable URL query parameter so selection
//! survives reloads and shared links, and re-resolves it whenever the
//! underlying collection changes.
//!
//! The URL is a namespace shared with other features. The rule here is
//! strict: read the full parameter set, mutate only the owned key, write the
//! full set back.

use crate::model::{CollectionItem, CollectionSnapshot, ItemId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

// ============================================================================
// Query parameters
// ============================================================================

/// Flat string key/value view of the URL's query. Setting an empty value
/// removes the key, matching how cleared inputs drop their parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    params: BTreeMap<String, String>,
}

impl QueryParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = Self::new();
        for (key, value) in pairs {
            params.set(key, value);
        }
        params
    }

    /// Decodes an `application/x-www-form-urlencoded` query string, with or
    /// without the leading `?`.
    #[must_use]
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self::from_pairs(
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        )
    }

    /// Encodes back to a query string (no leading `?`), keys in stable order.
    #[must_use]
    pub fn to_query_string(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.params {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if value.is_empty() {
            self.params.remove(&key);
        } else {
            self.params.insert(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.params.remove(key)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ============================================================================
// URL bar seam
// ============================================================================

/// The navigable URL, reduced to its query-parameter set. Shells implement
/// this over real browser history (replace-state, no navigation); tests and
/// headless hosts use [`MemoryUrlBar`].
#[async_trait]
pub trait UrlBar: Send + Sync + 'static {
    async fn read(&self) -> QueryParams;

    /// Replaces the full parameter set without triggering navigation.
    async fn replace(&self, params: QueryParams);
}

/// In-memory URL bar for tests and headless shells.
#[derive(Debug, Default)]
pub struct MemoryUrlBar {
    params: RwLock<QueryParams>,
}

impl MemoryUrlBar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_params(params: QueryParams) -> Self {
        Self {
            params: RwLock::new(params),
        }
    }
}

#[async_trait]
impl UrlBar for MemoryUrlBar {
    async fn read(&self) -> QueryParams {
        self.params.read().await.clone()
    }

    async fn replace(&self, params: QueryParams) {
        *self.params.write().await = params;
    }
}

// ============================================================================
// Selection
// ============================================================================

/// Derived selection state. `Missing` means the URL names an id the current
/// collection does not contain (not loaded yet, filtered away, or stale).
/// Render a neutral empty state, never an error.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Selection<T> {
    #[default]
    None,
    Resolved(T),
    Missing(ItemId),
}

impl<T> Selection<T> {
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[must_use]
    pub const fn resolved(&self) -> Option<&T> {
        match self {
            Self::Resolved(item) => Some(item),
            _ => None,
        }
    }
}

impl<T: CollectionItem> Selection<T> {
    /// The id the selection points at, resolved or not.
    #[must_use]
    pub fn selected_id(&self) -> Option<ItemId> {
        match self {
            Self::None => None,
            Self::Resolved(item) => Some(item.item_id()),
            Self::Missing(id) => Some(id.clone()),
        }
    }
}

/// Two-way binding between one owned query parameter and the selected item
/// of one collection.
pub struct SelectionSync<T, U: UrlBar> {
    url: Arc<U>,
    param: String,
    selection_tx: watch::Sender<Selection<T>>,
}

impl<T, U> SelectionSync<T, U>
where
    T: CollectionItem,
    U: UrlBar,
{
    pub fn new(url: Arc<U>, param: impl Into<String>) -> Self {
        let (selection_tx, _) = watch::channel(Selection::None);
        Self {
            url,
            param: param.into(),
            selection_tx,
        }
    }

    /// The query-parameter key this sync owns.
    #[must_use]
    pub fn param(&self) -> &str {
        &self.param
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Selection<T>> {
        self.selection_tx.subscribe()
    }

    #[must_use]
    pub fn current(&self) -> Selection<T> {
        self.selection_tx.borrow().clone()
    }

    /// Re-derives the selection from the URL and the given snapshot, and
    /// publishes the result. Call whenever the collection changes.
    pub async fn resolve(&self, snapshot: &CollectionSnapshot<T>) -> Selection<T> {
        let params = self.url.read().await;
        let selection = match params.get(&self.param) {
            Some(raw) if !raw.is_empty() => {
                let id = ItemId::new(raw);
                match snapshot.find(&id) {
                    Some(item) => Selection::Resolved(item.clone()),
                    None => {
                        debug!(param = %self.param, id = %id, "selected id absent from collection");
                        Selection::Missing(id)
                    }
                }
            }
            _ => Selection::None,
        };
        self.selection_tx.send_replace(selection.clone());
        selection
    }

    /// Writes a new selection into the URL (touching only the owned key,
    /// with no navigation) and resolves it against the given snapshot.
    pub async fn select(
        &self,
        id: Option<&ItemId>,
        snapshot: &CollectionSnapshot<T>,
    ) -> Selection<T> {
        let mut params = self.url.read().await;
        match id {
            Some(id) => params.set(self.param.clone(), id.to_string()),
            None => {
                params.remove(&self.param);
            }
        }
        self.url.replace(params).await;
        self.resolve(snapshot).await
    }

    /// Spawns a task that re-resolves the selection on every collection
    /// change. Ends when the collection's watch sender is dropped.
    pub fn follow(
        self: Arc<Self>,
        mut collection_rx: watch::Receiver<CollectionSnapshot<T>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while collection_rx.changed().await.is_ok() {
                let snapshot = collection_rx.borrow_and_update().clone();
                self.resolve(&snapshot).await;
            }
        })
    }
}

impl<T, U: UrlBar> std::fmt::Debug for SelectionSync<T, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionSync")
            .field("param", &self.param)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FilterSet, LoadPhase};

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: u64,
    }

    impl CollectionItem for Row {
        fn item_id(&self) -> ItemId {
            ItemId::from(self.id)
        }
    }

    fn snapshot(ids: &[u64]) -> CollectionSnapshot<Row> {
        CollectionSnapshot {
            items: ids.iter().map(|id| Row { id: *id }).collect(),
            total_count: ids.len() as u64,
            next_cursor: None,
            prev_cursor: None,
            phase: LoadPhase::ready(),
            filters: FilterSet::new(),
        }
    }

    #[test]
    fn query_string_round_trip() {
        let params = QueryParams::from_pairs([("selected_case", "12"), ("q", "annual report")]);
        let encoded = params.to_query_string();

        assert_eq!(encoded, "q=annual+report&selected_case=12");
        assert_eq!(QueryParams::parse(&encoded), params);
        assert_eq!(QueryParams::parse(&format!("?{encoded}")), params);
    }

    proptest::proptest! {
        #[test]
        fn any_parameter_set_round_trips(
            pairs in proptest::collection::btree_map(
                "[a-z_][a-z0-9_]{0,11}",
                "\\PC{1,12}",
                0..6,
            )
        ) {
            let params = QueryParams::from_pairs(pairs);
            let encoded = params.to_query_string();
            proptest::prop_assert_eq!(QueryParams::parse(&encoded), params);
        }
    }

    #[test]
    fn empty_value_removes_key() {
        let mut params = QueryParams::from_pairs([("role", "manager")]);
        params.set("role", "");
        assert!(params.is_empty());
    }

    #[tokio::test]
    async fn resolves_present_id() {
        let url = Arc::new(MemoryUrlBar::with_params(QueryParams::from_pairs([(
            "selected_case",
            "2",
        )])));
        let sync: SelectionSync<Row, _> = SelectionSync::new(url, "selected_case");

        let selection = sync.resolve(&snapshot(&[1, 2])).await;
        assert_eq!(selection.resolved(), Some(&Row { id: 2 }));
    }

    #[tokio::test]
    async fn unknown_id_resolves_to_missing() {
        let url = Arc::new(MemoryUrlBar::with_params(QueryParams::from_pairs([(
            "selected_case",
            "99",
        )])));
        let sync: SelectionSync<Row, _> = SelectionSync::new(url, "selected_case");

        let selection = sync.resolve(&snapshot(&[1, 2])).await;
        assert_eq!(selection, Selection::Missing(ItemId::from(99)));
        assert_eq!(selection.selected_id(), Some(ItemId::from(99)));
    }

    #[tokio::test]
    async fn absent_or_empty_param_resolves_to_none() {
        let url = Arc::new(MemoryUrlBar::new());
        let sync: SelectionSync<Row, _> = SelectionSync::new(Arc::clone(&url), "selected_case");
        assert!(sync.resolve(&snapshot(&[1])).await.is_none());

        url.replace(QueryParams::from_pairs([("selected_case", " ")]))
            .await;
        // A literal blank is still a value; only truly empty reads as none.
        assert!(!sync.resolve(&snapshot(&[1])).await.is_none());
    }

    #[tokio::test]
    async fn select_preserves_unowned_params() {
        let url = Arc::new(MemoryUrlBar::with_params(QueryParams::from_pairs([
            ("role", "manager"),
            ("process", "onboarding"),
            ("shared", "true"),
        ])));
        let sync: SelectionSync<Row, _> = SelectionSync::new(Arc::clone(&url), "selected_case");

        let selection = sync.select(Some(&ItemId::from(1)), &snapshot(&[1, 2])).await;
        assert_eq!(selection.resolved(), Some(&Row { id: 1 }));

        let params = url.read().await;
        assert_eq!(params.get("selected_case"), Some("1"));
        assert_eq!(params.get("role"), Some("manager"));
        assert_eq!(params.get("process"), Some("onboarding"));
        assert_eq!(params.get("shared"), Some("true"));
    }

    #[tokio::test]
    async fn deselect_removes_only_owned_param() {
        let url = Arc::new(MemoryUrlBar::with_params(QueryParams::from_pairs([
            ("selected_case", "7"),
            ("user", "42"),
        ])));
        let sync: SelectionSync<Row, _> = SelectionSync::new(Arc::clone(&url), "selected_case");

        let selection = sync.select(None, &snapshot(&[7])).await;
        assert!(selection.is_none());

        let params = url.read().await;
        assert!(!params.contains("selected_case"));
        assert_eq!(params.get("user"), Some("42"));
    }

    #[tokio::test]
    async fn follower_reresolves_on_collection_change() {
        let url = Arc::new(MemoryUrlBar::with_params(QueryParams::from_pairs([(
            "selected_case",
            "2",
        )])));
        let sync = Arc::new(SelectionSync::<Row, _>::new(url, "selected_case"));
        let (tx, rx) = watch::channel(CollectionSnapshot::<Row>::default());
        let handle = Arc::clone(&sync).follow(rx);

        tx.send_replace(snapshot(&[1, 2]));
        let mut selection_rx = sync.subscribe();
        selection_rx
            .wait_for(|s| s.resolved().is_some())
            .await
            .unwrap();
        assert_eq!(sync.current().resolved(), Some(&Row { id: 2 }));

        // A filter change drops id 2 from the collection.
        tx.send_replace(snapshot(&[1, 3]));
        selection_rx
            .wait_for(|s| matches!(s, Selection::Missing(_)))
            .await
            .unwrap();

        drop(tx);
        handle.await.unwrap();
    }
}
