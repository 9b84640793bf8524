use crate::error::{ApiError, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// ============================================================================
// Identity & Time
// ============================================================================

/// Stable identifier of a domain record.
///
/// The backend serves integer primary keys but every other surface (URL
/// parameters, push payloads) speaks strings, so the id is a string newtype
/// that deserializes from either JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<u64> for ItemId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct IdVisitor;

        impl serde::de::Visitor<'_> for IdVisitor {
            type Value = ItemId;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a string or integer id")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<ItemId, E> {
                Ok(ItemId(v.to_owned()))
            }

            fn visit_string<E: serde::de::Error>(self, v: String) -> Result<ItemId, E> {
                Ok(ItemId(v))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<ItemId, E> {
                Ok(ItemId(v.to_string()))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<ItemId, E> {
                Ok(ItemId(v.to_string()))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

/// Anything a `PagedCollection` can manage. Identity is the sole key used
/// for selection, dedup, and in-place replacement.
pub trait CollectionItem: Clone + Send + Sync + 'static {
    fn item_id(&self) -> ItemId;
}

/// Explicit timestamp unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        let ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self(ms)
    }

    #[must_use]
    pub const fn saturating_add(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }
}

// ============================================================================
// Filters & Pagination
// ============================================================================

/// Current filter values for one collection, keyed by filter-field name.
///
/// Keys serialize in stable order. Setting an empty value clears the field,
/// matching how clearing a filter input removes its query parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSet {
    fields: BTreeMap<String, String>,
}

impl FilterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for the ubiquitous free-text search filter.
    #[must_use]
    pub fn search(query: impl Into<String>) -> Self {
        let mut filters = Self::new();
        filters.set("q", query);
        filters
    }

    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        let field = field.into();
        let value = value.into();
        if value.is_empty() {
            self.fields.remove(&field);
        } else {
            self.fields.insert(field, value);
        }
    }

    pub fn remove(&mut self, field: &str) -> Option<String> {
        self.fields.remove(field)
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Opaque pagination token. The backend hands back full offset-bearing URLs
/// in its `next`/`previous` envelope fields; the controller never looks
/// inside, it only hands the token back to the client to follow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(String);

impl PageCursor {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One decoded page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub next: Option<PageCursor>,
    pub prev: Option<PageCursor>,
}

impl<T> Page<T> {
    /// A page carrying the whole (empty) result set.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            items: Vec::new(),
            total_count: 0,
            next: None,
            prev: None,
        }
    }
}

// ============================================================================
// Load Phase
// ============================================================================

/// The mutually-exclusive modes of one collection, as one tagged value
/// instead of a pile of independent booleans.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LoadPhase {
    /// Nothing fetched yet.
    #[default]
    Idle,
    /// First page (or a refresh of it) in flight.
    Loading,
    /// At least one page applied. `load_more_failed` records a pagination
    /// failure without leaving Ready.
    Ready {
        loading_more: bool,
        load_more_failed: bool,
    },
    /// First load failed with nothing to show. Retryable.
    Failed(ApiError),
}

impl LoadPhase {
    #[must_use]
    pub const fn ready() -> Self {
        Self::Ready {
            loading_more: false,
            load_more_failed: false,
        }
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    #[must_use]
    pub const fn is_loading_more(&self) -> bool {
        matches!(
            self,
            Self::Ready {
                loading_more: true,
                ..
            }
        )
    }

    /// True while any fetch for this collection is in flight.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.is_loading() || self.is_loading_more()
    }

    #[must_use]
    pub const fn error(&self) -> Option<&ApiError> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Read-only view of one collection, published after every state change.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub next_cursor: Option<PageCursor>,
    pub prev_cursor: Option<PageCursor>,
    pub phase: LoadPhase,
    pub filters: FilterSet,
}

impl<T> Default for CollectionSnapshot<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total_count: 0,
            next_cursor: None,
            prev_cursor: None,
            phase: LoadPhase::Idle,
            filters: FilterSet::new(),
        }
    }
}

impl<T> CollectionSnapshot<T> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// More pages are available and nothing is currently fetching them.
    #[must_use]
    pub fn can_load_more(&self) -> bool {
        self.next_cursor.is_some()
            && matches!(
                self.phase,
                LoadPhase::Ready {
                    loading_more: false,
                    ..
                }
            )
    }
}

impl<T: CollectionItem> CollectionSnapshot<T> {
    #[must_use]
    pub fn find(&self, id: &ItemId) -> Option<&T> {
        self.items.iter().find(|item| &item.item_id() == id)
    }

    #[must_use]
    pub fn contains(&self, id: &ItemId) -> bool {
        self.find(id).is_some()
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionConfig {
    /// Items requested per page.
    pub page_size: usize,
    /// Quiet period a filter edit must survive before it triggers a fetch.
    pub debounce: Duration,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            page_size: crate::DEFAULT_PAGE_SIZE,
            debounce: crate::DEFAULT_DEBOUNCE,
        }
    }
}

impl CollectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 || self.page_size > crate::MAX_PAGE_SIZE {
            return Err(ConfigError::PageSizeOutOfRange {
                got: self.page_size,
                max: crate::MAX_PAGE_SIZE,
            });
        }
        if self.debounce > crate::MAX_DEBOUNCE {
            return Err(ConfigError::DebounceTooLong {
                got_ms: u64::try_from(self.debounce.as_millis()).unwrap_or(u64::MAX),
                max_ms: u64::try_from(crate::MAX_DEBOUNCE.as_millis()).unwrap_or(u64::MAX),
            });
        }
        Ok(())
    }
}
