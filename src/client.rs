//! The seam between collection controllers and whatever actually talks to
//! the backend. `rest::RestResource` is the production implementation; tests
//! install scripted fakes.

use crate::error::ApiResult;
use crate::model::{CollectionItem, FilterSet, ItemId, Page, PageCursor};
use async_trait::async_trait;
use serde::Deserialize;

/// Parameters of one page fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub filters: FilterSet,
    pub limit: usize,
    /// When set, follow this token instead of fetching from the start.
    pub cursor: Option<PageCursor>,
}

impl PageRequest {
    #[must_use]
    pub fn first_page(filters: FilterSet, limit: usize) -> Self {
        Self {
            filters,
            limit,
            cursor: None,
        }
    }

    #[must_use]
    pub fn follow(cursor: PageCursor, filters: FilterSet, limit: usize) -> Self {
        Self {
            filters,
            limit,
            cursor: Some(cursor),
        }
    }
}

/// Backend operations for one listed resource.
///
/// Implementations decide what a draft looks like; the REST client uses raw
/// JSON bodies, typed fakes can use anything.
#[async_trait]
pub trait ResourceClient: Send + Sync + 'static {
    type Item: CollectionItem;
    type Draft: Send + Sync + 'static;

    async fn fetch_page(&self, request: PageRequest) -> ApiResult<Page<Self::Item>>;

    async fn create(&self, draft: Self::Draft) -> ApiResult<Self::Item>;

    async fn update(&self, id: &ItemId, draft: Self::Draft) -> ApiResult<Self::Item>;

    async fn delete(&self, id: &ItemId) -> ApiResult<DeleteReceipt>;
}

// ============================================================================
// Wire envelopes
// ============================================================================

/// The uniform offset/limit pagination envelope every list endpoint serves.
#[derive(Debug, Clone, Deserialize)]
pub struct PageEnvelope<T> {
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> PageEnvelope<T> {
    #[must_use]
    pub fn into_page(self) -> Page<T> {
        Page {
            items: self.results,
            total_count: self.count,
            next: self.next.map(PageCursor::new),
            prev: self.previous.map(PageCursor::new),
        }
    }
}

/// Create endpoints answer with either the bare record or `{message, data}`.
/// The wrapped arm is tried first so a permissive item type cannot swallow
/// the wrapper.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CreatedEnvelope<T> {
    Wrapped {
        #[serde(default)]
        message: Option<String>,
        data: T,
    },
    Bare(T),
}

impl<T> CreatedEnvelope<T> {
    #[must_use]
    pub fn into_parts(self) -> (T, Option<String>) {
        match self {
            Self::Wrapped { message, data } => (data, message),
            Self::Bare(item) => (item, None),
        }
    }
}

/// Delete endpoints answer `{message}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeleteReceipt {
    #[serde(default)]
    pub message: String,
}
