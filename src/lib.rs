// casedesk-core: headless collection/controller core for the Casedesk CRM.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod client;
pub mod collection;
pub mod debounce;
pub mod domain;
pub mod error;
pub mod model;
pub mod notice;
pub mod realtime;
pub mod rest;
pub mod urlsync;

use std::time::Duration;

pub use client::{PageRequest, ResourceClient};
pub use collection::{LoadMoreOutcome, PagedCollection};
pub use debounce::DebouncedFilterBinding;
pub use domain::{
    Branch, CaseRecord, CaseStage, Contact, NoteRecord, StageBoard, TaskRecord, TaskStatus,
    TransitionError,
};
pub use error::{ApiError, ApiResult, ConfigError, ErrorKind};
pub use model::{
    CollectionConfig, CollectionItem, CollectionSnapshot, FilterSet, ItemId, LoadPhase, Page,
    PageCursor, UnixTimeMs,
};
pub use notice::{Notice, NoticeCenter, NoticeLevel};
pub use realtime::{NotificationHub, PushMessage, ReconnectPolicy, Subscription};
pub use rest::{RestApi, RestConfig, RestResource};
pub use urlsync::{MemoryUrlBar, QueryParams, Selection, SelectionSync, UrlBar};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 200;
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
pub const MAX_DEBOUNCE: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const NOTICE_BUS_CAPACITY: usize = 64;
pub const BASE_RECONNECT_DELAY_MS: u64 = 1_000;
pub const MAX_RECONNECT_DELAY_MS: u64 = 30_000;
pub const RECONNECT_JITTER_MAX_MS: u64 = 250;
