//! Catalog persistence contracts, the catalog store service, and HTTP fetch
//! utilities for the Onbid pipeline.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use onbid_core::{
    CatalogItem, Contact, ItemStatsSnapshot, Notification, NotificationKind, PriceAlert,
    ViewerContext, WatchedItem,
};
use thiserror::Error;
use uuid::Uuid;

mod catalog;
mod http;
mod memory;
mod postgres;

pub use catalog::{BatchReport, CatalogError, CatalogStore, MergeOutcome, MAX_SEARCH_LIMIT};
pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchedResponse,
    HttpClientConfig, HttpFetcher, RetryDisposition,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "onbid-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Result of an insert guarded by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Result of an insert-or-update keyed by `item_no`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopOrder {
    Views,
    Interest,
}

/// Persistence of catalog rows and their per-item counters.
///
/// `upsert_item` must behave as "insert or update on `item_no` conflict" and its
/// update branch must leave `view_count`/`interest_count` untouched. Counter
/// methods must be single atomic read-modify-write operations.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn find_by_item_no(&self, item_no: &str) -> Result<Option<CatalogItem>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<CatalogItem>, StoreError>;
    async fn upsert_item(&self, item: &CatalogItem) -> Result<UpsertOutcome, StoreError>;

    async fn list_active(&self, region: Option<&str>) -> Result<Vec<CatalogItem>, StoreError>;
    async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<CatalogItem>, StoreError>;
    async fn list_new(&self, limit: usize) -> Result<Vec<CatalogItem>, StoreError>;
    async fn list_half_off(
        &self,
        region: Option<&str>,
        min_failed_bids: i64,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, StoreError>;
    async fn list_closing_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, StoreError>;
    async fn top_items(&self, order: TopOrder, limit: usize) -> Result<Vec<CatalogItem>, StoreError>;

    /// Bump `view_count` and append a view log row. `false` when the id is unknown.
    async fn record_view(
        &self,
        id: Uuid,
        viewer: &ViewerContext,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    /// Add `delta` to `interest_count`, never going below zero.
    async fn adjust_interest(&self, item_no: &str, delta: i64) -> Result<bool, StoreError>;

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
    async fn clear_stale_new(&self, created_before: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn snapshot_stats(&self, stat_date: NaiveDate) -> Result<u64, StoreError>;
    async fn list_stats(&self, stat_date: NaiveDate) -> Result<Vec<ItemStatsSnapshot>, StoreError>;
    async fn delete_stats_before(&self, stat_date: NaiveDate) -> Result<u64, StoreError>;
    async fn delete_view_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Persistence of derived notices. Dedup is the store's job: a second insert
/// with the same `dedup_key` reports `InsertOutcome::Duplicate`.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert_notification(
        &self,
        notification: &Notification,
    ) -> Result<InsertOutcome, StoreError>;
    async fn list_notifications(
        &self,
        kind: NotificationKind,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StoreError>;
    async fn delete_expired_notifications(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
    async fn hide_notifications_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Watches, their alert history, and the contact book of watch owners.
#[async_trait]
pub trait WatchRepository: Send + Sync {
    async fn list_alert_watches(&self) -> Result<Vec<WatchedItem>, StoreError>;
    async fn latest_price_alert(&self, watch_id: Uuid) -> Result<Option<PriceAlert>, StoreError>;
    async fn insert_price_alert(&self, alert: &PriceAlert) -> Result<(), StoreError>;
    async fn contact_for(&self, user_id: &str) -> Result<Option<Contact>, StoreError>;
    async fn delete_price_alerts_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
