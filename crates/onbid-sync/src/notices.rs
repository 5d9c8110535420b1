use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use onbid_core::{CatalogItem, Notification, NotificationKind};
use onbid_storage::{CatalogError, CatalogStore, InsertOutcome, NotificationRepository, StoreError};
use tracing::{debug, error, info};

/// Lifetime of NEW and PRICE_DROP notices.
pub const NOTICE_TTL_DAYS: i64 = 7;

pub fn new_item_key(item: &CatalogItem) -> String {
    format!("NEW:{}", item.item_no)
}

pub fn deadline_key(item: &CatalogItem) -> String {
    let end = item
        .bid_end_time
        .clone()
        .or_else(|| item.bid_end_at.map(|at| at.to_rfc3339()))
        .unwrap_or_default();
    format!("DEADLINE:{}:{}", item.item_no, end)
}

pub fn price_drop_key(item_no: &str, price: i64) -> String {
    format!("PRICE_DROP:{item_no}:{price}")
}

/// Derives time-boxed notices from catalog rows. Duplicates are resolved by the
/// store's `dedup_key` constraint.
#[derive(Clone)]
pub struct NotificationGenerator {
    catalog: CatalogStore,
    repo: Arc<dyn NotificationRepository>,
}

impl NotificationGenerator {
    pub fn new(catalog: CatalogStore, repo: Arc<dyn NotificationRepository>) -> Self {
        Self { catalog, repo }
    }

    pub fn repository(&self) -> &Arc<dyn NotificationRepository> {
        &self.repo
    }

    async fn insert_all(&self, candidates: Vec<Notification>) -> usize {
        let mut created = 0;
        for notice in candidates {
            match self.repo.insert_notification(&notice).await {
                Ok(InsertOutcome::Inserted) => created += 1,
                Ok(InsertOutcome::Duplicate) => {
                    debug!(dedup_key = %notice.dedup_key, "notice already exists");
                }
                Err(err) => {
                    error!(dedup_key = %notice.dedup_key, error = %err, "failed to store notice");
                }
            }
        }
        created
    }

    /// One NEW notice per recently-listed row, newest first.
    pub async fn create_new_item_notices(&self, limit: usize) -> Result<usize, CatalogError> {
        let now = Utc::now();
        let items = self.catalog.get_new(limit).await?;
        let expires_at = now + Duration::days(NOTICE_TTL_DAYS);
        let candidates = items
            .iter()
            .map(|item| {
                Notification::for_item(
                    item,
                    NotificationKind::New,
                    new_item_key(item),
                    0,
                    now,
                    expires_at,
                )
            })
            .collect();
        let created = self.insert_all(candidates).await;
        info!(candidates = items.len(), created, "new-item notices generated");
        Ok(created)
    }

    /// DEADLINE notices for active rows closing within `window`; each expires
    /// when bidding closes.
    pub async fn create_deadline_notices(
        &self,
        window: Duration,
        limit: usize,
    ) -> Result<usize, CatalogError> {
        let now = Utc::now();
        let items = self
            .catalog
            .repository()
            .list_closing_between(now, now + window, limit)
            .await?;
        let candidates = items
            .iter()
            .filter_map(|item| {
                let expires_at = item.bid_end_at?;
                Some(Notification::for_item(
                    item,
                    NotificationKind::Deadline,
                    deadline_key(item),
                    0,
                    now,
                    expires_at,
                ))
            })
            .collect();
        let created = self.insert_all(candidates).await;
        info!(candidates = items.len(), created, "deadline notices generated");
        Ok(created)
    }

    pub async fn create_price_drop_notice(
        &self,
        item: &CatalogItem,
        new_price: i64,
    ) -> Result<InsertOutcome, StoreError> {
        let now = Utc::now();
        let mut notice = Notification::for_item(
            item,
            NotificationKind::PriceDrop,
            price_drop_key(&item.item_no, new_price),
            0,
            now,
            now + Duration::days(NOTICE_TTL_DAYS),
        );
        notice.min_bid_price = Some(new_price);
        self.repo.insert_notification(&notice).await
    }

    pub async fn get_notifications(
        &self,
        kind: NotificationKind,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        self.repo.list_notifications(kind, limit, Utc::now()).await
    }

    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.repo.delete_expired_notifications(now).await
    }

    pub async fn hide_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.repo.hide_notifications_before(cutoff).await
    }
}
