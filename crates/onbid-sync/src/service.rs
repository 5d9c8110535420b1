use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use onbid_core::{CatalogItem, Notification, NotificationKind, ViewerContext};
use onbid_storage::{CatalogError, CatalogStore, StoreError};
use uuid::Uuid;

use crate::monitor::MonitorSummary;
use crate::notices::NotificationGenerator;
use crate::scheduler::{SyncRunSummary, SyncScheduler};

pub const DEFAULT_TOP_LIMIT: usize = 10;

/// Read and trigger surface used by the HTTP layer and the CLI.
#[derive(Clone)]
pub struct CatalogService {
    scheduler: Arc<SyncScheduler>,
}

impl CatalogService {
    pub fn new(scheduler: Arc<SyncScheduler>) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Arc<SyncScheduler> {
        &self.scheduler
    }

    fn catalog(&self) -> &CatalogStore {
        self.scheduler.catalog()
    }

    fn notices(&self) -> &NotificationGenerator {
        self.scheduler.notices()
    }

    pub async fn get_active(&self, region: Option<&str>) -> Result<Vec<CatalogItem>, CatalogError> {
        self.catalog().get_active(region).await
    }

    pub async fn get_by_key(&self, item_no: &str) -> Result<Option<CatalogItem>, CatalogError> {
        self.catalog().get_by_key(item_no).await
    }

    pub async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<CatalogItem>, CatalogError> {
        self.catalog().search(keyword, limit).await
    }

    pub async fn get_new(&self, limit: usize) -> Result<Vec<CatalogItem>, CatalogError> {
        self.catalog().get_new(limit).await
    }

    pub async fn get_half_off(
        &self,
        region: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, CatalogError> {
        self.catalog().get_half_off(region, limit).await
    }

    pub async fn get_closing_today(&self) -> Result<Vec<CatalogItem>, CatalogError> {
        self.catalog().get_closing_today(Utc::now()).await
    }

    pub async fn top_by_views(&self, limit: usize) -> Result<Vec<CatalogItem>, CatalogError> {
        self.catalog().top_by_views(limit).await
    }

    pub async fn top_by_interest(&self, limit: usize) -> Result<Vec<CatalogItem>, CatalogError> {
        self.catalog().top_by_interest(limit).await
    }

    pub async fn get_notifications(
        &self,
        kind: NotificationKind,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        self.notices().get_notifications(kind, limit).await
    }

    /// `false` when no row has this id.
    pub async fn increment_view(&self, id: Uuid, viewer: &ViewerContext) -> Result<bool, CatalogError> {
        self.catalog().increment_view(id, viewer).await
    }

    pub async fn increment_interest(&self, item_no: &str) -> Result<bool, CatalogError> {
        self.catalog().increment_interest(item_no).await
    }

    pub async fn decrement_interest(&self, item_no: &str) -> Result<bool, CatalogError> {
        self.catalog().decrement_interest(item_no).await
    }

    pub async fn trigger_manual_sync(&self) -> Result<SyncRunSummary> {
        self.scheduler.trigger_manual_sync().await
    }

    pub async fn trigger_price_monitor(&self) -> Result<MonitorSummary> {
        self.scheduler.trigger_price_monitor().await
    }
}
