use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use onbid_core::{CatalogItem, ListingRecord, ViewerContext};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{CatalogRepository, StoreError, TopOrder, UpsertOutcome};

pub const MAX_SEARCH_LIMIT: usize = 200;

/// Rows stay flagged `is_new` for this long after first sight.
const NEW_FLAG_TTL_DAYS: i64 = 7;

/// Failed-bid count at which an item has roughly halved in price.
const HALF_OFF_FAILED_BIDS: i64 = 3;

const MAX_LOGGED_FAILURES: usize = 10;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("invalid record: {0}")]
    Validation(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
}

/// Partial-success accounting for one `merge_batch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total_requested: usize,
    pub saved: usize,
    pub inserted: usize,
    pub updated: usize,
    pub validation_errors: usize,
    pub storage_errors: usize,
}

impl BatchReport {
    pub fn error_count(&self) -> usize {
        self.validation_errors + self.storage_errors
    }

    pub fn absorb(&mut self, other: &BatchReport) {
        self.total_requested += other.total_requested;
        self.saved += other.saved;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.validation_errors += other.validation_errors;
        self.storage_errors += other.storage_errors;
    }
}

/// Authoritative deduplicated catalog keyed by `item_no`.
#[derive(Clone)]
pub struct CatalogStore {
    repo: Arc<dyn CatalogRepository>,
}

impl CatalogStore {
    pub fn new(repo: Arc<dyn CatalogRepository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Arc<dyn CatalogRepository> {
        &self.repo
    }

    /// Merge one feed record.
    ///
    /// Feed-owned fields always come from `record`; `id`, `created_at`, the
    /// counters and `is_new` are carried over from the existing row.
    pub async fn merge(&self, record: &ListingRecord) -> Result<MergeOutcome, CatalogError> {
        let item_no = record
            .natural_key()
            .ok_or_else(|| CatalogError::Validation("missing item_no".to_string()))?;

        let mut item = CatalogItem::from_record(item_no, record, Utc::now());
        if let Some(existing) = self.repo.find_by_item_no(item_no).await? {
            item.id = existing.id;
            item.view_count = existing.view_count;
            item.interest_count = existing.interest_count;
            item.is_new = existing.is_new;
            item.created_at = existing.created_at;
        }

        let outcome = match self.repo.upsert_item(&item).await? {
            UpsertOutcome::Inserted => MergeOutcome::Inserted,
            UpsertOutcome::Updated => MergeOutcome::Updated,
        };
        debug!(item_no, ?outcome, "merged catalog item");
        Ok(outcome)
    }

    /// Merge records one by one in delivery order. A bad record never aborts
    /// the rest of the batch.
    pub async fn merge_batch(&self, records: &[ListingRecord]) -> BatchReport {
        let mut report = BatchReport {
            total_requested: records.len(),
            ..Default::default()
        };
        if records.is_empty() {
            return report;
        }

        let mut failures = Vec::new();
        for (index, record) in records.iter().enumerate() {
            let key = record.natural_key().unwrap_or("unknown").to_string();
            match self.merge(record).await {
                Ok(outcome) => {
                    report.saved += 1;
                    match outcome {
                        MergeOutcome::Inserted => report.inserted += 1,
                        MergeOutcome::Updated => report.updated += 1,
                    }
                }
                Err(CatalogError::Validation(reason)) => {
                    report.validation_errors += 1;
                    warn!(index, item_no = %key, %reason, "skipping invalid record");
                    failures.push(format!("{key}: {reason}"));
                }
                Err(CatalogError::Storage(err)) => {
                    report.storage_errors += 1;
                    error!(index, item_no = %key, error = %err, "failed to store record");
                    failures.push(format!("{key}: {err}"));
                }
            }
        }

        info!(
            saved = report.saved,
            total = report.total_requested,
            inserted = report.inserted,
            updated = report.updated,
            errors = report.error_count(),
            "batch merge finished"
        );
        if !failures.is_empty() {
            let shown = failures.len().min(MAX_LOGGED_FAILURES);
            warn!(
                failed = failures.len(),
                sample = %failures[..shown].join(", "),
                "records not stored"
            );
        }
        report
    }

    pub async fn get_by_key(&self, item_no: &str) -> Result<Option<CatalogItem>, CatalogError> {
        Ok(self.repo.find_by_item_no(item_no.trim()).await?)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<CatalogItem>, CatalogError> {
        Ok(self.repo.find_by_id(id).await?)
    }

    pub async fn get_active(&self, region: Option<&str>) -> Result<Vec<CatalogItem>, CatalogError> {
        let region = region.map(str::trim).filter(|r| !r.is_empty());
        Ok(self.repo.list_active(region).await?)
    }

    pub async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<CatalogItem>, CatalogError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .repo
            .search(keyword, limit.clamp(1, MAX_SEARCH_LIMIT))
            .await?)
    }

    pub async fn get_new(&self, limit: usize) -> Result<Vec<CatalogItem>, CatalogError> {
        Ok(self.repo.list_new(limit).await?)
    }

    pub async fn get_half_off(
        &self,
        region: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, CatalogError> {
        Ok(self
            .repo
            .list_half_off(region, HALF_OFF_FAILED_BIDS, limit)
            .await?)
    }

    /// Active items whose bidding closes between `now` and the end of the
    /// current KST day.
    pub async fn get_closing_today(&self, now: DateTime<Utc>) -> Result<Vec<CatalogItem>, CatalogError> {
        let kst = chrono::FixedOffset::east_opt(onbid_core::SOURCE_UTC_OFFSET_SECS)
            .ok_or_else(|| CatalogError::Validation("invalid source offset".to_string()))?;
        let local_today = now.with_timezone(&kst).date_naive();
        let end_of_day = local_today
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .and_then(|d| d.and_local_timezone(kst).single())
            .map(|d| d.with_timezone(&Utc))
            .ok_or_else(|| CatalogError::Validation("date out of range".to_string()))?;
        Ok(self
            .repo
            .list_closing_between(now, end_of_day, MAX_SEARCH_LIMIT)
            .await?)
    }

    pub async fn top_by_views(&self, limit: usize) -> Result<Vec<CatalogItem>, CatalogError> {
        Ok(self.repo.top_items(TopOrder::Views, limit).await?)
    }

    pub async fn top_by_interest(&self, limit: usize) -> Result<Vec<CatalogItem>, CatalogError> {
        Ok(self.repo.top_items(TopOrder::Interest, limit).await?)
    }

    /// Raw hit counter: every call counts, repeated views included.
    pub async fn increment_view(&self, id: Uuid, viewer: &ViewerContext) -> Result<bool, CatalogError> {
        Ok(self.repo.record_view(id, viewer, Utc::now()).await?)
    }

    pub async fn increment_interest(&self, item_no: &str) -> Result<bool, CatalogError> {
        Ok(self.repo.adjust_interest(item_no.trim(), 1).await?)
    }

    pub async fn decrement_interest(&self, item_no: &str) -> Result<bool, CatalogError> {
        Ok(self.repo.adjust_interest(item_no.trim(), -1).await?)
    }

    pub async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64, CatalogError> {
        Ok(self.repo.deactivate_expired(now).await?)
    }

    pub async fn clear_stale_new(&self, now: DateTime<Utc>) -> Result<u64, CatalogError> {
        let cutoff = now - Duration::days(NEW_FLAG_TTL_DAYS);
        Ok(self.repo.clear_stale_new(cutoff).await?)
    }

    pub async fn snapshot_daily_stats(&self, stat_date: NaiveDate) -> Result<u64, CatalogError> {
        Ok(self.repo.snapshot_stats(stat_date).await?)
    }

    pub async fn purge_stats_before(&self, stat_date: NaiveDate) -> Result<u64, CatalogError> {
        Ok(self.repo.delete_stats_before(stat_date).await?)
    }

    pub async fn purge_view_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, CatalogError> {
        Ok(self.repo.delete_view_logs_before(cutoff).await?)
    }
}
