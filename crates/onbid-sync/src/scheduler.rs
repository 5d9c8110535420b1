use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use onbid_adapters::{AdapterError, ListingSource};
use onbid_core::{NotificationKind, SOURCE_UTC_OFFSET_SECS};
use onbid_storage::{
    BatchReport, CatalogRepository, CatalogStore, NotificationRepository, WatchRepository,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{CadenceKind, CadencePlan, FeedPlan, SyncPlan};
use crate::mail::Mailer;
use crate::monitor::{MonitorSettings, MonitorSummary, PriceMonitor};
use crate::notices::NotificationGenerator;

pub const NOTICE_HIDE_AFTER_DAYS: i64 = 30;
pub const VIEW_LOG_RETENTION_DAYS: i64 = 30;
pub const STATS_RETENTION_DAYS: i64 = 90;
pub const PRICE_ALERT_RETENTION_DAYS: i64 = 180;

/// The three persistence collaborators, usually backed by one store.
#[derive(Clone)]
pub struct Repositories {
    pub catalog: Arc<dyn CatalogRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub watches: Arc<dyn WatchRepository>,
}

impl Repositories {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: CatalogRepository + NotificationRepository + WatchRepository + 'static,
    {
        Self {
            catalog: store.clone(),
            notifications: store.clone(),
            watches: store,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub cadence: CadenceKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub regions_attempted: usize,
    pub regions_failed: usize,
    pub pages_fetched: usize,
    pub records_fetched: usize,
    pub batch: BatchReport,
    pub notices_created: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceStep {
    pub name: String,
    pub affected: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceReport {
    pub run_id: Uuid,
    pub steps: Vec<MaintenanceStep>,
}

impl MaintenanceReport {
    pub fn failed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.error.is_some()).count()
    }

    pub fn affected(&self, name: &str) -> Option<u64> {
        self.steps
            .iter()
            .find(|s| s.name == name)
            .and_then(|s| s.affected)
    }

    fn record<E: Display>(&mut self, name: &str, result: Result<u64, E>) {
        let step = match result {
            Ok(affected) => {
                info!(step = name, affected, "maintenance step done");
                MaintenanceStep {
                    name: name.to_string(),
                    affected: Some(affected),
                    error: None,
                }
            }
            Err(err) => {
                error!(step = name, error = %err, "maintenance step failed");
                MaintenanceStep {
                    name: name.to_string(),
                    affected: None,
                    error: Some(err.to_string()),
                }
            }
        };
        self.steps.push(step);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub stat_date: NaiveDate,
    pub snapshots: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CadenceOutcome {
    Sync(SyncRunSummary),
    Maintenance(MaintenanceReport),
    Stats(StatsReport),
    Monitor(MonitorSummary),
}

fn source_offset() -> Result<FixedOffset> {
    FixedOffset::east_opt(SOURCE_UTC_OFFSET_SECS).ok_or_else(|| anyhow!("invalid source offset"))
}

/// Runs the cadences of a [`SyncPlan`] against one listing source and one store.
///
/// Runs of the same cadence never overlap: scheduled ticks skip while a run is in
/// progress, manual triggers wait for it.
pub struct SyncScheduler {
    plan: SyncPlan,
    source: Arc<dyn ListingSource>,
    catalog: CatalogStore,
    notices: NotificationGenerator,
    watches: Arc<dyn WatchRepository>,
    monitor: PriceMonitor,
    locks: HashMap<CadenceKind, Arc<Mutex<()>>>,
}

impl SyncScheduler {
    pub fn new(
        plan: SyncPlan,
        repos: Repositories,
        source: Arc<dyn ListingSource>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let catalog = CatalogStore::new(repos.catalog);
        let notices = NotificationGenerator::new(catalog.clone(), repos.notifications);
        let monitor = PriceMonitor::new(
            source.clone(),
            repos.watches.clone(),
            notices.clone(),
            mailer,
            MonitorSettings {
                page_size: plan.monitor_page_size,
                ..Default::default()
            },
        );
        let locks = CadenceKind::ALL
            .into_iter()
            .map(|kind| (kind, Arc::new(Mutex::new(()))))
            .collect();
        Self {
            plan,
            source,
            catalog,
            notices,
            watches: repos.watches,
            monitor,
            locks,
        }
    }

    pub fn plan(&self) -> &SyncPlan {
        &self.plan
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn notices(&self) -> &NotificationGenerator {
        &self.notices
    }

    pub fn lock_for(&self, kind: CadenceKind) -> Arc<Mutex<()>> {
        self.locks.get(&kind).cloned().unwrap_or_default()
    }

    /// Run a cadence now, waiting for an in-progress run of it to finish.
    pub async fn run_cadence(&self, kind: CadenceKind) -> Result<CadenceOutcome> {
        let lock = self.lock_for(kind);
        let _guard = lock.lock().await;
        self.execute(kind).await
    }

    /// Entry point of scheduled ticks. `None` when the tick was skipped or failed;
    /// failures are logged here.
    pub async fn run_scheduled(&self, kind: CadenceKind) -> Option<CadenceOutcome> {
        let lock = self.lock_for(kind);
        let Ok(_guard) = lock.try_lock() else {
            warn!(cadence = kind.as_str(), "previous run still in progress; skipping tick");
            return None;
        };
        match self.execute(kind).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                error!(cadence = kind.as_str(), error = %err, "scheduled run failed");
                None
            }
        }
    }

    pub async fn trigger_manual_sync(&self) -> Result<SyncRunSummary> {
        let lock = self.lock_for(CadenceKind::Full);
        let _guard = lock.lock().await;
        self.run_fetch_cadence(CadenceKind::Full).await
    }

    pub async fn trigger_price_monitor(&self) -> Result<MonitorSummary> {
        let lock = self.lock_for(CadenceKind::PriceMonitor);
        let _guard = lock.lock().await;
        self.monitor.run().await.context("running price monitor")
    }

    async fn execute(&self, kind: CadenceKind) -> Result<CadenceOutcome> {
        let now = Utc::now();
        Ok(match kind {
            CadenceKind::Full | CadenceKind::NewListings | CadenceKind::Deadline => {
                CadenceOutcome::Sync(self.run_fetch_cadence(kind).await?)
            }
            CadenceKind::Maintenance => CadenceOutcome::Maintenance(self.run_maintenance(now).await),
            CadenceKind::Stats => CadenceOutcome::Stats(self.snapshot_stats(now).await?),
            CadenceKind::PriceMonitor => CadenceOutcome::Monitor(
                self.monitor.run().await.context("running price monitor")?,
            ),
        })
    }

    async fn run_fetch_cadence(&self, kind: CadenceKind) -> Result<SyncRunSummary> {
        let cadence = self
            .plan
            .cadence(kind)
            .with_context(|| format!("sync plan has no {} cadence", kind.as_str()))?
            .clone();
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, cadence = kind.as_str());
        self.run_fetch_inner(run_id, cadence).instrument(span).await
    }

    async fn run_fetch_inner(&self, run_id: Uuid, cadence: CadencePlan) -> Result<SyncRunSummary> {
        let mut summary = SyncRunSummary {
            run_id,
            cadence: cadence.kind,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            regions_attempted: 0,
            regions_failed: 0,
            pages_fetched: 0,
            records_fetched: 0,
            batch: BatchReport::default(),
            notices_created: 0,
        };
        info!(regions = self.plan.regions.len(), feeds = cadence.feeds.len(), "sync run started");

        for region in &self.plan.regions {
            summary.regions_attempted += 1;
            let mut region_failed = false;
            for feed in &cadence.feeds {
                if let Err(err) = self.sync_feed(region, feed, &mut summary).await {
                    region_failed = true;
                    error!(
                        region = %region,
                        feed = feed.feed.as_str(),
                        error = %err,
                        "feed sync failed; moving on"
                    );
                }
            }
            if region_failed {
                summary.regions_failed += 1;
            }
        }

        summary.notices_created = match cadence.notices {
            Some(NotificationKind::New) => self
                .notices
                .create_new_item_notices(self.plan.notice_limit)
                .await
                .unwrap_or_else(|err| {
                    error!(error = %err, "new-item notice generation failed");
                    0
                }),
            Some(NotificationKind::Deadline) => self
                .notices
                .create_deadline_notices(
                    Duration::hours(self.plan.deadline_window_hours),
                    self.plan.notice_limit,
                )
                .await
                .unwrap_or_else(|err| {
                    error!(error = %err, "deadline notice generation failed");
                    0
                }),
            Some(NotificationKind::PriceDrop) | None => 0,
        };

        summary.finished_at = Utc::now();
        info!(
            saved = summary.batch.saved,
            total = summary.batch.total_requested,
            pages = summary.pages_fetched,
            regions_failed = summary.regions_failed,
            notices = summary.notices_created,
            "sync run finished"
        );
        Ok(summary)
    }

    /// Page through one feed for one region.
    ///
    /// Stops at `max_pages` or after `empty_page_threshold` consecutive pages with
    /// no items at all; any page with items resets the streak, even when none of
    /// them belong to `region`.
    async fn sync_feed(
        &self,
        region: &str,
        feed: &FeedPlan,
        summary: &mut SyncRunSummary,
    ) -> Result<(), AdapterError> {
        let threshold = self.plan.empty_page_threshold.max(1);
        let pause = self.plan.page_pause();
        let mut empty_streak = 0u32;

        for page_no in 1..=feed.max_pages {
            if page_no > 1 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            let page = self
                .source
                .fetch_page(Some(region), page_no, feed.page_size, feed.feed)
                .await?;
            summary.pages_fetched += 1;

            if page.is_exhausted() {
                empty_streak += 1;
                debug!(region, feed = feed.feed.as_str(), page_no, empty_streak, "empty page");
                if empty_streak >= threshold {
                    break;
                }
                continue;
            }
            empty_streak = 0;
            let records = page.in_region(region);
            if records.is_empty() {
                debug!(region, feed = feed.feed.as_str(), page_no, "no in-region records on page");
                continue;
            }
            summary.records_fetched += records.len();
            let report = self.catalog.merge_batch(&records).await;
            summary.batch.absorb(&report);
        }
        Ok(())
    }

    /// Sweeps and retention. Each step runs even when an earlier one failed.
    pub async fn run_maintenance(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let mut report = MaintenanceReport {
            run_id: Uuid::new_v4(),
            steps: Vec::new(),
        };
        let today = source_offset()
            .map(|kst| now.with_timezone(&kst).date_naive())
            .unwrap_or_else(|_| now.date_naive());

        report.record("clear_stale_new", self.catalog.clear_stale_new(now).await);
        report.record("deactivate_expired", self.catalog.deactivate_expired(now).await);
        report.record("delete_expired_notices", self.notices.delete_expired(now).await);
        report.record(
            "hide_old_notices",
            self.notices
                .hide_created_before(now - Duration::days(NOTICE_HIDE_AFTER_DAYS))
                .await,
        );
        report.record(
            "purge_view_logs",
            self.catalog
                .purge_view_logs_before(now - Duration::days(VIEW_LOG_RETENTION_DAYS))
                .await,
        );
        report.record(
            "purge_stats",
            self.catalog
                .purge_stats_before(today - Duration::days(STATS_RETENTION_DAYS))
                .await,
        );
        report.record(
            "purge_price_alerts",
            self.watches
                .delete_price_alerts_before(now - Duration::days(PRICE_ALERT_RETENTION_DAYS))
                .await,
        );

        info!(
            run_id = %report.run_id,
            failed = report.failed_steps(),
            "maintenance finished"
        );
        report
    }

    /// Daily counter snapshot keyed by the source-local date.
    pub async fn snapshot_stats(&self, now: DateTime<Utc>) -> Result<StatsReport> {
        let stat_date = now.with_timezone(&source_offset()?).date_naive();
        let snapshots = self
            .catalog
            .snapshot_daily_stats(stat_date)
            .await
            .context("writing daily stats snapshot")?;
        info!(%stat_date, snapshots, "daily stats snapshot written");
        Ok(StatsReport {
            stat_date,
            snapshots,
        })
    }
}

/// Register one job per enabled cadence. Cron expressions are evaluated in the
/// feed's local time (KST). The caller starts the returned scheduler.
pub async fn build_scheduler(sync: Arc<SyncScheduler>) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let kst = source_offset()?;
    for cadence in &sync.plan().cadences {
        if !cadence.enabled {
            continue;
        }
        let kind = cadence.kind;
        let runner = sync.clone();
        let job = Job::new_async_tz(cadence.cron.as_str(), kst, move |_uuid, _l| {
            let runner = runner.clone();
            Box::pin(async move {
                runner.run_scheduled(kind).await;
            })
        })
        .with_context(|| {
            format!(
                "creating scheduler job {} for cron {}",
                kind.as_str(),
                cadence.cron
            )
        })?;
        sched.add(job).await.context("adding scheduler job")?;
        info!(cadence = kind.as_str(), cron = %cadence.cron, "cadence scheduled");
    }
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedPlan;
    use crate::testing::{listing, RecordingMailer, ScriptedSource};
    use async_trait::async_trait;
    use onbid_core::{FeedKind, Notification};
    use onbid_storage::{InsertOutcome, MemoryStore, StoreError};

    fn plan(regions: &[&str], threshold: u32, feeds: Vec<FeedPlan>) -> SyncPlan {
        let mut plan = SyncPlan {
            regions: regions.iter().map(|r| r.to_string()).collect(),
            page_pause_ms: 0,
            empty_page_threshold: threshold,
            ..SyncPlan::default()
        };
        for cadence in plan.cadences.iter_mut() {
            if cadence.kind == CadenceKind::Full {
                cadence.feeds = feeds.clone();
            }
        }
        plan
    }

    fn general(max_pages: u32) -> FeedPlan {
        FeedPlan {
            feed: FeedKind::General,
            max_pages,
            page_size: 100,
        }
    }

    fn scheduler(
        plan: SyncPlan,
        source: Arc<ScriptedSource>,
    ) -> (Arc<MemoryStore>, SyncScheduler) {
        let mem = Arc::new(MemoryStore::new());
        let sync = SyncScheduler::new(
            plan,
            Repositories::from_store(mem.clone()),
            source,
            Arc::new(RecordingMailer::default()),
        );
        (mem, sync)
    }

    fn page(prefix: &str, n: usize) -> Vec<onbid_core::ListingRecord> {
        (0..n).map(|i| listing(&format!("{prefix}-{i}"), 1_000_000)).collect()
    }

    #[tokio::test]
    async fn pagination_stops_after_threshold_empty_pages() {
        let source = Arc::new(ScriptedSource::pages(vec![
            page("A", 3),
            page("B", 2),
            page("C", 1),
        ]));
        let (mem, sync) = scheduler(plan(&["서울특별시"], 2, vec![general(10)]), source.clone());

        let summary = sync.trigger_manual_sync().await.unwrap();
        assert_eq!(source.calls().await.len(), 3 + 2);
        assert_eq!(summary.pages_fetched, 5);
        assert_eq!(summary.records_fetched, 6);
        assert_eq!(summary.batch.saved, 6);
        assert_eq!(mem.item_count().await, 6);
    }

    #[tokio::test]
    async fn empty_streak_resets_on_non_empty_page() {
        let source = Arc::new(ScriptedSource::pages(vec![
            page("A", 1),
            vec![],
            page("B", 1),
            vec![],
            vec![],
        ]));
        let (_mem, sync) = scheduler(plan(&["서울특별시"], 2, vec![general(10)]), source.clone());

        sync.trigger_manual_sync().await.unwrap();
        let pages: Vec<u32> = source.calls().await.iter().map(|c| c.1).collect();
        assert_eq!(pages, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn out_of_region_page_does_not_end_the_walk() {
        let busan: Vec<_> = page("B", 2)
            .into_iter()
            .map(|mut record| {
                record.legal_address = Some("부산광역시 중구 중앙동 1".to_string());
                record
            })
            .collect();
        let source = Arc::new(ScriptedSource::pages(vec![page("S1", 2), busan, page("S3", 2)]));
        let (mem, sync) = scheduler(plan(&["서울특별시"], 1, vec![general(10)]), source.clone());

        let summary = sync.trigger_manual_sync().await.unwrap();
        let pages: Vec<u32> = source.calls().await.iter().map(|c| c.1).collect();
        assert_eq!(pages, vec![1, 2, 3, 4]);
        assert_eq!(summary.pages_fetched, 4);
        assert_eq!(summary.records_fetched, 4);
        assert_eq!(mem.item_count().await, 4);
        assert!(sync.catalog().get_by_key("S3-1").await.unwrap().is_some());
        assert!(sync.catalog().get_by_key("B-0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn max_pages_bounds_the_walk() {
        let source = Arc::new(ScriptedSource::repeating(page("R", 2)));
        let (_mem, sync) = scheduler(plan(&["서울특별시"], 1, vec![general(4)]), source.clone());

        let summary = sync.trigger_manual_sync().await.unwrap();
        assert_eq!(source.calls().await.len(), 4);
        assert_eq!(summary.batch.inserted, 2);
        assert_eq!(summary.batch.updated, 6);
    }

    #[tokio::test]
    async fn failing_region_does_not_stop_the_others() {
        let source = Arc::new(
            ScriptedSource::pages(vec![page("S", 2)]).failing_region("부산광역시"),
        );
        let (mem, sync) = scheduler(
            plan(&["부산광역시", "서울특별시"], 1, vec![general(3)]),
            source.clone(),
        );

        let summary = sync.trigger_manual_sync().await.unwrap();
        assert_eq!(summary.regions_attempted, 2);
        assert_eq!(summary.regions_failed, 1);
        assert_eq!(summary.batch.saved, 2);
        assert_eq!(mem.item_count().await, 2);
        let regions: Vec<String> = source.calls().await.into_iter().map(|c| c.0).collect();
        assert_eq!(regions[0], "부산광역시");
        assert!(regions[1..].iter().all(|r| r == "서울특별시"));
    }

    #[tokio::test]
    async fn full_cadence_creates_new_notices_once() {
        let source = Arc::new(ScriptedSource::repeating(page("N", 3)));
        let (mem, sync) = scheduler(plan(&["서울특별시"], 1, vec![general(1)]), source);

        let first = sync.trigger_manual_sync().await.unwrap();
        assert_eq!(first.notices_created, 3);
        let second = sync.trigger_manual_sync().await.unwrap();
        assert_eq!(second.notices_created, 0);
        assert_eq!(mem.notifications().await.len(), 3);
    }

    #[tokio::test]
    async fn scheduled_tick_skips_while_same_cadence_runs() {
        let source = Arc::new(ScriptedSource::pages(vec![]));
        let (_mem, sync) = scheduler(plan(&["서울특별시"], 1, vec![general(1)]), source.clone());

        let lock = sync.lock_for(CadenceKind::Full);
        let guard = lock.lock().await;
        assert!(sync.run_scheduled(CadenceKind::Full).await.is_none());
        assert!(source.calls().await.is_empty());

        assert!(sync.run_scheduled(CadenceKind::NewListings).await.is_some());
        drop(guard);
        assert!(sync.run_scheduled(CadenceKind::Full).await.is_some());
    }

    #[tokio::test]
    async fn scheduled_runs_can_be_spawned() {
        let source = Arc::new(ScriptedSource::pages(vec![page("T", 1)]));
        let (mem, sync) = scheduler(plan(&["서울특별시"], 1, vec![general(2)]), source);
        let sync = Arc::new(sync);

        let mut handles = Vec::new();
        for kind in [CadenceKind::Full, CadenceKind::Maintenance, CadenceKind::Stats] {
            let runner = Arc::clone(&sync);
            handles.push(tokio::spawn(async move { runner.run_scheduled(kind).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_some());
        }
        assert_eq!(mem.item_count().await, 1);
    }

    #[tokio::test]
    async fn maintenance_sweeps_and_purges() {
        let source = Arc::new(ScriptedSource::pages(vec![]));
        let (mem, sync) = scheduler(plan(&["서울특별시"], 1, vec![]), source);
        let catalog = sync.catalog().clone();
        let mut expired = listing("E-1", 1_000);
        expired.bid_end_time = Some("202001011000".to_string());
        catalog.merge(&expired).await.unwrap();
        catalog.merge(&listing("OLD-1", 1_000)).await.unwrap();
        mem.backdate_created_at("OLD-1", Utc::now() - Duration::days(10)).await;

        let report = sync.run_maintenance(Utc::now()).await;
        assert_eq!(report.failed_steps(), 0);
        assert_eq!(report.steps.len(), 7);
        assert_eq!(report.affected("deactivate_expired"), Some(1));
        assert_eq!(report.affected("clear_stale_new"), Some(1));
    }

    struct BrokenNotifications;

    #[async_trait]
    impl NotificationRepository for BrokenNotifications {
        async fn insert_notification(&self, _n: &Notification) -> Result<InsertOutcome, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn list_notifications(
            &self,
            _kind: NotificationKind,
            _limit: usize,
            _now: DateTime<Utc>,
        ) -> Result<Vec<Notification>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn delete_expired_notifications(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn hide_notifications_before(&self, _cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn failing_maintenance_step_does_not_block_the_rest() {
        let mem = Arc::new(MemoryStore::new());
        let repos = Repositories {
            catalog: mem.clone(),
            notifications: Arc::new(BrokenNotifications),
            watches: mem.clone(),
        };
        let sync = SyncScheduler::new(
            plan(&["서울특별시"], 1, vec![]),
            repos,
            Arc::new(ScriptedSource::pages(vec![])),
            Arc::new(RecordingMailer::default()),
        );

        let report = sync.run_maintenance(Utc::now()).await;
        assert_eq!(report.steps.len(), 7);
        assert_eq!(report.failed_steps(), 2);
        assert_eq!(report.affected("purge_price_alerts"), Some(0));
    }

    #[tokio::test]
    async fn stats_cadence_snapshots_active_items() {
        let source = Arc::new(ScriptedSource::repeating(page("T", 2)));
        let (mem, sync) = scheduler(plan(&["서울특별시"], 1, vec![general(1)]), source);
        sync.trigger_manual_sync().await.unwrap();

        match sync.run_cadence(CadenceKind::Stats).await.unwrap() {
            CadenceOutcome::Stats(report) => {
                assert_eq!(report.snapshots, 2);
                let rows = mem.list_stats(report.stat_date).await.unwrap();
                assert_eq!(rows.len(), 2);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scheduler_registers_enabled_cadences() {
        let mut plan = plan(&["서울특별시"], 1, vec![general(1)]);
        plan.cadences[0].enabled = false;
        let (_mem, sync) = scheduler(plan, Arc::new(ScriptedSource::pages(vec![])));
        assert!(build_scheduler(Arc::new(sync)).await.is_ok());
    }
}
