use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use onbid_core::{
    CatalogItem, Contact, ItemStatsSnapshot, Notification, NotificationKind, PriceAlert, ViewLog,
    ViewerContext, Watch, WatchedItem,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    CatalogRepository, InsertOutcome, NotificationRepository, StoreError, TopOrder,
    UpsertOutcome, WatchRepository,
};

#[derive(Debug, Default)]
struct State {
    items: Vec<CatalogItem>,
    notifications: Vec<Notification>,
    watches: Vec<Watch>,
    contacts: HashMap<String, Contact>,
    price_alerts: Vec<PriceAlert>,
    view_logs: Vec<ViewLog>,
    stats: Vec<ItemStatsSnapshot>,
    failing_item_nos: HashSet<String>,
}

impl State {
    fn item_mut(&mut self, item_no: &str) -> Option<&mut CatalogItem> {
        self.items.iter_mut().find(|item| item.item_no == item_no)
    }
}

/// Process-local store used by tests and `--in-memory` runs.
///
/// Every operation takes the single state lock, so counter updates are atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_item(&self, item: CatalogItem) {
        let mut state = self.state.lock().await;
        state.items.retain(|existing| existing.item_no != item.item_no);
        state.items.push(item);
    }

    pub async fn item_count(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn set_active(&self, item_no: &str, active: bool) {
        if let Some(item) = self.state.lock().await.item_mut(item_no) {
            item.is_active = active;
        }
    }

    pub async fn backdate_created_at(&self, item_no: &str, created_at: DateTime<Utc>) {
        if let Some(item) = self.state.lock().await.item_mut(item_no) {
            item.created_at = created_at;
        }
    }

    /// Make every write touching `item_no` fail with `StoreError::Unavailable`.
    pub async fn fail_writes_for(&self, item_no: &str) {
        self.state
            .lock()
            .await
            .failing_item_nos
            .insert(item_no.to_string());
    }

    pub async fn add_watch(&self, user_id: &str, item_id: Uuid, alerts_enabled: bool) -> Watch {
        let watch = Watch {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            item_id,
            alerts_enabled,
            created_at: Utc::now(),
        };
        self.state.lock().await.watches.push(watch.clone());
        watch
    }

    pub async fn add_contact(&self, contact: Contact) {
        self.state
            .lock()
            .await
            .contacts
            .insert(contact.user_id.clone(), contact);
    }

    pub async fn price_alerts(&self) -> Vec<PriceAlert> {
        self.state.lock().await.price_alerts.clone()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.lock().await.notifications.clone()
    }

    pub async fn view_logs(&self) -> Vec<ViewLog> {
        self.state.lock().await.view_logs.clone()
    }

    pub async fn backdate_notification(&self, dedup_key: &str, created_at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        if let Some(n) = state
            .notifications
            .iter_mut()
            .find(|n| n.dedup_key == dedup_key)
        {
            n.created_at = created_at;
        }
    }
}

fn sorted_limited(
    mut items: Vec<CatalogItem>,
    key: impl Fn(&CatalogItem) -> i64,
    limit: usize,
) -> Vec<CatalogItem> {
    items.sort_by(|a, b| key(b).cmp(&key(a)).then(b.created_at.cmp(&a.created_at)));
    items.truncate(limit);
    items
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn find_by_item_no(&self, item_no: &str) -> Result<Option<CatalogItem>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.items.iter().find(|i| i.item_no == item_no).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CatalogItem>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.items.iter().find(|i| i.id == id).cloned())
    }

    async fn upsert_item(&self, item: &CatalogItem) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.state.lock().await;
        if state.failing_item_nos.contains(&item.item_no) {
            return Err(StoreError::Unavailable(format!(
                "write rejected for {}",
                item.item_no
            )));
        }
        match state.item_mut(&item.item_no) {
            Some(existing) => {
                let view_count = existing.view_count;
                let interest_count = existing.interest_count;
                *existing = item.clone();
                existing.view_count = view_count;
                existing.interest_count = interest_count;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                state.items.push(item.clone());
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn list_active(&self, region: Option<&str>) -> Result<Vec<CatalogItem>, StoreError> {
        let state = self.state.lock().await;
        let mut items: Vec<_> = state
            .items
            .iter()
            .filter(|i| i.is_active)
            .filter(|i| region.map_or(true, |r| i.region.as_deref() == Some(r)))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.bid_end_at.cmp(&b.bid_end_at));
        Ok(items)
    }

    async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<CatalogItem>, StoreError> {
        let state = self.state.lock().await;
        let hit = |field: &Option<String>| field.as_deref().is_some_and(|v| v.contains(keyword));
        Ok(state
            .items
            .iter()
            .filter(|i| i.is_active)
            .filter(|i| hit(&i.title) || hit(&i.legal_address) || hit(&i.road_address))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_new(&self, limit: usize) -> Result<Vec<CatalogItem>, StoreError> {
        let state = self.state.lock().await;
        let mut items: Vec<_> = state
            .items
            .iter()
            .filter(|i| i.is_new && i.is_active)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn list_half_off(
        &self,
        region: Option<&str>,
        min_failed_bids: i64,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, StoreError> {
        let state = self.state.lock().await;
        let items: Vec<_> = state
            .items
            .iter()
            .filter(|i| i.is_active)
            .filter(|i| i.failed_bid_count.unwrap_or(0) >= min_failed_bids)
            .filter(|i| region.map_or(true, |r| i.region.as_deref() == Some(r)))
            .cloned()
            .collect();
        Ok(sorted_limited(
            items,
            |i| i.failed_bid_count.unwrap_or(0),
            limit,
        ))
    }

    async fn list_closing_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, StoreError> {
        let state = self.state.lock().await;
        let mut items: Vec<_> = state
            .items
            .iter()
            .filter(|i| i.is_active)
            .filter(|i| i.bid_end_at.is_some_and(|end| end >= from && end < to))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.bid_end_at.cmp(&b.bid_end_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn top_items(&self, order: TopOrder, limit: usize) -> Result<Vec<CatalogItem>, StoreError> {
        let state = self.state.lock().await;
        let items: Vec<_> = state.items.iter().filter(|i| i.is_active).cloned().collect();
        Ok(match order {
            TopOrder::Views => sorted_limited(items, |i| i.view_count, limit),
            TopOrder::Interest => sorted_limited(items, |i| i.interest_count, limit),
        })
    }

    async fn record_view(
        &self,
        id: Uuid,
        viewer: &ViewerContext,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(item) = state.items.iter_mut().find(|i| i.id == id) else {
            return Ok(false);
        };
        item.view_count += 1;
        let log = ViewLog {
            id: Uuid::new_v4(),
            item_id: item.id,
            item_no: item.item_no.clone(),
            viewer: viewer.clone(),
            viewed_at: at,
        };
        state.view_logs.push(log);
        Ok(true)
    }

    async fn adjust_interest(&self, item_no: &str, delta: i64) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.item_mut(item_no) {
            Some(item) => {
                item.interest_count = (item.interest_count + delta).max(0);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let mut changed = 0;
        for item in state.items.iter_mut() {
            if item.is_active && item.bid_end_at.is_some_and(|end| end < now) {
                item.is_active = false;
                item.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn clear_stale_new(&self, created_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let mut changed = 0;
        for item in state.items.iter_mut() {
            if item.is_new && item.created_at < created_before {
                item.is_new = false;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn snapshot_stats(&self, stat_date: NaiveDate) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let snapshots: Vec<_> = state
            .items
            .iter()
            .filter(|i| i.is_active)
            .map(|i| ItemStatsSnapshot {
                item_id: i.id,
                item_no: i.item_no.clone(),
                stat_date,
                view_count: i.view_count,
                interest_count: i.interest_count,
            })
            .collect();
        let written = snapshots.len() as u64;
        for snapshot in snapshots {
            state
                .stats
                .retain(|s| !(s.item_id == snapshot.item_id && s.stat_date == stat_date));
            state.stats.push(snapshot);
        }
        Ok(written)
    }

    async fn list_stats(&self, stat_date: NaiveDate) -> Result<Vec<ItemStatsSnapshot>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .stats
            .iter()
            .filter(|s| s.stat_date == stat_date)
            .cloned()
            .collect())
    }

    async fn delete_stats_before(&self, stat_date: NaiveDate) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.stats.len();
        state.stats.retain(|s| s.stat_date >= stat_date);
        Ok((before - state.stats.len()) as u64)
    }

    async fn delete_view_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.view_logs.len();
        state.view_logs.retain(|l| l.viewed_at >= cutoff);
        Ok((before - state.view_logs.len()) as u64)
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn insert_notification(
        &self,
        notification: &Notification,
    ) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state.lock().await;
        if state
            .notifications
            .iter()
            .any(|n| n.dedup_key == notification.dedup_key)
        {
            return Ok(InsertOutcome::Duplicate);
        }
        state.notifications.push(notification.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn list_notifications(
        &self,
        kind: NotificationKind,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StoreError> {
        let state = self.state.lock().await;
        let mut found: Vec<_> = state
            .notifications
            .iter()
            .filter(|n| n.kind == kind && n.is_displayed && n.expires_at > now)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.display_order
                .cmp(&b.display_order)
                .then(b.created_at.cmp(&a.created_at))
        });
        found.truncate(limit);
        Ok(found)
    }

    async fn delete_expired_notifications(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.notifications.len();
        state.notifications.retain(|n| n.expires_at > now);
        Ok((before - state.notifications.len()) as u64)
    }

    async fn hide_notifications_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let mut hidden = 0;
        for n in state.notifications.iter_mut() {
            if n.is_displayed && n.created_at < cutoff {
                n.is_displayed = false;
                hidden += 1;
            }
        }
        Ok(hidden)
    }
}

#[async_trait]
impl WatchRepository for MemoryStore {
    async fn list_alert_watches(&self) -> Result<Vec<WatchedItem>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .watches
            .iter()
            .filter(|w| w.alerts_enabled)
            .filter_map(|w| {
                state
                    .items
                    .iter()
                    .find(|i| i.id == w.item_id)
                    .map(|item| WatchedItem {
                        watch: w.clone(),
                        item: item.clone(),
                    })
            })
            .collect())
    }

    async fn latest_price_alert(&self, watch_id: Uuid) -> Result<Option<PriceAlert>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .price_alerts
            .iter()
            .filter(|a| a.watch_id == watch_id)
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn insert_price_alert(&self, alert: &PriceAlert) -> Result<(), StoreError> {
        self.state.lock().await.price_alerts.push(alert.clone());
        Ok(())
    }

    async fn contact_for(&self, user_id: &str) -> Result<Option<Contact>, StoreError> {
        Ok(self.state.lock().await.contacts.get(user_id).cloned())
    }

    async fn delete_price_alerts_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.price_alerts.len();
        state.price_alerts.retain(|a| a.created_at >= cutoff);
        Ok((before - state.price_alerts.len()) as u64)
    }
}
