use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use onbid_core::{
    CatalogItem, Contact, ItemStatsSnapshot, Notification, NotificationKind, PriceAlert,
    ViewerContext, Watch, WatchedItem,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::{
    CatalogRepository, InsertOutcome, NotificationRepository, StoreError, TopOrder,
    UpsertOutcome, WatchRepository,
};

const ITEM_COLUMNS: &str = r#"
    id, item_no, public_notice_no, auction_no, management_no, category_code,
    category_name, title, goods_description, legal_address, road_address, region,
    disposal_method, bid_method, min_bid_price, appraised_average, bid_start_time,
    bid_end_time, bid_end_at, status, failed_bid_count, source_query_count,
    view_count, interest_count, is_new, is_active, created_at, updated_at,
    last_synced_at
"#;

const NOTIFICATION_COLUMNS: &str = r#"
    id, item_id, item_no, title, min_bid_price, bid_end_time, kind, is_displayed,
    display_order, dedup_key, created_at, expires_at
"#;

const ALERT_COLUMNS: &str = r#"
    id, watch_id, user_id, item_no, previous_price, new_price, sent, sent_at, created_at
"#;

/// Postgres-backed implementation of every repository trait.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    async fn fetch_items(
        &self,
        sql: &str,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }
}

fn item_from_row(row: &PgRow) -> Result<CatalogItem, StoreError> {
    Ok(CatalogItem {
        id: row.try_get("id")?,
        item_no: row.try_get("item_no")?,
        public_notice_no: row.try_get("public_notice_no")?,
        auction_no: row.try_get("auction_no")?,
        management_no: row.try_get("management_no")?,
        category_code: row.try_get("category_code")?,
        category_name: row.try_get("category_name")?,
        title: row.try_get("title")?,
        goods_description: row.try_get("goods_description")?,
        legal_address: row.try_get("legal_address")?,
        road_address: row.try_get("road_address")?,
        region: row.try_get("region")?,
        disposal_method: row.try_get("disposal_method")?,
        bid_method: row.try_get("bid_method")?,
        min_bid_price: row.try_get("min_bid_price")?,
        appraised_average: row.try_get("appraised_average")?,
        bid_start_time: row.try_get("bid_start_time")?,
        bid_end_time: row.try_get("bid_end_time")?,
        bid_end_at: row.try_get("bid_end_at")?,
        status: row.try_get("status")?,
        failed_bid_count: row.try_get("failed_bid_count")?,
        source_query_count: row.try_get("source_query_count")?,
        view_count: row.try_get("view_count")?,
        interest_count: row.try_get("interest_count")?,
        is_new: row.try_get("is_new")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_synced_at: row.try_get("last_synced_at")?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<Notification, StoreError> {
    let kind: String = row.try_get("kind")?;
    Ok(Notification {
        id: row.try_get("id")?,
        item_id: row.try_get("item_id")?,
        item_no: row.try_get("item_no")?,
        title: row.try_get("title")?,
        min_bid_price: row.try_get("min_bid_price")?,
        bid_end_time: row.try_get("bid_end_time")?,
        kind: NotificationKind::parse(&kind)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown notification kind {kind}")))?,
        is_displayed: row.try_get("is_displayed")?,
        display_order: row.try_get("display_order")?,
        dedup_key: row.try_get("dedup_key")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<PriceAlert, StoreError> {
    Ok(PriceAlert {
        id: row.try_get("id")?,
        watch_id: row.try_get("watch_id")?,
        user_id: row.try_get("user_id")?,
        item_no: row.try_get("item_no")?,
        previous_price: row.try_get("previous_price")?,
        new_price: row.try_get("new_price")?,
        sent: row.try_get("sent")?,
        sent_at: row.try_get("sent_at")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl CatalogRepository for PgStore {
    async fn find_by_item_no(&self, item_no: &str) -> Result<Option<CatalogItem>, StoreError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM catalog_items WHERE item_no = $1");
        let row = sqlx::query(&sql)
            .bind(item_no)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CatalogItem>, StoreError> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM catalog_items WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn upsert_item(&self, item: &CatalogItem) -> Result<UpsertOutcome, StoreError> {
        // The update branch never writes the counters.
        let row = sqlx::query(
            r#"
            INSERT INTO catalog_items (
                id, item_no, public_notice_no, auction_no, management_no, category_code,
                category_name, title, goods_description, legal_address, road_address, region,
                disposal_method, bid_method, min_bid_price, appraised_average, bid_start_time,
                bid_end_time, bid_end_at, status, failed_bid_count, source_query_count,
                view_count, interest_count, is_new, is_active, created_at, updated_at,
                last_synced_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29
            )
            ON CONFLICT (item_no) DO UPDATE SET
                public_notice_no = EXCLUDED.public_notice_no,
                auction_no = EXCLUDED.auction_no,
                management_no = EXCLUDED.management_no,
                category_code = EXCLUDED.category_code,
                category_name = EXCLUDED.category_name,
                title = EXCLUDED.title,
                goods_description = EXCLUDED.goods_description,
                legal_address = EXCLUDED.legal_address,
                road_address = EXCLUDED.road_address,
                region = EXCLUDED.region,
                disposal_method = EXCLUDED.disposal_method,
                bid_method = EXCLUDED.bid_method,
                min_bid_price = EXCLUDED.min_bid_price,
                appraised_average = EXCLUDED.appraised_average,
                bid_start_time = EXCLUDED.bid_start_time,
                bid_end_time = EXCLUDED.bid_end_time,
                bid_end_at = EXCLUDED.bid_end_at,
                status = EXCLUDED.status,
                failed_bid_count = EXCLUDED.failed_bid_count,
                source_query_count = EXCLUDED.source_query_count,
                is_new = catalog_items.is_new,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at,
                last_synced_at = EXCLUDED.last_synced_at
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(item.id)
        .bind(&item.item_no)
        .bind(&item.public_notice_no)
        .bind(&item.auction_no)
        .bind(&item.management_no)
        .bind(&item.category_code)
        .bind(&item.category_name)
        .bind(&item.title)
        .bind(&item.goods_description)
        .bind(&item.legal_address)
        .bind(&item.road_address)
        .bind(&item.region)
        .bind(&item.disposal_method)
        .bind(&item.bid_method)
        .bind(item.min_bid_price)
        .bind(item.appraised_average)
        .bind(&item.bid_start_time)
        .bind(&item.bid_end_time)
        .bind(item.bid_end_at)
        .bind(&item.status)
        .bind(item.failed_bid_count)
        .bind(item.source_query_count)
        .bind(item.view_count)
        .bind(item.interest_count)
        .bind(item.is_new)
        .bind(item.is_active)
        .bind(item.created_at)
        .bind(item.updated_at)
        .bind(item.last_synced_at)
        .fetch_one(&self.pool)
        .await?;

        let inserted: bool = row.try_get("inserted")?;
        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn list_active(&self, region: Option<&str>) -> Result<Vec<CatalogItem>, StoreError> {
        let sql = format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM catalog_items
             WHERE is_active AND ($1::TEXT IS NULL OR region = $1)
             ORDER BY bid_end_at ASC NULLS LAST
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(region)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<CatalogItem>, StoreError> {
        let sql = format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM catalog_items
             WHERE is_active
               AND (title ILIKE $1 OR legal_address ILIKE $1 OR road_address ILIKE $1)
             ORDER BY created_at DESC
             LIMIT $2
            "#
        );
        let pattern = format!("%{}%", keyword.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query(&sql)
            .bind(pattern)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn list_new(&self, limit: usize) -> Result<Vec<CatalogItem>, StoreError> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM catalog_items WHERE is_new AND is_active ORDER BY created_at DESC LIMIT $1"
        );
        self.fetch_items(&sql, limit).await
    }

    async fn list_half_off(
        &self,
        region: Option<&str>,
        min_failed_bids: i64,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, StoreError> {
        let sql = format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM catalog_items
             WHERE is_active
               AND COALESCE(failed_bid_count, 0) >= $1
               AND ($2::TEXT IS NULL OR region = $2)
             ORDER BY failed_bid_count DESC, created_at DESC
             LIMIT $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(min_failed_bids)
            .bind(region)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn list_closing_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, StoreError> {
        let sql = format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM catalog_items
             WHERE is_active AND bid_end_at >= $1 AND bid_end_at < $2
             ORDER BY bid_end_at ASC
             LIMIT $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(from)
            .bind(to)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    async fn top_items(&self, order: TopOrder, limit: usize) -> Result<Vec<CatalogItem>, StoreError> {
        let column = match order {
            TopOrder::Views => "view_count",
            TopOrder::Interest => "interest_count",
        };
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM catalog_items WHERE is_active ORDER BY {column} DESC, created_at DESC LIMIT $1"
        );
        self.fetch_items(&sql, limit).await
    }

    async fn record_view(
        &self,
        id: Uuid,
        viewer: &ViewerContext,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "UPDATE catalog_items SET view_count = view_count + 1 WHERE id = $1 RETURNING item_no",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        let item_no: String = row.try_get("item_no")?;

        sqlx::query(
            r#"
            INSERT INTO item_view_logs (id, item_id, item_no, member_id, ip_address, user_agent, viewed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(id)
        .bind(item_no)
        .bind(&viewer.member_id)
        .bind(&viewer.ip_address)
        .bind(&viewer.user_agent)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn adjust_interest(&self, item_no: &str, delta: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE catalog_items SET interest_count = GREATEST(interest_count + $2, 0) WHERE item_no = $1",
        )
        .bind(item_no)
        .bind(delta)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE catalog_items SET is_active = FALSE, updated_at = $1 WHERE is_active AND bid_end_at < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn clear_stale_new(&self, created_before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result =
            sqlx::query("UPDATE catalog_items SET is_new = FALSE WHERE is_new AND created_at < $1")
                .bind(created_before)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn snapshot_stats(&self, stat_date: NaiveDate) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO item_stats (item_id, item_no, stat_date, view_count, interest_count)
            SELECT id, item_no, $1, view_count, interest_count
              FROM catalog_items
             WHERE is_active
            ON CONFLICT (item_id, stat_date) DO UPDATE SET
                view_count = EXCLUDED.view_count,
                interest_count = EXCLUDED.interest_count
            "#,
        )
        .bind(stat_date)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_stats(&self, stat_date: NaiveDate) -> Result<Vec<ItemStatsSnapshot>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT item_id, item_no, stat_date, view_count, interest_count
              FROM item_stats
             WHERE stat_date = $1
             ORDER BY view_count DESC
            "#,
        )
        .bind(stat_date)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(ItemStatsSnapshot {
                item_id: row.try_get("item_id")?,
                item_no: row.try_get("item_no")?,
                stat_date: row.try_get("stat_date")?,
                view_count: row.try_get("view_count")?,
                interest_count: row.try_get("interest_count")?,
            });
        }
        Ok(out)
    }

    async fn delete_stats_before(&self, stat_date: NaiveDate) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM item_stats WHERE stat_date < $1")
            .bind(stat_date)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_view_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM item_view_logs WHERE viewed_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl NotificationRepository for PgStore {
    async fn insert_notification(
        &self,
        notification: &Notification,
    ) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (
                id, item_id, item_no, title, min_bid_price, bid_end_time, kind,
                is_displayed, display_order, dedup_key, created_at, expires_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (dedup_key) DO NOTHING
            "#,
        )
        .bind(notification.id)
        .bind(notification.item_id)
        .bind(&notification.item_no)
        .bind(&notification.title)
        .bind(notification.min_bid_price)
        .bind(&notification.bid_end_time)
        .bind(notification.kind.as_str())
        .bind(notification.is_displayed)
        .bind(notification.display_order)
        .bind(&notification.dedup_key)
        .bind(notification.created_at)
        .bind(notification.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn list_notifications(
        &self,
        kind: NotificationKind,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StoreError> {
        let sql = format!(
            r#"
            SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE kind = $1 AND is_displayed AND expires_at > $2
             ORDER BY display_order ASC, created_at DESC
             LIMIT $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(kind.as_str())
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn delete_expired_notifications(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM notifications WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn hide_notifications_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_displayed = FALSE WHERE is_displayed AND created_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl WatchRepository for PgStore {
    async fn list_alert_watches(&self) -> Result<Vec<WatchedItem>, StoreError> {
        let item_columns = ITEM_COLUMNS
            .split(',')
            .map(|c| format!("i.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            r#"
            SELECT w.id AS watch_id, w.user_id AS watch_user_id, w.alerts_enabled,
                   w.created_at AS watch_created_at, {item_columns}
              FROM watches w
              JOIN catalog_items i ON i.id = w.item_id
             WHERE w.alerts_enabled
             ORDER BY w.created_at ASC
            "#
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let item = item_from_row(&row)?;
            out.push(WatchedItem {
                watch: Watch {
                    id: row.try_get("watch_id")?,
                    user_id: row.try_get("watch_user_id")?,
                    item_id: item.id,
                    alerts_enabled: row.try_get("alerts_enabled")?,
                    created_at: row.try_get("watch_created_at")?,
                },
                item,
            });
        }
        Ok(out)
    }

    async fn latest_price_alert(&self, watch_id: Uuid) -> Result<Option<PriceAlert>, StoreError> {
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM price_alerts WHERE watch_id = $1 ORDER BY created_at DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(watch_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(alert_from_row).transpose()
    }

    async fn insert_price_alert(&self, alert: &PriceAlert) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO price_alerts (
                id, watch_id, user_id, item_no, previous_price, new_price, sent, sent_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(alert.id)
        .bind(alert.watch_id)
        .bind(&alert.user_id)
        .bind(&alert.item_no)
        .bind(alert.previous_price)
        .bind(alert.new_price)
        .bind(alert.sent)
        .bind(alert.sent_at)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn contact_for(&self, user_id: &str) -> Result<Option<Contact>, StoreError> {
        let row = sqlx::query(
            "SELECT user_id, display_name, email FROM member_contacts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(Contact {
                user_id: row.try_get("user_id")?,
                display_name: row.try_get("display_name")?,
                email: row.try_get("email")?,
            })),
            None => Ok(None),
        }
    }

    async fn delete_price_alerts_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM price_alerts WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
