use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use onbid_adapters::ListingSource;
use onbid_core::{positive_price, FeedKind, ListingRecord, PriceAlert, WatchedItem};
use onbid_storage::{BackoffPolicy, StoreError, WatchRepository};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::mail::{send_with_retry, MailError, Mailer};
use crate::notices::NotificationGenerator;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Mail(#[from] MailError),
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub page_size: u32,
    pub delivery_attempts: usize,
    pub backoff: BackoffPolicy,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            delivery_attempts: 3,
            backoff: BackoffPolicy {
                max_retries: 2,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(4),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchOutcome {
    NoStoredPrice,
    NotInSnapshot,
    NotLower,
    AlreadyAlerted,
    NoContact,
    Alerted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorSummary {
    pub run_id: Uuid,
    pub watches_checked: usize,
    pub regions_fetched: usize,
    pub alerts_sent: usize,
    pub already_alerted: usize,
    pub skipped: usize,
    pub failures: usize,
}

/// Compares fresh feed prices against stored prices of watched items and mails
/// the owner on a drop. Stored prices are never modified here.
pub struct PriceMonitor {
    source: Arc<dyn ListingSource>,
    watches: Arc<dyn WatchRepository>,
    notices: NotificationGenerator,
    mailer: Arc<dyn Mailer>,
    settings: MonitorSettings,
}

impl PriceMonitor {
    pub fn new(
        source: Arc<dyn ListingSource>,
        watches: Arc<dyn WatchRepository>,
        notices: NotificationGenerator,
        mailer: Arc<dyn Mailer>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            source,
            watches,
            notices,
            mailer,
            settings,
        }
    }

    pub async fn run(&self) -> Result<MonitorSummary, MonitorError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("price_monitor", %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<MonitorSummary, MonitorError> {
        let mut summary = MonitorSummary {
            run_id,
            ..Default::default()
        };
        let watched = self.watches.list_alert_watches().await?;
        summary.watches_checked = watched.len();
        if watched.is_empty() {
            info!("no watches with alerts enabled");
            return Ok(summary);
        }

        // `None` is one nationwide page for items whose address gave no region.
        let regions: BTreeSet<Option<&str>> = watched
            .iter()
            .filter(|w| w.item.min_bid_price.is_some())
            .map(|w| w.item.region.as_deref().filter(|r| !r.trim().is_empty()))
            .collect();
        let mut snapshot: HashMap<String, ListingRecord> = HashMap::new();
        for region in regions {
            let label = region.unwrap_or("nationwide");
            match self
                .source
                .fetch_page(region, 1, self.settings.page_size, FeedKind::General)
                .await
            {
                Ok(page) => {
                    summary.regions_fetched += 1;
                    for record in page.records {
                        if let Some(key) = record.natural_key().map(ToString::to_string) {
                            snapshot.insert(key, record);
                        }
                    }
                }
                Err(err) => warn!(region = label, error = %err, "price snapshot fetch failed"),
            }
        }

        for entry in &watched {
            match self.check_watch(entry, &snapshot).await {
                Ok(WatchOutcome::Alerted) => summary.alerts_sent += 1,
                Ok(WatchOutcome::AlreadyAlerted) => summary.already_alerted += 1,
                Ok(_) => summary.skipped += 1,
                Err(err) => {
                    summary.failures += 1;
                    error!(
                        watch_id = %entry.watch.id,
                        item_no = %entry.item.item_no,
                        error = %err,
                        "price check failed"
                    );
                }
            }
        }

        info!(
            watches = summary.watches_checked,
            alerts = summary.alerts_sent,
            failures = summary.failures,
            "price monitor finished"
        );
        Ok(summary)
    }

    async fn check_watch(
        &self,
        entry: &WatchedItem,
        snapshot: &HashMap<String, ListingRecord>,
    ) -> Result<WatchOutcome, MonitorError> {
        let item = &entry.item;
        let Some(stored_price) = item.min_bid_price else {
            return Ok(WatchOutcome::NoStoredPrice);
        };
        if item.item_no.trim().is_empty() {
            return Ok(WatchOutcome::NoStoredPrice);
        }
        let Some(fresh_price) = snapshot
            .get(item.item_no.trim())
            .and_then(|record| positive_price(record.min_bid_price))
        else {
            debug!(item_no = %item.item_no, "item not in price snapshot");
            return Ok(WatchOutcome::NotInSnapshot);
        };
        if fresh_price >= stored_price {
            return Ok(WatchOutcome::NotLower);
        }

        if let Some(last) = self.watches.latest_price_alert(entry.watch.id).await? {
            if last.new_price == fresh_price {
                debug!(item_no = %item.item_no, price = fresh_price, "drop already alerted");
                return Ok(WatchOutcome::AlreadyAlerted);
            }
        }

        let contact = self.watches.contact_for(&entry.watch.user_id).await?;
        let Some((name, email)) = contact.and_then(|c| {
            let email = c.email.filter(|e| !e.trim().is_empty())?;
            Some((c.display_name.unwrap_or_else(|| c.user_id.clone()), email))
        }) else {
            warn!(user_id = %entry.watch.user_id, "no deliverable contact for watch owner");
            return Ok(WatchOutcome::NoContact);
        };

        let title = item.title.as_deref().unwrap_or("물건");
        let (subject, body) =
            compose_price_drop_mail(&name, title, &item.item_no, stored_price, fresh_price);
        send_with_retry(
            self.mailer.as_ref(),
            &email,
            &subject,
            &body,
            self.settings.delivery_attempts,
            &self.settings.backoff,
        )
        .await?;

        let now = Utc::now();
        self.watches
            .insert_price_alert(&PriceAlert {
                id: Uuid::new_v4(),
                watch_id: entry.watch.id,
                user_id: entry.watch.user_id.clone(),
                item_no: item.item_no.clone(),
                previous_price: Some(stored_price),
                new_price: fresh_price,
                sent: true,
                sent_at: Some(now),
                created_at: now,
            })
            .await?;
        self.notices.create_price_drop_notice(item, fresh_price).await?;
        info!(to = %email, item_no = %item.item_no, fresh_price, "price drop alert sent");
        Ok(WatchOutcome::Alerted)
    }
}

/// `1234567` -> `1,234,567`
pub fn format_won(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if value < 0 {
        out.insert(0, '-');
    }
    out
}

pub fn compose_price_drop_mail(
    recipient: &str,
    title: &str,
    item_no: &str,
    previous: i64,
    current: i64,
) -> (String, String) {
    let subject = format!("[가격 하락 알림] {title}");
    let drop = previous - current;
    let rate = if previous > 0 {
        drop as f64 / previous as f64 * 100.0
    } else {
        0.0
    };
    let rule = "===========================================";
    let body = format!(
        "안녕하세요, {recipient}님!\n\n\
         관심 등록하신 물건의 최저입찰가가 하락했습니다.\n\n\
         {rule}\n\
         물건명: {title}\n\
         물건번호: {item_no}\n\
         이전 가격: {}원\n\
         현재 가격: {}원\n\
         하락 금액: {}원 ({rate:.1}%)\n\
         {rule}\n\n\
         자세한 내용은 사이트에서 확인해주세요.",
        format_won(previous),
        format_won(current),
        format_won(drop),
    );
    (subject, body)
}
