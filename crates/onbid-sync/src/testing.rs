//! Test doubles shared by the sync unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use onbid_adapters::{AdapterError, FeedPage, ListingSource};
use onbid_core::{FeedKind, ListingRecord};
use tokio::sync::Mutex;

use crate::mail::{MailError, Mailer};

pub fn listing(item_no: &str, price: i64) -> ListingRecord {
    ListingRecord {
        item_no: Some(item_no.to_string()),
        title: Some(format!("테스트 물건 {item_no}")),
        legal_address: Some("서울특별시 용산구 한강로 1".to_string()),
        min_bid_price: Some(price),
        bid_start_time: Some("203001011000".to_string()),
        bid_end_time: Some("203001031700".to_string()),
        ..Default::default()
    }
}

#[derive(Default)]
struct ScriptState {
    repeating: Option<Vec<ListingRecord>>,
    pages: VecDeque<Vec<ListingRecord>>,
    failing_regions: HashSet<String>,
    calls: Vec<(String, u32, FeedKind)>,
}

/// Serves canned pages and records every call.
#[derive(Default)]
pub struct ScriptedSource {
    state: Mutex<ScriptState>,
}

impl ScriptedSource {
    /// Same records for every call.
    pub fn repeating(records: Vec<ListingRecord>) -> Self {
        let state = ScriptState {
            repeating: Some(records),
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Pages in order, then empty pages forever.
    pub fn pages(pages: Vec<Vec<ListingRecord>>) -> Self {
        let state = ScriptState {
            pages: pages.into(),
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn failing_region(mut self, region: &str) -> Self {
        self.state
            .get_mut()
            .failing_regions
            .insert(region.to_string());
        self
    }

    pub async fn set_repeating(&self, records: Vec<ListingRecord>) {
        self.state.lock().await.repeating = Some(records);
    }

    pub async fn calls(&self) -> Vec<(String, u32, FeedKind)> {
        self.state.lock().await.calls.clone()
    }
}

#[async_trait]
impl ListingSource for ScriptedSource {
    fn source_id(&self) -> &str {
        "scripted"
    }

    async fn fetch_page(
        &self,
        region: Option<&str>,
        page_no: u32,
        _page_size: u32,
        feed: FeedKind,
    ) -> Result<FeedPage, AdapterError> {
        let region = region.unwrap_or_default();
        let mut state = self.state.lock().await;
        state.calls.push((region.to_string(), page_no, feed));
        if state.failing_regions.contains(region) {
            return Err(AdapterError::Message(format!("scripted failure for {region}")));
        }
        if let Some(records) = &state.repeating {
            return Ok(FeedPage::from_records(records.clone()));
        }
        Ok(FeedPage::from_records(state.pages.pop_front().unwrap_or_default()))
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, String, String)>>,
}

impl RecordingMailer {
    pub async fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        self.sent
            .lock()
            .await
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FailingMailer {
    attempts: AtomicUsize,
}

impl FailingMailer {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), MailError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(MailError::Api {
            status: 502,
            body: "gateway down".to_string(),
        })
    }
}
