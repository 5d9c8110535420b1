//! Listing source contract + the Onbid XML feed client.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use onbid_core::{derive_region, known_region, FeedKind, ListingRecord};
use onbid_storage::{FetchError, HttpFetcher};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "onbid-adapters";

pub const DEFAULT_BASE_URL: &str = "https://www.onbid.co.kr/op/nsclbi";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("malformed feed payload: {0}")]
    Decode(String),
    #[error("feed rejected request: code {code} ({message})")]
    ResultCode { code: String, message: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// One page of the external listing feed.
///
/// `region: None` asks for the page without a `SIDO` restriction. Records come
/// back exactly as decoded; callers decide emptiness on the raw page and apply
/// [`FeedPage::in_region`] afterwards.
#[async_trait]
pub trait ListingSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch_page(
        &self,
        region: Option<&str>,
        page_no: u32,
        page_size: u32,
        feed: FeedKind,
    ) -> Result<FeedPage, AdapterError>;
}

/// Decoded feed payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPage {
    pub records: Vec<ListingRecord>,
    pub total_count: Option<u64>,
}

impl FeedPage {
    pub fn from_records(records: Vec<ListingRecord>) -> Self {
        Self {
            records,
            total_count: None,
        }
    }

    /// Zero `<item>` elements on the wire: the feed has no more pages.
    pub fn is_exhausted(&self) -> bool {
        self.records.is_empty()
    }

    /// Records kept by [`filter_region`] for `region`.
    pub fn in_region(self, region: &str) -> Vec<ListingRecord> {
        filter_region(region, self.records)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnbidClientConfig {
    pub base_url: String,
    pub service_key: String,
}

impl Default for OnbidClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            service_key: String::new(),
        }
    }
}

/// HTTP implementation of [`ListingSource`] over the Onbid open API.
///
/// Every failure of a single page call is logged and turned into an empty page.
#[derive(Debug, Clone)]
pub struct OnbidClient {
    config: OnbidClientConfig,
    http: Arc<HttpFetcher>,
}

impl OnbidClient {
    pub fn new(config: OnbidClientConfig, http: Arc<HttpFetcher>) -> Self {
        Self { config, http }
    }

    /// Endpoint URL with the service key already attached. Public-data keys are
    /// issued pre-encoded, so the key is not encoded again.
    pub fn endpoint_url(&self, feed: FeedKind) -> String {
        format!(
            "{}/{}?serviceKey={}",
            self.config.base_url.trim_end_matches('/'),
            feed.endpoint(),
            self.config.service_key
        )
    }

    pub fn page_query(
        region: Option<&str>,
        page_no: u32,
        page_size: u32,
    ) -> Vec<(&'static str, String)> {
        let mut query = Vec::with_capacity(3);
        if let Some(region) = region {
            query.push(("SIDO", region.to_string()));
        }
        query.push(("pageNo", page_no.to_string()));
        query.push(("numOfRows", page_size.to_string()));
        query
    }

    /// Fetch and decode one page without degrading errors.
    pub async fn request_page(
        &self,
        region: Option<&str>,
        page_no: u32,
        page_size: u32,
        feed: FeedKind,
    ) -> Result<FeedPage, AdapterError> {
        let url = self.endpoint_url(feed);
        let query = Self::page_query(region, page_no, page_size);
        let response = self
            .http
            .fetch_text(Uuid::new_v4(), feed.as_str(), &url, &query)
            .await?;
        debug!(
            status = response.status.as_u16(),
            final_url = %response.final_url,
            bytes = response.body.len(),
            "feed response"
        );
        parse_listing_xml(&response.body)
    }
}

#[async_trait]
impl ListingSource for OnbidClient {
    fn source_id(&self) -> &str {
        "onbid"
    }

    async fn fetch_page(
        &self,
        region: Option<&str>,
        page_no: u32,
        page_size: u32,
        feed: FeedKind,
    ) -> Result<FeedPage, AdapterError> {
        let sido = region.unwrap_or("");
        match self.request_page(region, page_no, page_size, feed).await {
            Ok(page) => {
                info!(
                    feed = feed.as_str(),
                    region = sido,
                    page_no,
                    records = page.records.len(),
                    total_count = ?page.total_count,
                    "feed page decoded"
                );
                Ok(page)
            }
            Err(err) => {
                warn!(
                    feed = feed.as_str(),
                    region = sido,
                    page_no,
                    error = %err,
                    "feed page failed; treating as empty"
                );
                Ok(FeedPage::default())
            }
        }
    }
}

/// Drop records whose derived region is a known division other than the one
/// requested. Unknown names on either side keep the record.
pub fn filter_region(requested: &str, records: Vec<ListingRecord>) -> Vec<ListingRecord> {
    let Some(wanted) = known_region(requested) else {
        return records;
    };
    records
        .into_iter()
        .filter(|record| {
            let derived = derive_region(record.legal_address.as_deref());
            match derived.as_deref().and_then(known_region) {
                Some(actual) if actual != wanted => {
                    debug!(
                        item_no = record.item_no.as_deref().unwrap_or(""),
                        requested = wanted,
                        actual,
                        "dropping out-of-region record"
                    );
                    false
                }
                _ => true,
            }
        })
        .collect()
}

/// Digits with an optional leading `-`; negative values count as absent.
pub fn parse_price(raw: &str) -> Option<i64> {
    parse_signed(raw).filter(|value| *value >= 0)
}

/// Separators and units are dropped. A `-` anywhere but in front makes the value
/// unreadable.
fn parse_signed(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    let (negative, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    if rest.contains('-') {
        return None;
    }
    let digits: String = rest.chars().filter(char::is_ascii_digit).collect();
    let magnitude: i64 = digits.parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

pub fn parse_count(raw: &str) -> Option<i64> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

const ITEM_TAG: &str = "item";

fn is_success_code(code: &str) -> bool {
    let code = code.trim();
    !code.is_empty() && code.chars().all(|c| c == '0')
}

/// Decode a feed response body.
///
/// Each direct child of an `<item>` element becomes a named field. A non-success
/// `resultCode` (or a gateway `returnReasonCode`) is an error; a page without
/// items is not.
pub fn parse_listing_xml(xml: &str) -> Result<FeedPage, AdapterError> {
    if xml.trim().is_empty() {
        return Err(AdapterError::Decode("empty body".to_string()));
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut current_item: Option<HashMap<String, String>> = None;
    let mut items: Vec<HashMap<String, String>> = Vec::new();
    let mut header: HashMap<String, String> = HashMap::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == ITEM_TAG && current_item.is_none() {
                    current_item = Some(HashMap::new());
                }
                path.push(name);
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if let Some(fields) = current_item.as_mut() {
                    fields.entry(name).or_default();
                }
            }
            Ok(Event::Text(t)) => {
                let value = t
                    .unescape()
                    .map_err(|err| AdapterError::Decode(err.to_string()))?;
                text.push_str(&value);
            }
            Ok(Event::CData(c)) => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Ok(Event::End(_)) => {
                let Some(name) = path.pop() else {
                    return Err(AdapterError::Decode("unbalanced closing tag".to_string()));
                };
                if name == ITEM_TAG && path.iter().all(|p| p != ITEM_TAG) {
                    if let Some(fields) = current_item.take() {
                        items.push(fields);
                    }
                } else if let Some(fields) = current_item.as_mut() {
                    if path.last().map(String::as_str) == Some(ITEM_TAG) {
                        fields.insert(name, text.trim().to_string());
                    }
                } else {
                    header.insert(name, text.trim().to_string());
                }
                text.clear();
            }
            Ok(Event::Eof) => {
                if let Some(open) = path.last() {
                    return Err(AdapterError::Decode(format!("document ends inside <{open}>")));
                }
                break;
            }
            Ok(_) => {}
            Err(err) => {
                return Err(AdapterError::Decode(format!(
                    "at byte {}: {err}",
                    reader.buffer_position()
                )))
            }
        }
    }

    if let Some(code) = header.get("resultCode") {
        if !is_success_code(code) {
            return Err(AdapterError::ResultCode {
                code: code.clone(),
                message: header.get("resultMsg").cloned().unwrap_or_default(),
            });
        }
    }
    if let Some(code) = header.get("returnReasonCode") {
        if !is_success_code(code) {
            let message = header
                .get("returnAuthMsg")
                .or_else(|| header.get("errMsg"))
                .cloned()
                .unwrap_or_default();
            return Err(AdapterError::ResultCode {
                code: code.clone(),
                message,
            });
        }
    }

    let total_count = header
        .get("totalCount")
        .and_then(|raw| raw.trim().parse::<u64>().ok());
    if items.is_empty() {
        debug!(
            result_msg = header.get("resultMsg").map(String::as_str).unwrap_or(""),
            "feed page has no items"
        );
    }

    Ok(FeedPage {
        records: items.iter().map(record_from_fields).collect(),
        total_count,
    })
}

fn field(fields: &HashMap<String, String>, tag: &str) -> Option<String> {
    fields
        .get(tag)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn price_field(fields: &HashMap<String, String>, tag: &str) -> Option<i64> {
    let raw = field(fields, tag)?;
    let item_no = fields.get("CLTR_NO").map(String::as_str).unwrap_or("");
    match parse_signed(&raw) {
        Some(value) if value < 0 => {
            warn!(item_no, tag, raw = %raw, "negative price in feed; ignoring");
            None
        }
        None => {
            warn!(item_no, tag, raw = %raw, "unreadable price in feed; ignoring");
            None
        }
        other => other,
    }
}

fn count_field(fields: &HashMap<String, String>, tag: &str) -> Option<i64> {
    field(fields, tag).and_then(|raw| parse_count(&raw))
}

fn record_from_fields(fields: &HashMap<String, String>) -> ListingRecord {
    ListingRecord {
        item_no: field(fields, "CLTR_NO"),
        public_notice_no: field(fields, "PLNM_NO"),
        auction_no: field(fields, "PBCT_NO"),
        management_no: field(fields, "CLTR_MNMT_NO"),
        category_code: field(fields, "CTGR_ID"),
        category_name: field(fields, "CTGR_FULL_NM"),
        title: field(fields, "CLTR_NM"),
        goods_description: field(fields, "GOODS_NM"),
        legal_address: field(fields, "LDNM_ADRS"),
        road_address: field(fields, "NMRD_ADRS"),
        disposal_method: field(fields, "DPSL_MTD_NM"),
        bid_method: field(fields, "BID_MTD_NM"),
        min_bid_price: price_field(fields, "MIN_BID_PRC"),
        appraised_average: price_field(fields, "APSL_ASES_AVG_AMT"),
        bid_start_time: field(fields, "PBCT_BEGN_DTM"),
        bid_end_time: field(fields, "PBCT_CLS_DTM"),
        status: field(fields, "PBCT_CLTR_STAT_NM"),
        failed_bid_count: count_field(fields, "USCBD_CNT"),
        source_query_count: count_field(fields, "IQRY_CNT"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onbid_storage::HttpClientConfig;

    #[test]
    fn price_parsing_strips_separators_and_rejects_negatives() {
        assert_eq!(parse_price("123,456,000"), Some(123_456_000));
        assert_eq!(parse_price("1,000원"), Some(1000));
        assert_eq!(parse_price("-1,000"), None);
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("미정"), None);
        assert_eq!(parse_price(" -0 "), Some(0));
    }

    #[test]
    fn inner_dash_makes_a_price_unreadable() {
        assert_eq!(parse_price("1-000"), None);
        assert_eq!(parse_price("--1000"), None);
        assert_eq!(parse_price("1,000-"), None);
        assert_eq!(parse_signed("-2,500"), Some(-2500));
    }

    #[test]
    fn count_parsing_keeps_digits_only() {
        assert_eq!(parse_count("3회"), Some(3));
        assert_eq!(parse_count("-2"), Some(2));
        assert_eq!(parse_count("없음"), None);
    }

    #[test]
    fn item_fields_map_by_tag_name() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<response>
  <header><resultCode>00</resultCode><resultMsg>NORMAL SERVICE.</resultMsg></header>
  <body>
    <items>
      <item>
        <CLTR_NO>1555001</CLTR_NO>
        <CLTR_NM><![CDATA[서울 마포구 아파트 & 상가]]></CLTR_NM>
        <LDNM_ADRS>서울특별시 마포구 서교동 10</LDNM_ADRS>
        <MIN_BID_PRC>-1,000</MIN_BID_PRC>
        <APSL_ASES_AVG_AMT>250,000,000</APSL_ASES_AVG_AMT>
        <USCBD_CNT>2</USCBD_CNT>
        <GOODS_NM/>
      </item>
    </items>
    <totalCount>1</totalCount>
  </body>
</response>"#;

        let page = parse_listing_xml(xml).unwrap();
        assert_eq!(page.total_count, Some(1));
        assert_eq!(page.records.len(), 1);
        let record = &page.records[0];
        assert_eq!(record.item_no.as_deref(), Some("1555001"));
        assert_eq!(record.title.as_deref(), Some("서울 마포구 아파트 & 상가"));
        assert_eq!(record.min_bid_price, None);
        assert_eq!(record.appraised_average, Some(250_000_000));
        assert_eq!(record.failed_bid_count, Some(2));
        assert_eq!(record.goods_description, None);
        assert_eq!(record.bid_end_time, None);
    }

    #[test]
    fn entity_escapes_are_decoded() {
        let xml = "<response><header><resultCode>00</resultCode></header><body><items>\
                   <item><CLTR_NO>9</CLTR_NO><CLTR_NM>A &amp; B</CLTR_NM></item>\
                   </items></body></response>";
        let page = parse_listing_xml(xml).unwrap();
        assert_eq!(page.records[0].title.as_deref(), Some("A & B"));
    }

    #[test]
    fn region_filter_only_drops_known_mismatches() {
        let record = |addr: &str| ListingRecord {
            item_no: Some(addr.to_string()),
            legal_address: Some(addr.to_string()),
            ..Default::default()
        };
        let records = vec![
            record("서울특별시 종로구"),
            record("부산광역시 중구"),
            record("어딘가 미상"),
        ];
        let kept = filter_region("서울특별시", records.clone());
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|r| !r
            .legal_address
            .as_deref()
            .unwrap_or("")
            .starts_with("부산")));
        assert_eq!(filter_region("전국", records).len(), 3);
    }

    #[test]
    fn service_key_is_not_re_encoded() {
        let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        let client = OnbidClient::new(
            OnbidClientConfig {
                base_url: "https://example.test/op/nsclbi/".to_string(),
                service_key: "abc%2Bdef%3D%3D".to_string(),
            },
            http,
        );
        assert_eq!(
            client.endpoint_url(FeedKind::HalfOff),
            "https://example.test/op/nsclbi/getUnifyDegression50PerCltrList?serviceKey=abc%2Bdef%3D%3D"
        );
        let query = OnbidClient::page_query(Some("서울특별시"), 2, 100);
        assert_eq!(query[0], ("SIDO", "서울특별시".to_string()));
        assert_eq!(query[1], ("pageNo", "2".to_string()));
        assert_eq!(query[2], ("numOfRows", "100".to_string()));
    }

    #[test]
    fn nationwide_query_omits_the_region() {
        let query = OnbidClient::page_query(None, 1, 100);
        assert_eq!(query.len(), 2);
        assert!(query.iter().all(|(name, _)| *name != "SIDO"));
    }

    #[test]
    fn out_of_region_page_is_not_exhausted() {
        let record = |no: &str, addr: &str| ListingRecord {
            item_no: Some(no.to_string()),
            legal_address: Some(addr.to_string()),
            ..Default::default()
        };
        let page = FeedPage::from_records(vec![
            record("1", "부산광역시 중구"),
            record("2", "부산광역시 동구"),
        ]);
        assert!(!page.is_exhausted());
        assert!(page.in_region("서울특별시").is_empty());
        assert!(FeedPage::default().is_exhausted());
    }
}
