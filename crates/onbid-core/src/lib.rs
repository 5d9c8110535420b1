//! Core domain model for the Onbid catalog pipeline.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "onbid-core";

/// Offset of the timestamps published by the feed (KST).
pub const SOURCE_UTC_OFFSET_SECS: i32 = 9 * 3600;

/// Fixed query variants exposed by the listing feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    General,
    NewlyListed,
    Deadline,
    HalfOff,
}

impl FeedKind {
    pub const ALL: [FeedKind; 4] = [
        FeedKind::General,
        FeedKind::NewlyListed,
        FeedKind::Deadline,
        FeedKind::HalfOff,
    ];

    pub fn endpoint(self) -> &'static str {
        match self {
            FeedKind::General => "getUnifyUsageCltr",
            FeedKind::NewlyListed => "getUnifyNewCltrList",
            FeedKind::Deadline => "getUnifyDeadlineCltrList",
            FeedKind::HalfOff => "getUnifyDegression50PerCltrList",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FeedKind::General => "general",
            FeedKind::NewlyListed => "newly_listed",
            FeedKind::Deadline => "deadline",
            FeedKind::HalfOff => "half_off",
        }
    }
}

/// Normalized record handed from the source adapter to the catalog.
///
/// Every field is optional: the adapter extracts tags by name and a missing tag
/// is `None`. Prices have already had their sign checked by the adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub item_no: Option<String>,
    pub public_notice_no: Option<String>,
    pub auction_no: Option<String>,
    pub management_no: Option<String>,
    pub category_code: Option<String>,
    pub category_name: Option<String>,
    pub title: Option<String>,
    pub goods_description: Option<String>,
    pub legal_address: Option<String>,
    pub road_address: Option<String>,
    pub disposal_method: Option<String>,
    pub bid_method: Option<String>,
    pub min_bid_price: Option<i64>,
    pub appraised_average: Option<i64>,
    pub bid_start_time: Option<String>,
    pub bid_end_time: Option<String>,
    pub status: Option<String>,
    pub failed_bid_count: Option<i64>,
    pub source_query_count: Option<i64>,
}

impl ListingRecord {
    /// Trimmed natural key, if the record carries a usable one.
    pub fn natural_key(&self) -> Option<&str> {
        self.item_no
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// One catalog row per external listing lineage, keyed by `item_no`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: Uuid,
    pub item_no: String,
    pub public_notice_no: Option<String>,
    pub auction_no: Option<String>,
    pub management_no: Option<String>,
    pub category_code: Option<String>,
    pub category_name: Option<String>,
    pub title: Option<String>,
    pub goods_description: Option<String>,
    pub legal_address: Option<String>,
    pub road_address: Option<String>,
    pub region: Option<String>,
    pub disposal_method: Option<String>,
    pub bid_method: Option<String>,
    pub min_bid_price: Option<i64>,
    pub appraised_average: Option<i64>,
    pub bid_start_time: Option<String>,
    pub bid_end_time: Option<String>,
    pub bid_end_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub failed_bid_count: Option<i64>,
    pub source_query_count: Option<i64>,
    pub view_count: i64,
    pub interest_count: i64,
    pub is_new: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
}

impl CatalogItem {
    /// Build a fresh row from a feed record. Locally-owned fields start at their
    /// creation defaults; the catalog store overwrites them when the key exists.
    /// Rows always start active; `deactivate_expired` retires past auctions.
    pub fn from_record(item_no: &str, record: &ListingRecord, now: DateTime<Utc>) -> Self {
        let bid_end_at = record
            .bid_end_time
            .as_deref()
            .and_then(parse_source_timestamp);
        Self {
            id: Uuid::new_v4(),
            item_no: item_no.to_string(),
            public_notice_no: record.public_notice_no.clone(),
            auction_no: record.auction_no.clone(),
            management_no: record.management_no.clone(),
            category_code: record.category_code.clone(),
            category_name: record.category_name.clone(),
            title: record.title.clone(),
            goods_description: record.goods_description.clone(),
            legal_address: record.legal_address.clone(),
            road_address: record.road_address.clone(),
            region: derive_region(record.legal_address.as_deref()),
            disposal_method: record.disposal_method.clone(),
            bid_method: record.bid_method.clone(),
            min_bid_price: positive_price(record.min_bid_price),
            appraised_average: positive_price(record.appraised_average),
            bid_start_time: record.bid_start_time.clone(),
            bid_end_time: record.bid_end_time.clone(),
            bid_end_at,
            status: record.status.clone(),
            failed_bid_count: record.failed_bid_count,
            source_query_count: record.source_query_count,
            view_count: 0,
            interest_count: 0,
            is_new: true,
            is_active: true,
            created_at: now,
            updated_at: now,
            last_synced_at: now,
        }
    }
}

/// Auction prices are never zero or negative; anything else is treated as absent.
pub fn positive_price(value: Option<i64>) -> Option<i64> {
    value.filter(|v| *v > 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    New,
    PriceDrop,
    Deadline,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::New => "NEW",
            NotificationKind::PriceDrop => "PRICE_DROP",
            NotificationKind::Deadline => "DEADLINE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NEW" => Some(NotificationKind::New),
            "PRICE_DROP" => Some(NotificationKind::PriceDrop),
            "DEADLINE" => Some(NotificationKind::Deadline),
            _ => None,
        }
    }
}

/// Short-lived notice derived from a catalog row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub item_id: Uuid,
    pub item_no: String,
    pub title: Option<String>,
    pub min_bid_price: Option<i64>,
    pub bid_end_time: Option<String>,
    pub kind: NotificationKind,
    pub is_displayed: bool,
    pub display_order: i32,
    pub dedup_key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Notification {
    pub fn for_item(
        item: &CatalogItem,
        kind: NotificationKind,
        dedup_key: String,
        display_order: i32,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id: item.id,
            item_no: item.item_no.clone(),
            title: item.title.clone(),
            min_bid_price: item.min_bid_price,
            bid_end_time: item.bid_end_time.clone(),
            kind,
            is_displayed: true,
            display_order,
            dedup_key,
            created_at: now,
            expires_at,
        }
    }
}

/// A user's subscription to one catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watch {
    pub id: Uuid,
    pub user_id: String,
    pub item_id: Uuid,
    pub alerts_enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Watch joined with its catalog row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedItem {
    pub watch: Watch,
    pub item: CatalogItem,
}

/// Delivery address of a watch owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub user_id: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceAlert {
    pub id: Uuid,
    pub watch_id: Uuid,
    pub user_id: String,
    pub item_no: String,
    pub previous_price: Option<i64>,
    pub new_price: i64,
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Who looked at an item; every field is best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerContext {
    pub member_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewLog {
    pub id: Uuid,
    pub item_id: Uuid,
    pub item_no: String,
    pub viewer: ViewerContext,
    pub viewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStatsSnapshot {
    pub item_id: Uuid,
    pub item_no: String,
    pub stat_date: NaiveDate,
    pub view_count: i64,
    pub interest_count: i64,
}

/// First-level administrative divisions keyed by the address prefixes that name
/// them. Lookup picks the longest matching prefix.
pub const REGION_TABLE: &[(&str, &str)] = &[
    ("서울특별시", "서울특별시"),
    ("서울", "서울특별시"),
    ("부산광역시", "부산광역시"),
    ("부산", "부산광역시"),
    ("대구광역시", "대구광역시"),
    ("대구", "대구광역시"),
    ("인천광역시", "인천광역시"),
    ("인천", "인천광역시"),
    ("광주광역시", "광주광역시"),
    ("대전광역시", "대전광역시"),
    ("대전", "대전광역시"),
    ("울산광역시", "울산광역시"),
    ("울산", "울산광역시"),
    ("세종특별자치시", "세종특별자치시"),
    ("경기도", "경기도"),
    ("경기", "경기도"),
    ("강원", "강원도"),
    ("충청북도", "충청북도"),
    ("충북", "충청북도"),
    ("충청남도", "충청남도"),
    ("충남", "충청남도"),
    ("전북특별자치도", "전북특별자치도"),
    ("전라북도", "전북특별자치도"),
    ("전북", "전북특별자치도"),
    ("전라남도", "전라남도"),
    ("전남", "전라남도"),
    ("경상북도", "경상북도"),
    ("경북", "경상북도"),
    ("경상남도", "경상남도"),
    ("경남", "경상남도"),
    ("제주", "제주특별자치도"),
];

const REGION_FALLBACK_CHARS: usize = 3;

/// Derive the coarse region of a legal address.
///
/// Longest table prefix wins; with no match the first three characters of the
/// address are used.
pub fn derive_region(address: Option<&str>) -> Option<String> {
    let address = address.map(str::trim).filter(|a| !a.is_empty())?;
    let matched = REGION_TABLE
        .iter()
        .filter(|(prefix, _)| address.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len());
    match matched {
        Some((_, division)) => Some((*division).to_string()),
        None => Some(address.chars().take(REGION_FALLBACK_CHARS).collect()),
    }
}

/// Canonical division for a region name, when the table knows it.
pub fn known_region(name: &str) -> Option<&'static str> {
    let name = name.trim();
    REGION_TABLE
        .iter()
        .find(|(prefix, division)| *prefix == name || *division == name)
        .map(|(_, division)| *division)
}

/// Parse a feed timestamp (`yyyyMMddHHmm`, `yyyyMMddHHmmss`, `yyyyMMdd`, with or
/// without separators) published in KST.
pub fn parse_source_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let naive = match digits.len() {
        14 => NaiveDateTime::parse_from_str(&digits, "%Y%m%d%H%M%S").ok()?,
        12 => NaiveDateTime::parse_from_str(&digits, "%Y%m%d%H%M").ok()?,
        8 => NaiveDate::parse_from_str(&digits, "%Y%m%d")
            .ok()?
            .and_hms_opt(0, 0, 0)?,
        _ => return None,
    };
    let offset = FixedOffset::east_opt(SOURCE_UTC_OFFSET_SECS)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_prefix_resolves_to_division() {
        assert_eq!(
            derive_region(Some("서울특별시 강남구 역삼동 123")).as_deref(),
            Some("서울특별시")
        );
        assert_eq!(
            derive_region(Some("전라북도 전주시 완산구")).as_deref(),
            Some("전북특별자치도")
        );
        assert_eq!(
            derive_region(Some("강원특별자치도 춘천시")).as_deref(),
            Some("강원도")
        );
        assert_eq!(derive_region(Some("경기 수원시")).as_deref(), Some("경기도"));
    }

    #[test]
    fn longest_prefix_wins_over_short_form() {
        assert_eq!(
            derive_region(Some("전북특별자치도 군산시")).as_deref(),
            Some("전북특별자치도")
        );
        assert_eq!(
            derive_region(Some("세종특별자치시 한누리대로")).as_deref(),
            Some("세종특별자치시")
        );
    }

    #[test]
    fn unknown_address_falls_back_to_leading_substring() {
        assert_eq!(derive_region(Some("미상지역 어딘가")).as_deref(), Some("미상지"));
        assert_eq!(derive_region(Some("산속")).as_deref(), Some("산속"));
        assert_eq!(derive_region(Some("   ")), None);
        assert_eq!(derive_region(None), None);
    }

    #[test]
    fn known_region_accepts_short_and_canonical_names() {
        assert_eq!(known_region("서울"), Some("서울특별시"));
        assert_eq!(known_region("제주특별자치도"), Some("제주특별자치도"));
        assert_eq!(known_region("Atlantis"), None);
    }

    #[test]
    fn source_timestamps_are_read_as_kst() {
        let parsed = parse_source_timestamp("202405201000").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-05-20T01:00:00+00:00");
        let with_seps = parse_source_timestamp("2024-05-20 10:00:30").unwrap();
        assert_eq!(with_seps.to_rfc3339(), "2024-05-20T01:00:30+00:00");
        assert!(parse_source_timestamp("2024-05").is_none());
        assert!(parse_source_timestamp("").is_none());
    }

    #[test]
    fn from_record_drops_non_positive_prices_and_derives_fields() {
        let record = ListingRecord {
            item_no: Some("1234567".into()),
            legal_address: Some("부산광역시 해운대구".into()),
            min_bid_price: Some(0),
            appraised_average: Some(5_000_000),
            bid_end_time: Some("203001011200".into()),
            ..Default::default()
        };
        let now = Utc::now();
        let item = CatalogItem::from_record("1234567", &record, now);
        assert_eq!(item.min_bid_price, None);
        assert_eq!(item.appraised_average, Some(5_000_000));
        assert_eq!(item.region.as_deref(), Some("부산광역시"));
        assert!(item.is_new);
        assert!(item.is_active);
        assert_eq!(item.view_count, 0);
    }

    #[test]
    fn past_auction_still_starts_active() {
        let record = ListingRecord {
            item_no: Some("7654321".into()),
            bid_end_time: Some("202001011000".into()),
            ..Default::default()
        };
        let item = CatalogItem::from_record("7654321", &record, Utc::now());
        assert!(item.bid_end_at.is_some_and(|end| end < Utc::now()));
        assert!(item.is_active);
    }

    #[test]
    fn notification_kind_serializes_as_wire_names() {
        let json = serde_json::to_string(&NotificationKind::PriceDrop).unwrap();
        assert_eq!(json, "\"PRICE_DROP\"");
        assert_eq!(NotificationKind::parse("deadline"), Some(NotificationKind::Deadline));
        assert_eq!(NotificationKind::parse("other"), None);
    }
}
