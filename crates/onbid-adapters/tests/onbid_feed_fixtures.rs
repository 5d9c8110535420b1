use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use onbid_adapters::{
    filter_region, parse_listing_xml, AdapterError, ListingSource, OnbidClient, OnbidClientConfig,
};
use onbid_core::FeedKind;
use onbid_storage::{HttpClientConfig, HttpFetcher};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use uuid::Uuid;

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn fixture(name: &str) -> String {
    let path = workspace_root().join("fixtures/onbid").join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

#[test]
fn usage_page_decodes_every_item() {
    let page = parse_listing_xml(&fixture("usage_seoul_page1.xml")).unwrap();
    assert_eq!(page.total_count, Some(4));
    assert_eq!(page.records.len(), 4);

    let first = &page.records[0];
    assert_eq!(first.item_no.as_deref(), Some("1733201"));
    assert_eq!(first.public_notice_no.as_deref(), Some("812345"));
    assert_eq!(first.management_no.as_deref(), Some("2024-05412-001"));
    assert_eq!(first.category_name.as_deref(), Some("부동산 / 주거용건물 / 아파트"));
    assert_eq!(first.min_bid_price, Some(612_000_000));
    assert_eq!(first.appraised_average, Some(765_000_000));
    assert_eq!(first.bid_end_time.as_deref(), Some("203005221700"));
    assert_eq!(first.failed_bid_count, Some(1));
    assert_eq!(first.source_query_count, Some(348));
}

#[test]
fn negative_price_is_absent_and_missing_tags_are_none() {
    let page = parse_listing_xml(&fixture("usage_seoul_page1.xml")).unwrap();

    let negative = &page.records[1];
    assert_eq!(negative.min_bid_price, None);
    assert_eq!(negative.appraised_average, Some(420_500_000));

    let sparse = &page.records[2];
    assert_eq!(sparse.management_no, None);
    assert_eq!(sparse.status, None);
    assert_eq!(sparse.failed_bid_count, None);

    assert_eq!(page.records[3].item_no, None);
    assert_eq!(page.records[3].natural_key(), None);
}

#[test]
fn region_filter_drops_busan_item_from_seoul_query() {
    let page = parse_listing_xml(&fixture("usage_seoul_page1.xml")).unwrap();
    let kept = filter_region("서울특별시", page.records);
    let keys: Vec<_> = kept.iter().map(|r| r.item_no.clone()).collect();
    assert_eq!(
        keys,
        vec![
            Some("1733201".to_string()),
            Some("1733202".to_string()),
            None
        ]
    );
}

#[test]
fn empty_items_element_is_an_empty_page() {
    let page = parse_listing_xml(&fixture("empty_page.xml")).unwrap();
    assert!(page.records.is_empty());
    assert_eq!(page.total_count, Some(612));
}

#[test]
fn error_result_codes_are_decode_failures() {
    match parse_listing_xml(&fixture("error_result_code.xml")) {
        Err(AdapterError::ResultCode { code, message }) => {
            assert_eq!(code, "99");
            assert!(message.contains("INVALID REQUEST"));
        }
        other => panic!("expected result code error, got {other:?}"),
    }
    match parse_listing_xml(&fixture("gateway_key_error.xml")) {
        Err(AdapterError::ResultCode { code, message }) => {
            assert_eq!(code, "30");
            assert_eq!(message, "SERVICE_KEY_IS_NOT_REGISTERED_ERROR");
        }
        other => panic!("expected gateway error, got {other:?}"),
    }
}

#[test]
fn truncated_payload_is_rejected() {
    let body = fixture("usage_seoul_page1.xml");
    let cut = &body[..body.find("</item>").unwrap_or(body.len() / 2)];
    assert!(matches!(parse_listing_xml(cut), Err(AdapterError::Decode(_))));
    assert!(matches!(parse_listing_xml("   "), Err(AdapterError::Decode(_))));
}

#[tokio::test]
async fn unreachable_feed_degrades_to_empty_page() {
    let http = Arc::new(
        HttpFetcher::new(HttpClientConfig {
            connect_timeout: Duration::from_secs(2),
            timeout: Duration::from_secs(3),
            ..Default::default()
        })
        .unwrap(),
    );
    let client = OnbidClient::new(
        OnbidClientConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            service_key: "test-key".to_string(),
        },
        http,
    );

    let page = client
        .fetch_page(Some("서울특별시"), 1, 10, FeedKind::General)
        .await
        .unwrap();
    assert!(page.is_exhausted());
    assert!(client
        .request_page(Some("서울특별시"), 1, 10, FeedKind::General)
        .await
        .is_err());
}

const BUSAN_ONLY_PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<response>
  <header><resultCode>00</resultCode><resultMsg>NORMAL SERVICE.</resultMsg></header>
  <body>
    <items>
      <item><CLTR_NO>200</CLTR_NO><LDNM_ADRS>부산광역시 중구 중앙동 1</LDNM_ADRS></item>
      <item><CLTR_NO>201</CLTR_NO><LDNM_ADRS>부산광역시 동구 초량동 2</LDNM_ADRS></item>
    </items>
    <totalCount>6</totalCount>
  </body>
</response>"#;

/// Answers every request with `body` and returns the base URL.
async fn serve_xml(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut seen = Vec::new();
                while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => seen.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/xml; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn out_of_region_page_is_returned_undropped() {
    let base_url = serve_xml(BUSAN_ONLY_PAGE).await;
    let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
    let client = OnbidClient::new(
        OnbidClientConfig {
            base_url,
            service_key: "test-key".to_string(),
        },
        http,
    );

    let page = client
        .fetch_page(Some("서울특별시"), 2, 10, FeedKind::General)
        .await
        .unwrap();
    assert_eq!(page.records.len(), 2);
    assert_eq!(page.total_count, Some(6));
    assert!(!page.is_exhausted());
    assert!(page.in_region("서울특별시").is_empty());
}

#[tokio::test]
async fn fetched_response_reports_status_and_final_url() {
    let base_url = serve_xml(BUSAN_ONLY_PAGE).await;
    let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
    let query = OnbidClient::page_query(None, 3, 50);

    let response = http
        .fetch_text(Uuid::new_v4(), "general", &format!("{base_url}/feed"), &query)
        .await
        .unwrap();
    assert_eq!(response.status.as_u16(), 200);
    assert!(response.final_url.starts_with(&base_url));
    assert!(response.final_url.contains("pageNo=3"));
    assert!(!response.final_url.contains("SIDO"));
    assert!(response.body.contains("<CLTR_NO>200</CLTR_NO>"));
}
