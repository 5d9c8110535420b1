//! Axum JSON surface over the catalog service.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use onbid_core::{NotificationKind, ViewerContext};
use onbid_sync::{CatalogService, DEFAULT_TOP_LIMIT};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "onbid-web";

const DEFAULT_SEARCH_LIMIT: usize = 20;
const DEFAULT_NOTICE_LIMIT: usize = 20;
const MEMBER_ID_HEADER: &str = "x-member-id";

#[derive(Clone)]
pub struct AppState {
    pub service: CatalogService,
}

impl AppState {
    pub fn new(service: CatalogService) -> Self {
        Self { service }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ItemsQuery {
    region: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: String,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct TopQuery {
    by: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct NoticeQuery {
    kind: Option<String>,
    limit: Option<usize>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/items", get(active_items_handler))
        .route("/items/search", get(search_handler))
        .route("/items/new", get(new_items_handler))
        .route("/items/half-off", get(half_off_handler))
        .route("/items/closing-today", get(closing_today_handler))
        .route("/items/top", get(top_handler))
        .route("/items/{key}", get(item_handler))
        .route("/items/{key}/views", post(view_handler))
        .route(
            "/items/{key}/interest",
            post(add_interest_handler).delete(remove_interest_handler),
        )
        .route("/notifications", get(notifications_handler))
        .route("/sync", post(sync_handler))
        .route("/monitor", post(monitor_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(service: CatalogService, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web server listening");
    axum::serve(listener, app(AppState::new(service))).await?;
    Ok(())
}

async fn active_items_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ItemsQuery>,
) -> Response {
    match state.service.get_active(query.region.as_deref()).await {
        Ok(items) => Json(items).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    match state.service.search(&query.q, limit).await {
        Ok(items) => Json(items).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn new_items_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ItemsQuery>,
) -> Response {
    match state.service.get_new(query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT)).await {
        Ok(items) => Json(items).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn half_off_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ItemsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    match state.service.get_half_off(query.region.as_deref(), limit).await {
        Ok(items) => Json(items).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn closing_today_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.service.get_closing_today().await {
        Ok(items) => Json(items).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn top_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TopQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_TOP_LIMIT);
    let result = match query.by.as_deref().unwrap_or("views") {
        "views" => state.service.top_by_views(limit).await,
        "interest" => state.service.top_by_interest(limit).await,
        other => {
            return bad_request(format!("unknown ordering {other:?}; use views or interest"));
        }
    };
    match result {
        Ok(items) => Json(items).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn item_handler(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    match state.service.get_by_key(&key).await {
        Ok(Some(item)) => Json(item).into_response(),
        Ok(None) => not_found(&key),
        Err(err) => server_error(err.into()),
    }
}

/// Records one raw hit; the path segment is the row id, not the item number.
async fn view_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Ok(id) = Uuid::parse_str(&key) else {
        return bad_request(format!("{key:?} is not an item id"));
    };
    match state.service.increment_view(id, &viewer_from_headers(&headers)).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found(&key),
        Err(err) => server_error(err.into()),
    }
}

async fn add_interest_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Response {
    match state.service.increment_interest(&key).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found(&key),
        Err(err) => server_error(err.into()),
    }
}

async fn remove_interest_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Response {
    match state.service.decrement_interest(&key).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => not_found(&key),
        Err(err) => server_error(err.into()),
    }
}

async fn notifications_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NoticeQuery>,
) -> Response {
    let raw = query.kind.as_deref().unwrap_or("NEW");
    let Some(kind) = NotificationKind::parse(raw) else {
        return bad_request(format!("unknown notification kind {raw:?}"));
    };
    let limit = query.limit.unwrap_or(DEFAULT_NOTICE_LIMIT);
    match state.service.get_notifications(kind, limit).await {
        Ok(notices) => Json(notices).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn sync_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.service.trigger_manual_sync().await {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => server_error(err),
    }
}

async fn monitor_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.service.trigger_price_monitor().await {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => server_error(err),
    }
}

fn viewer_from_headers(headers: &HeaderMap) -> ViewerContext {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(ToString::to_string)
    };
    ViewerContext {
        member_id: text(MEMBER_ID_HEADER),
        ip_address: text("x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string())),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string),
    }
}

fn not_found(key: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("no catalog item {key}") })),
    )
        .into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}
