//! Sync pipeline for the Onbid auction catalog: cadence scheduling, notice
//! generation and the price-drop monitor.

use std::sync::Arc;

use anyhow::{Context, Result};
use onbid_adapters::OnbidClient;
use onbid_storage::{HttpFetcher, MemoryStore, PgStore};
use tracing::{info, warn};

mod config;
mod mail;
mod monitor;
mod notices;
mod scheduler;
mod service;
#[cfg(test)]
mod testing;

pub use config::{
    parse_region_list, CadenceKind, CadencePlan, FeedPlan, SyncConfig, SyncPlan,
    DEFAULT_MAIL_API_URL,
};
pub use mail::{send_with_retry, HttpMailer, LogMailer, MailError, Mailer};
pub use monitor::{
    compose_price_drop_mail, format_won, MonitorError, MonitorSettings, MonitorSummary,
    PriceMonitor,
};
pub use notices::{
    deadline_key, new_item_key, price_drop_key, NotificationGenerator, NOTICE_TTL_DAYS,
};
pub use scheduler::{
    build_scheduler, CadenceOutcome, MaintenanceReport, MaintenanceStep, Repositories,
    StatsReport, SyncRunSummary, SyncScheduler, NOTICE_HIDE_AFTER_DAYS,
    PRICE_ALERT_RETENTION_DAYS, STATS_RETENTION_DAYS, VIEW_LOG_RETENTION_DAYS,
};
pub use service::{CatalogService, DEFAULT_TOP_LIMIT};

pub const CRATE_NAME: &str = "onbid-sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    InMemory,
}

/// Brevo-style HTTP delivery when an API key is configured, log-only otherwise.
pub fn mailer_from_config(config: &SyncConfig) -> Arc<dyn Mailer> {
    match &config.mail_api_key {
        Some(key) => Arc::new(HttpMailer::new(
            config.mail_api_url.clone(),
            key.clone(),
            config.mail_sender.clone(),
        )),
        None => {
            warn!("no mail API key configured; price alerts will only be logged");
            Arc::new(LogMailer)
        }
    }
}

pub async fn repositories_for(config: &SyncConfig, backend: StoreBackend) -> Result<Repositories> {
    Ok(match backend {
        StoreBackend::Postgres => {
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            Repositories::from_store(Arc::new(store))
        }
        StoreBackend::InMemory => Repositories::from_store(Arc::new(MemoryStore::new())),
    })
}

/// Wire the live Onbid client, the configured store and mailer into a service.
pub async fn build_service(config: &SyncConfig, backend: StoreBackend) -> Result<CatalogService> {
    let plan = config.load_plan().await?;
    let repos = repositories_for(config, backend).await?;
    let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
    let source = Arc::new(OnbidClient::new(config.onbid_client_config(), http));
    if config.service_key.is_empty() {
        warn!("ONBID_API_SERVICE_KEY is empty; feed requests will be rejected upstream");
    }
    let scheduler = SyncScheduler::new(plan, repos, source, mailer_from_config(config));
    info!(regions = scheduler.plan().regions.len(), ?backend, "catalog service ready");
    Ok(CatalogService::new(Arc::new(scheduler)))
}

pub async fn run_sync_once_from_env(backend: StoreBackend) -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env();
    let service = build_service(&config, backend).await?;
    service.trigger_manual_sync().await
}

pub async fn run_migrations_from_env() -> Result<()> {
    let config = SyncConfig::from_env();
    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    store.migrate().await.context("applying migrations")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_mailer_is_used_without_a_key() {
        let mut config = SyncConfig::from_env();
        config.mail_api_key = None;
        let mailer = mailer_from_config(&config);
        mailer.send("a@example.com", "subject", "body").await.unwrap();
    }

    #[tokio::test]
    async fn in_memory_service_builds_from_config() {
        let mut config = SyncConfig::from_env();
        config.plan_file = None;
        config.regions = vec!["경기도".to_string()];
        let service = build_service(&config, StoreBackend::InMemory).await.unwrap();
        assert_eq!(service.scheduler().plan().regions, vec!["경기도"]);
        assert!(service.get_active(None).await.unwrap().is_empty());
    }
}
