use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use onbid_sync::{
    build_scheduler, build_service, CadenceKind, CadenceOutcome, CatalogService, StoreBackend,
    SyncConfig,
};
use tokio_cron_scheduler::JobScheduler;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "onbid-cli")]
#[command(about = "Onbid auction catalog sync and alerting")]
struct Cli {
    /// Use a throwaway in-process store instead of PostgreSQL.
    #[arg(long, global = true)]
    in_memory: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the full cadence once.
    Sync,
    /// Check watched items for price drops and send alerts.
    Monitor,
    /// Sweep expired rows and apply retention.
    Maintain,
    /// Write today's counter snapshot.
    Stats,
    Migrate,
    /// Run every enabled cadence on its cron until Ctrl-C.
    Schedule,
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let backend = if cli.in_memory {
        StoreBackend::InMemory
    } else {
        StoreBackend::Postgres
    };
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let service = build_service(&config, backend).await?;
            report(service.scheduler().run_cadence(CadenceKind::Full).await?);
        }
        Commands::Monitor => {
            let service = build_service(&config, backend).await?;
            report(CadenceOutcome::Monitor(service.trigger_price_monitor().await?));
        }
        Commands::Maintain => {
            let service = build_service(&config, backend).await?;
            report(service.scheduler().run_cadence(CadenceKind::Maintenance).await?);
        }
        Commands::Stats => {
            let service = build_service(&config, backend).await?;
            report(service.scheduler().run_cadence(CadenceKind::Stats).await?);
        }
        Commands::Migrate => {
            onbid_sync::run_migrations_from_env().await?;
            println!("migrations applied");
        }
        Commands::Schedule => {
            let service = build_service(&config, backend).await?;
            let mut sched = start_scheduler(&service).await?;
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("shutting down scheduler");
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Serve => {
            let service = build_service(&config, backend).await?;
            let _sched = if config.scheduler_enabled {
                Some(start_scheduler(&service).await?)
            } else {
                None
            };
            onbid_web::serve(service, config.web_port).await?;
        }
    }

    Ok(())
}

async fn start_scheduler(service: &CatalogService) -> Result<JobScheduler> {
    let sched = build_scheduler(Arc::clone(service.scheduler())).await?;
    sched.start().await.context("starting scheduler")?;
    info!("scheduler started");
    Ok(sched)
}

fn report(outcome: CadenceOutcome) {
    match outcome {
        CadenceOutcome::Sync(summary) => println!(
            "sync complete: run_id={} cadence={} saved={}/{} regions_failed={} pages={} notices={}",
            summary.run_id,
            summary.cadence.as_str(),
            summary.batch.saved,
            summary.batch.total_requested,
            summary.regions_failed,
            summary.pages_fetched,
            summary.notices_created
        ),
        CadenceOutcome::Maintenance(report) => {
            for step in &report.steps {
                match (&step.affected, &step.error) {
                    (Some(n), _) => println!("{}: {n}", step.name),
                    (None, Some(err)) => println!("{}: failed ({err})", step.name),
                    (None, None) => println!("{}: -", step.name),
                }
            }
            println!("maintenance complete: run_id={} failed_steps={}", report.run_id, report.failed_steps());
        }
        CadenceOutcome::Stats(stats) => println!(
            "stats snapshot complete: date={} rows={}",
            stats.stat_date, stats.snapshots
        ),
        CadenceOutcome::Monitor(summary) => println!(
            "price monitor complete: run_id={} watches={} alerts={} already_alerted={} failures={}",
            summary.run_id,
            summary.watches_checked,
            summary.alerts_sent,
            summary.already_alerted,
            summary.failures
        ),
    }
}
