use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use content_jobs::batch::BatchProcessor;
use content_jobs::config;
use content_jobs::db;
use content_jobs::gateway::HttpGateway;
use content_jobs::quota::PlanQuotaGate;
use content_jobs::schedule::ScheduleProcessor;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let gateway = HttpGateway::from_config(&cfg)?;

    // Batches interrupted by a previous shutdown pick up where they stopped.
    let batches = BatchProcessor::new(
        pool.clone(),
        Arc::new(PlanQuotaGate::new(pool.clone())),
        gateway.providers(),
        Arc::new(gateway.clone()),
    )
    .with_default_model(cfg.generation.default_model)
    .with_max_articles(cfg.generation.max_bulk_articles);
    if let Err(err) = batches.resume_unfinished().await {
        error!(%err, "failed to resume unfinished batches");
    }

    let scheduler = ScheduleProcessor::new(pool, gateway.publishers(), Arc::new(gateway))
        .with_lease_ttl(cfg.lease_ttl());

    info!("starting publish scheduler");
    scheduler
        .run(cfg.poll_interval(), async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(?err, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;

    Ok(())
}
