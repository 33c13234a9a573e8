use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use content_jobs::config;
use content_jobs::db;
use content_jobs::gateway::HttpGateway;
use content_jobs::schedule::ScheduleProcessor;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Publish every due schedule once and exit (for cron)"
)]
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
    let scheduler = ScheduleProcessor::new(pool.clone(), gateway.publishers(), Arc::new(gateway))
        .with_lease_ttl(cfg.lease_ttl());

    let report = scheduler.tick().await?;
    let counts = db::schedule_counts(&pool).await?;
    info!(
        eligible = report.eligible,
        completed = report.completed,
        failed = report.failed,
        skipped = report.skipped,
        errors = report.errors,
        pending = counts.pending,
        leased = counts.leased,
        "tick finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
