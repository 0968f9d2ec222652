use anyhow::Result;
use ats_sync::runner::SyncRunner;
use ats_sync::{config, db};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "Periodic Workable pull-sync daemon")]
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

    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
    let runner = SyncRunner::with_workable(pool, cfg);

    info!("starting sync scheduler");
    loop {
        match runner.reclaim_stale_runs("abandoned: no progress recorded").await {
            Ok(failed) if !failed.is_empty() => warn!(runs = ?failed, "failed stale sync runs"),
            Ok(_) => {}
            Err(err) => error!(?err, "stale run check failed"),
        }
        match runner.start_due().await {
            Ok(started) if !started.is_empty() => info!(runs = ?started, "scheduled syncs started"),
            Ok(_) => {}
            Err(err) => error!(?err, "scheduler tick failed"),
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(poll_sleep) => {}
        }
    }

    info!("shutting down; cancelling in-flight syncs");
    runner.shutdown(Duration::from_secs(30)).await;
    Ok(())
}
