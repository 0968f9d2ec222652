use anyhow::{anyhow, Result};
use ats_sync::model::{RunSnapshot, SyncMode};
use ats_sync::runner::{RunSelector, SyncRunner};
use ats_sync::{config, db};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Operate Workable syncs: register organizations, run, inspect and cancel syncs.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an organization and print its id
    AddOrg {
        #[arg(long)]
        name: String,
    },
    /// Store Workable credentials for an organization
    Connect {
        #[arg(long)]
        org: i64,
        #[arg(long)]
        subdomain: String,
        /// Access token; falls back to WORKABLE_TOKEN
        #[arg(long, env = "WORKABLE_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Run a sync in the foreground; Ctrl-C requests cancellation
    Start {
        #[arg(long)]
        org: i64,
        /// metadata | full
        #[arg(long, default_value = "metadata")]
        mode: String,
        /// Only sync the job with this shortcode or id
        #[arg(long)]
        job: Option<String>,
    },
    /// Print a run snapshot as JSON
    Status(Target),
    /// Request cancellation of a running sync
    Cancel(Target),
}

#[derive(ClapArgs, Debug)]
struct Target {
    /// Run id
    #[arg(long, conflicts_with = "org")]
    run: Option<i64>,
    /// Latest run of this organization
    #[arg(long)]
    org: Option<i64>,
}

impl Target {
    fn selector(&self) -> Result<RunSelector> {
        match (self.run, self.org) {
            (Some(id), _) => Ok(RunSelector::Run(id)),
            (None, Some(org)) => Ok(RunSelector::LatestForOrg(org)),
            (None, None) => Err(anyhow!("pass --run or --org")),
        }
    }
}

fn print_snapshot(run: &RunSnapshot) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(run)?);
    Ok(())
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
    let poll = Duration::from_millis(cfg.app.poll_interval_ms);

    match args.command {
        Command::AddOrg { name } => {
            let id = db::create_organization(&pool, &name).await?;
            println!("{id}");
        }
        Command::Connect {
            org,
            subdomain,
            token,
        } => {
            if !db::connect_organization(&pool, org, &subdomain, &token).await? {
                return Err(anyhow!("organization {org} not found"));
            }
            println!("organization {org} connected to {subdomain}");
        }
        Command::Start { org, mode, job } => {
            let mode = SyncMode::parse(&mode).ok_or_else(|| anyhow!("unknown mode {mode}"))?;
            let runner = SyncRunner::with_workable(pool, cfg);
            let run_id = runner.start(org, mode, job.as_deref()).await?;
            eprintln!("run {run_id} started");
            let run = tokio::select! {
                run = runner.wait(run_id, poll) => run?,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("cancelling run {run_id}");
                    runner.request_cancel(RunSelector::Run(run_id)).await?;
                    runner.wait(run_id, poll).await?
                }
            };
            print_snapshot(&run)?;
        }
        Command::Status(target) => {
            let runner = SyncRunner::with_workable(pool, cfg);
            print_snapshot(&runner.status(target.selector()?).await?)?;
        }
        Command::Cancel(target) => {
            let runner = SyncRunner::with_workable(pool, cfg);
            print_snapshot(&runner.request_cancel(target.selector()?).await?)?;
        }
    }
    Ok(())
}
