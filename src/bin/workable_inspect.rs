use anyhow::{anyhow, Result};
use ats_sync::attachments;
use ats_sync::workable::payload::{
    candidate_id, candidate_stage, extract_email, job_state, job_title, JobIdentifiers,
};
use ats_sync::workable::score::extract_workable_score;
use ats_sync::workable::WorkableClient;
use ats_sync::{config, db};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Talk to an organization's Workable account using its stored credentials.
#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Organization id
    #[arg(long)]
    org: i64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List jobs across the configured state filters
    Jobs,
    /// List candidates of one job
    Candidates {
        /// Job shortcode or id
        #[arg(long)]
        job: String,
        #[arg(long)]
        max_pages: Option<usize>,
    },
    /// Show one candidate with its extracted score
    Candidate {
        #[arg(long)]
        id: String,
    },
    /// Download a candidate's resume under the data directory
    Resume {
        #[arg(long)]
        id: String,
    },
    /// Post an activity (JSON body) to a candidate's timeline
    Activity {
        #[arg(long)]
        id: String,
        #[arg(long)]
        body: String,
    },
    /// Move a candidate to another pipeline stage
    Stage {
        #[arg(long)]
        id: String,
        #[arg(long)]
        stage: String,
    },
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
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let creds = db::fetch_credentials(&pool, args.org)
        .await?
        .ok_or_else(|| anyhow!("organization {} not found", args.org))?;
    let (subdomain, token) = creds
        .usable()
        .ok_or_else(|| anyhow!("organization {} is not connected to Workable", args.org))?;
    let client = WorkableClient::from_config(&cfg.workable, subdomain, token)?;

    match args.command {
        Command::Jobs => {
            for job in client.list_open_jobs().await? {
                println!(
                    "{}\t{}\t{}",
                    JobIdentifiers::from_job(&job),
                    job_state(&job).unwrap_or_default(),
                    job_title(&job).unwrap_or_default()
                );
            }
        }
        Command::Candidates { job, max_pages } => {
            let ids = JobIdentifiers::new([job]);
            for c in client.list_job_candidates(&ids, true, max_pages).await? {
                println!(
                    "{}\t{}\t{}",
                    candidate_id(&c).unwrap_or_default(),
                    candidate_stage(&c).unwrap_or_default(),
                    extract_email(&c).unwrap_or_else(|| "-".into())
                );
            }
        }
        Command::Candidate { id } => {
            let candidate = client
                .get_candidate(&id)
                .await?
                .ok_or_else(|| anyhow!("candidate {id} not found"))?;
            let ratings = client.get_candidate_ratings(&id).await;
            println!("{}", serde_json::to_string_pretty(&candidate)?);
            match extract_workable_score(&candidate, ratings.as_ref()) {
                Some(score) => println!(
                    "score: raw={} normalized={:?} source={}",
                    score.raw, score.normalized, score.source
                ),
                None => println!("score: none"),
            }
        }
        Command::Resume { id } => {
            let candidate = client
                .get_candidate(&id)
                .await?
                .ok_or_else(|| anyhow!("candidate {id} not found"))?;
            let (name, bytes) = client
                .download_candidate_resume(&candidate)
                .await
                .ok_or_else(|| anyhow!("no downloadable resume for candidate {id}"))?;
            let path =
                attachments::store_resume(&cfg.app.data_dir, args.org, &id, &name, &bytes).await?;
            println!("{}", path.display());
        }
        Command::Activity { id, body } => {
            let body: serde_json::Value = serde_json::from_str(&body)?;
            let res = client.post_candidate_activity(&id, &body).await?;
            println!("{}", serde_json::to_string_pretty(&res)?);
        }
        Command::Stage { id, stage } => {
            client.update_candidate_stage(&id, &stage).await?;
            println!("candidate {id} moved to {stage}");
        }
    }
    Ok(())
}
