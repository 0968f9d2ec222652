//! Pull sync: jobs -> per-job candidates -> candidate/application upserts.
//!
//! One run is strictly sequential. Progress is checkpointed to the run ledger
//! and mirrored onto the organization row; everything upserted before a crash
//! is already committed. Cancellation is cooperative and checked before each
//! job and each candidate.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::attachments;
use crate::config::Config;
use crate::db::{self, ApplicationUpsert, CandidateUpsert, Pool, RoleUpsert};
use crate::model::{
    LastSyncSummary, ProgressSnapshot, RunCounters, RunPhase, RunStatus, SyncMode,
};
use crate::workable::payload::{
    candidate_id, candidate_stage, extract_email, is_terminal_stage, job_state, job_title,
    render_job_spec, CandidateProfile, JobIdentifiers,
};
use crate::workable::score::extract_workable_score;
use crate::workable::{WorkableApi, WorkableError};

/// One claimed run to execute.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub org_id: i64,
    pub run_id: i64,
    pub mode: SyncMode,
    pub job_filter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub status: RunStatus,
    pub counters: RunCounters,
    pub errors: Vec<String>,
}

/// Failure of one job. Only `RateLimited` stops the run.
#[derive(Debug, Error)]
enum JobError {
    #[error("{0}")]
    RateLimited(WorkableError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<WorkableError> for JobError {
    fn from(err: WorkableError) -> Self {
        if err.is_rate_limited() {
            JobError::RateLimited(err)
        } else {
            JobError::Other(err.into())
        }
    }
}

enum JobFlow {
    Done,
    Cancelled,
}

/// Mutable state of one run.
struct RunState {
    run_id: i64,
    phase: RunPhase,
    counters: RunCounters,
    errors: Vec<String>,
    upserted_candidates: HashSet<i64>,
    details_cache: HashMap<String, Option<Value>>,
    since_checkpoint: u32,
}

impl RunState {
    fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            run_id: self.run_id,
            phase: self.phase.as_str().to_string(),
            counters: self.counters,
            errors: self.errors.len(),
        }
    }
}

pub struct Orchestrator<'a> {
    pool: &'a Pool,
    api: &'a dyn WorkableApi,
    config: &'a Config,
    cancel: CancellationToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        pool: &'a Pool,
        api: &'a dyn WorkableApi,
        config: &'a Config,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            api,
            config,
            cancel,
        }
    }

    /// Execute the run and finalize its ledger row. Only storage failures and
    /// non-rate-limit failures of the job listing (bad token, unreachable
    /// host) are returned as errors; the executor stamps those as `failed`.
    #[instrument(skip_all, fields(org_id = req.org_id, run_id = req.run_id))]
    pub async fn run(&self, req: &SyncRequest) -> Result<SyncOutcome> {
        if req.mode == SyncMode::Full {
            info!("full mode requested; running metadata sync");
        }
        let mut state = RunState {
            run_id: req.run_id,
            phase: RunPhase::ListingJobs,
            counters: RunCounters::default(),
            errors: Vec::new(),
            upserted_candidates: HashSet::new(),
            details_cache: HashMap::new(),
            since_checkpoint: 0,
        };
        db::begin_org_progress(self.pool, req.org_id, Utc::now(), &state.progress()).await?;
        self.checkpoint(req.org_id, &mut state).await?;

        let cancelled = self.sync_jobs(req, &mut state).await?;
        self.finalize(req.org_id, state, cancelled).await
    }

    /// Returns whether the loop was interrupted by cancellation.
    async fn sync_jobs(&self, req: &SyncRequest, state: &mut RunState) -> Result<bool> {
        let mut jobs = match self.api.list_open_jobs().await {
            Ok(jobs) => jobs,
            Err(err) if err.is_rate_limited() => {
                warn!(?err, "rate limited while listing jobs");
                state.errors.push(format!("rate limited while listing jobs: {err}"));
                return Ok(false);
            }
            Err(err) => return Err(anyhow::Error::from(err).context("failed to list Workable jobs")),
        };

        if let Some(filter) = req.job_filter.as_deref() {
            jobs.retain(|job| JobIdentifiers::from_job(job).contains(filter));
        }
        state.counters.jobs_total = jobs.len() as i64;
        info!(jobs = jobs.len(), "jobs listed");

        if jobs.is_empty() {
            let msg = match req.job_filter.as_deref() {
                Some(filter) => format!("no Workable job matched filter '{filter}'"),
                None => "Workable returned no jobs; check that the token has the r_jobs and r_candidates scopes".to_string(),
            };
            state.errors.push(msg);
            return Ok(false);
        }

        for job in &jobs {
            if self.should_stop(state.run_id).await? {
                info!("cancellation requested; stopping before next job");
                return Ok(true);
            }
            match self.sync_job(req.org_id, state, job).await {
                Ok(JobFlow::Done) => state.counters.jobs_processed += 1,
                Ok(JobFlow::Cancelled) => {
                    info!("cancellation requested; stopping mid-job");
                    return Ok(true);
                }
                Err(JobError::RateLimited(err)) => {
                    warn!(?err, "rate limit exhausted; stopping run early");
                    state.errors.push(format!("rate limited: {err}"));
                    return Ok(false);
                }
                Err(JobError::Other(err)) => {
                    let ids = JobIdentifiers::from_job(job);
                    warn!(?err, job = %ids, "job sync failed; continuing");
                    state.errors.push(format!("job {ids}: {err:#}"));
                    state.counters.jobs_processed += 1;
                }
            }
            self.checkpoint(req.org_id, state).await?;
        }
        Ok(false)
    }

    async fn sync_job(
        &self,
        org_id: i64,
        state: &mut RunState,
        job: &Value,
    ) -> Result<JobFlow, JobError> {
        let ids = JobIdentifiers::from_job(job);
        let primary = ids
            .primary()
            .ok_or_else(|| anyhow!("job has no shortcode, id or url"))?
            .to_string();

        let details = self.job_details(state, &ids).await?;
        let merged = merge_job(job, details.as_ref());
        let title = job_title(&merged).unwrap_or_else(|| format!("Job {primary}"));
        let spec = render_job_spec(&title, &merged);
        let spec_path =
            match attachments::write_job_spec(&self.config.app.data_dir, org_id, &primary, &spec)
                .await
            {
                Ok(path) => Some(path.to_string_lossy().into_owned()),
                Err(err) => {
                    warn!(?err, job = %ids, "failed to write job spec file");
                    None
                }
            };
        let remote_state = job_state(&merged);
        let role_id = db::upsert_role(
            self.pool,
            &RoleUpsert {
                organization_id: org_id,
                identifiers: &ids,
                name: &title,
                remote_state: remote_state.as_deref(),
                job_spec_text: Some(&spec),
                job_spec_file_path: spec_path.as_deref(),
            },
        )
        .await?;
        debug!(job = %ids, role_id, "role upserted");

        state.phase = RunPhase::ListingCandidates;
        self.checkpoint(org_id, state).await?;
        let max_pages = self.config.sync.candidate_max_pages.map(|p| p as usize);
        let candidates = self.api.list_job_candidates(&ids, true, max_pages).await?;
        debug!(job = %ids, count = candidates.len(), "candidates listed");

        state.phase = RunPhase::SyncingCandidate;
        self.checkpoint(org_id, state).await?;
        for candidate in &candidates {
            if self.should_stop(state.run_id).await? {
                return Ok(JobFlow::Cancelled);
            }
            state.counters.candidates_seen += 1;
            self.sync_candidate(org_id, role_id, state, candidate).await?;

            state.since_checkpoint += 1;
            if state.since_checkpoint >= self.config.sync.checkpoint_every {
                self.checkpoint(org_id, state).await?;
            }
        }
        Ok(JobFlow::Done)
    }

    async fn sync_candidate(
        &self,
        org_id: i64,
        role_id: i64,
        state: &mut RunState,
        candidate: &Value,
    ) -> Result<(), JobError> {
        let external_id = candidate_id(candidate);
        if is_terminal_stage(candidate) {
            debug!(candidate = ?external_id, "skipping candidate in terminal stage");
            return Ok(());
        }
        let Some(email) = extract_email(candidate) else {
            debug!(candidate = ?external_id, "skipping candidate without email");
            return Ok(());
        };

        let profile = CandidateProfile::from_payload(candidate);
        let candidate_row = db::upsert_candidate(
            self.pool,
            &CandidateUpsert {
                organization_id: org_id,
                external_candidate_id: external_id.as_deref(),
                email: &email,
                profile: &profile,
            },
        )
        .await?;
        if state.upserted_candidates.insert(candidate_row) {
            state.counters.candidates_upserted += 1;
        }

        let ratings = match (&external_id, self.config.sync.fetch_ratings) {
            (Some(id), true) => self.api.get_candidate_ratings(id).await,
            _ => None,
        };
        let score = extract_workable_score(candidate, ratings.as_ref());
        let stage = candidate_stage(candidate);
        db::upsert_application(
            self.pool,
            &ApplicationUpsert {
                organization_id: org_id,
                candidate_id: candidate_row,
                role_id,
                stage: stage.as_deref(),
                score: score.as_ref(),
            },
        )
        .await?;
        state.counters.applications_upserted += 1;
        Ok(())
    }

    /// Details are fetched once per job; every identifier alias shares the
    /// cached result.
    async fn job_details(
        &self,
        state: &mut RunState,
        ids: &JobIdentifiers,
    ) -> Result<Option<Value>, JobError> {
        if let Some(hit) = ids.iter().find_map(|id| state.details_cache.get(id)) {
            return Ok(hit.clone());
        }
        let details = self.api.get_job_details(ids).await?;
        for id in ids.iter() {
            state.details_cache.insert(id.to_string(), details.clone());
        }
        Ok(details)
    }

    /// Fresh read of the durable cancel stamp, plus the in-process token.
    async fn should_stop(&self, run_id: i64) -> Result<bool> {
        if self.cancel.is_cancelled() {
            return Ok(true);
        }
        db::run_cancel_requested(self.pool, run_id).await
    }

    async fn checkpoint(&self, org_id: i64, state: &mut RunState) -> Result<()> {
        state.since_checkpoint = 0;
        db::checkpoint_run(
            self.pool,
            state.run_id,
            state.phase.as_str(),
            &state.counters,
            &state.errors,
        )
        .await?;
        db::update_org_progress(self.pool, org_id, &state.progress()).await
    }

    async fn finalize(&self, org_id: i64, state: RunState, cancelled: bool) -> Result<SyncOutcome> {
        let status = if cancelled {
            RunStatus::Cancelled
        } else if state.errors.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };
        let stamped =
            db::finish_run(self.pool, state.run_id, status, &state.counters, &state.errors)
                .await?;
        if !stamped {
            warn!("run was already finalized elsewhere");
        }
        db::clear_org_progress(self.pool, org_id).await?;
        db::write_last_sync(
            self.pool,
            org_id,
            Utc::now(),
            &LastSyncSummary {
                run_id: state.run_id,
                status,
                counters: state.counters,
                errors: state.errors.len(),
            },
        )
        .await?;
        info!(
            status = status.as_str(),
            jobs = state.counters.jobs_processed,
            candidates = state.counters.candidates_upserted,
            applications = state.counters.applications_upserted,
            errors = state.errors.len(),
            "sync finished"
        );
        Ok(SyncOutcome {
            status,
            counters: state.counters,
            errors: state.errors,
        })
    }
}

/// Listing entry overlaid with non-null detail fields.
fn merge_job(listing: &Value, details: Option<&Value>) -> Value {
    let mut merged = listing.clone();
    if let (Some(base), Some(Value::Object(extra))) = (merged.as_object_mut(), details) {
        for (k, v) in extra {
            if !v.is_null() {
                base.insert(k.clone(), v.clone());
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_prefers_detail_fields() {
        let listing = json!({ "shortcode": "AB12", "title": "Eng", "state": "published" });
        let details = json!({ "title": "Engineer", "description": "<p>x</p>", "state": null });
        let merged = merge_job(&listing, Some(&details));
        assert_eq!(merged["title"], "Engineer");
        assert_eq!(merged["state"], "published");
        assert_eq!(merged["description"], "<p>x</p>");
        assert_eq!(merge_job(&listing, None), listing);
    }

    #[test]
    fn only_rate_limit_is_fatal_for_the_run() {
        let rl: JobError = WorkableError::RateLimited { path: "/x".into() }.into();
        assert!(matches!(rl, JobError::RateLimited(_)));
        let other: JobError = WorkableError::InvalidUrl("bad".into()).into();
        assert!(matches!(other, JobError::Other(_)));
    }
}
