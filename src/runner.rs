//! Run executor and the caller-facing start / status / cancel surface.
//!
//! `start` claims the ledger row and spawns the orchestrator on the runtime.
//! Whatever the orchestrator does (returns, errors or panics), the executor
//! leaves the ledger row in a terminal status and clears the organization's
//! transient progress.

use anyhow::Result;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{self, Config};
use crate::db::{self, Pool};
use crate::model::{LastSyncSummary, RunSnapshot, RunStatus, SyncMode};
use crate::sync::{Orchestrator, SyncRequest};
use crate::workable::{WorkableApi, WorkableClient};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("organization {0} not found")]
    OrganizationNotFound(i64),
    #[error("organization {0} is not connected to Workable")]
    NotConnected(i64),
    #[error("organization {org_id} already has a sync in progress")]
    AlreadyRunning { org_id: i64, run_id: Option<i64> },
    #[error("sync run not found")]
    RunNotFound,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Which run a status or cancel call refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSelector {
    Run(i64),
    LatestForOrg(i64),
}

/// Builds the remote client for one organization's credentials.
pub trait ApiFactory: Send + Sync {
    fn connect(&self, subdomain: &str, access_token: &str) -> Result<Arc<dyn WorkableApi>>;
}

pub struct WorkableFactory {
    settings: config::Workable,
}

impl WorkableFactory {
    pub fn new(settings: config::Workable) -> Self {
        Self { settings }
    }
}

impl ApiFactory for WorkableFactory {
    fn connect(&self, subdomain: &str, access_token: &str) -> Result<Arc<dyn WorkableApi>> {
        let client = WorkableClient::from_config(&self.settings, subdomain, access_token)?;
        Ok(Arc::new(client))
    }
}

struct Inner {
    pool: Pool,
    config: Config,
    factory: Arc<dyn ApiFactory>,
    tokens: Mutex<HashMap<i64, CancellationToken>>,
}

#[derive(Clone)]
pub struct SyncRunner {
    inner: Arc<Inner>,
}

impl SyncRunner {
    pub fn new(pool: Pool, config: Config, factory: Arc<dyn ApiFactory>) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                config,
                factory,
                tokens: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn with_workable(pool: Pool, config: Config) -> Self {
        let factory = Arc::new(WorkableFactory::new(config.workable.clone()));
        Self::new(pool, config, factory)
    }

    /// Claim a run for the organization and execute it in the background.
    pub async fn start(
        &self,
        org_id: i64,
        mode: SyncMode,
        job_filter: Option<&str>,
    ) -> Result<i64, SyncError> {
        let (run_id, token, req) = self.claim(org_id, mode, job_filter).await?;
        let runner = self.clone();
        tokio::spawn(async move {
            runner.execute(req, token).await;
        });
        Ok(run_id)
    }

    /// Like `start`, but executes on the caller's task and returns the final
    /// snapshot.
    pub async fn run_to_completion(
        &self,
        org_id: i64,
        mode: SyncMode,
        job_filter: Option<&str>,
    ) -> Result<RunSnapshot, SyncError> {
        let (run_id, token, req) = self.claim(org_id, mode, job_filter).await?;
        self.execute(req, token).await;
        self.status(RunSelector::Run(run_id)).await
    }

    async fn claim(
        &self,
        org_id: i64,
        mode: SyncMode,
        job_filter: Option<&str>,
    ) -> Result<(i64, CancellationToken, SyncRequest), SyncError> {
        let pool = &self.inner.pool;
        if db::fetch_credentials(pool, org_id).await?.is_none() {
            return Err(SyncError::OrganizationNotFound(org_id));
        }
        let job_filter = job_filter
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string);

        let Some(run_id) = db::claim_run(pool, org_id, mode, job_filter.as_deref()).await? else {
            let active = db::latest_run_for_org(pool, org_id)
                .await?
                .filter(RunSnapshot::is_active)
                .map(|r| r.id);
            return Err(SyncError::AlreadyRunning {
                org_id,
                run_id: active,
            });
        };
        info!(org_id, run_id, mode = mode.as_str(), "sync run claimed");

        let token = CancellationToken::new();
        self.inner.tokens.lock().await.insert(run_id, token.clone());
        let req = SyncRequest {
            org_id,
            run_id,
            mode,
            job_filter,
        };
        Ok((run_id, token, req))
    }

    /// Run the orchestrator, then make sure the ledger row is terminal.
    pub async fn execute(&self, req: SyncRequest, token: CancellationToken) {
        let outcome = AssertUnwindSafe(self.orchestrate(&req, token))
            .catch_unwind()
            .await;
        let (status, failure) = match outcome {
            Ok(Ok(_)) => (RunStatus::Success, None),
            Ok(Err(err)) => {
                error!(?err, org_id = req.org_id, run_id = req.run_id, "sync run failed");
                (RunStatus::Failed, Some(format!("{err:#}")))
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!(org_id = req.org_id, run_id = req.run_id, panic = %msg, "sync run panicked");
                (RunStatus::Failed, Some(format!("sync crashed: {msg}")))
            }
        };

        self.finish(&req, status, failure.as_deref()).await;
        self.inner.tokens.lock().await.remove(&req.run_id);
    }

    async fn orchestrate(
        &self,
        req: &SyncRequest,
        token: CancellationToken,
    ) -> Result<crate::sync::SyncOutcome> {
        let pool = &self.inner.pool;
        let creds = db::fetch_credentials(pool, req.org_id)
            .await?
            .ok_or(SyncError::OrganizationNotFound(req.org_id))?;
        let (subdomain, access_token) = creds
            .usable()
            .ok_or(SyncError::NotConnected(req.org_id))?;
        let api = self.inner.factory.connect(subdomain, access_token)?;
        Orchestrator::new(pool, api.as_ref(), &self.inner.config, token)
            .run(req)
            .await
    }

    /// Stamp the run terminal if the orchestrator did not, then clear the
    /// organization's progress. Errors are logged; there is no caller left to
    /// report them to.
    async fn finish(&self, req: &SyncRequest, status: RunStatus, failure: Option<&str>) {
        let pool = &self.inner.pool;
        match db::stamp_run_terminal(pool, req.run_id, status, failure).await {
            Ok(true) => {
                warn!(run_id = req.run_id, status = status.as_str(), "run finalized by executor");
                if let Err(err) = self.write_summary(req).await {
                    error!(?err, run_id = req.run_id, "failed to write last sync summary");
                }
            }
            Ok(false) => {}
            Err(err) => error!(?err, run_id = req.run_id, "failed to finalize run"),
        }
        if let Err(err) = db::clear_org_progress(pool, req.org_id).await {
            error!(?err, org_id = req.org_id, "failed to clear sync progress");
        }
    }

    async fn write_summary(&self, req: &SyncRequest) -> Result<()> {
        let pool = &self.inner.pool;
        if let Some(run) = db::fetch_run(pool, req.run_id).await? {
            let summary = LastSyncSummary {
                run_id: run.id,
                status: run.status,
                counters: run.counters,
                errors: run.errors.len(),
            };
            db::write_last_sync(pool, req.org_id, chrono::Utc::now(), &summary).await?;
        }
        Ok(())
    }

    pub async fn status(&self, selector: RunSelector) -> Result<RunSnapshot, SyncError> {
        let pool = &self.inner.pool;
        let run = match selector {
            RunSelector::Run(id) => db::fetch_run(pool, id).await?,
            RunSelector::LatestForOrg(org_id) => db::latest_run_for_org(pool, org_id).await?,
        };
        run.ok_or(SyncError::RunNotFound)
    }

    /// Stamp the durable cancel request and trip the in-process token. A run
    /// that already finished is returned unchanged.
    pub async fn request_cancel(&self, selector: RunSelector) -> Result<RunSnapshot, SyncError> {
        let run = self.status(selector).await?;
        if !run.is_active() {
            return Ok(run);
        }
        if db::request_run_cancel(&self.inner.pool, run.id).await? {
            info!(run_id = run.id, org_id = run.organization_id, "cancellation requested");
        }
        if let Some(token) = self.inner.tokens.lock().await.get(&run.id) {
            token.cancel();
        }
        self.status(RunSelector::Run(run.id)).await
    }

    /// Poll until the run leaves `running`.
    pub async fn wait(&self, run_id: i64, poll: Duration) -> Result<RunSnapshot, SyncError> {
        loop {
            let run = self.status(RunSelector::Run(run_id)).await?;
            if !run.is_active() {
                return Ok(run);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Cancel every run spawned by this runner and wait up to `grace` for them
    /// to finalize.
    pub async fn shutdown(&self, grace: Duration) {
        for token in self.inner.tokens.lock().await.values() {
            token.cancel();
        }
        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if self.inner.tokens.lock().await.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        warn!("runs still in flight at shutdown");
    }

    /// Start a run for every connected organization whose last sync is older
    /// than the schedule interval. Returns the claimed run ids.
    pub async fn start_due(&self) -> Result<Vec<i64>> {
        let interval = secs(self.inner.config.sync.schedule_interval_secs)?;
        let due = db::organizations_due_for_sync(&self.inner.pool, chrono::Utc::now() - interval).await?;
        let mut started = Vec::new();
        for org_id in due {
            match self.start(org_id, SyncMode::Metadata, None).await {
                Ok(run_id) => started.push(run_id),
                Err(SyncError::AlreadyRunning { .. }) => {}
                Err(err) => warn!(?err, org_id, "failed to start scheduled sync"),
            }
        }
        Ok(started)
    }

    /// Fail runs whose ledger row has been idle longer than
    /// `sync.stale_run_secs`. A failed run that this runner is still executing
    /// has its token cancelled.
    pub async fn reclaim_stale_runs(&self, reason: &str) -> Result<Vec<i64>> {
        let idle = secs(self.inner.config.sync.stale_run_secs)?;
        let failed = db::fail_stale_runs(&self.inner.pool, chrono::Utc::now() - idle, reason).await?;
        let tokens = self.inner.tokens.lock().await;
        for run_id in &failed {
            if let Some(token) = tokens.get(run_id) {
                warn!(run_id, "own run went stale; cancelling it");
                token.cancel();
            }
        }
        Ok(failed)
    }
}

fn secs(n: u64) -> Result<chrono::Duration> {
    Ok(chrono::Duration::from_std(Duration::from_secs(n))?)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_readable() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 7");
        let payload = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }
}
