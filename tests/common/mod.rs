#![allow(dead_code)]

use anyhow::Result;
use ats_sync::config::{self, Config};
use ats_sync::db::{self, Pool};
use ats_sync::runner::ApiFactory;
use ats_sync::workable::payload::JobIdentifiers;
use ats_sync::workable::{WorkableApi, WorkableError};
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub struct TestEnv {
    pub dir: TempDir,
    pub pool: Pool,
    pub config: Config,
}

pub async fn setup() -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/test.db", dir.path().display());
    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();

    let mut config: Config = serde_yaml::from_str(config::example()).unwrap();
    config.app.data_dir = dir.path().join("data").display().to_string();
    config.app.poll_interval_ms = 10;
    config.workable.throttle_ms = 0;
    config.workable.rate_limit_cooldown_ms = 0;
    config::validate(&config).unwrap();

    TestEnv { dir, pool, config }
}

pub async fn connected_org(pool: &Pool, name: &str) -> i64 {
    let org = db::create_organization(pool, name).await.unwrap();
    db::connect_organization(pool, org, "acme", "token").await.unwrap();
    org
}

pub fn job(code: &str, title: &str) -> Value {
    json!({
        "id": format!("id-{code}"),
        "shortcode": code,
        "title": title,
        "state": "published",
        "url": format!("https://acme.workable.com/j/{code}")
    })
}

pub fn candidate(id: &str, stage: &str) -> Value {
    json!({
        "id": id,
        "name": format!("Candidate {id}"),
        "email": format!("{}@example.com", id.to_lowercase()),
        "stage": stage
    })
}

/// Canned reply of one fake endpoint.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    RateLimited,
    Status(u16),
}

impl<T> Reply<T> {
    fn into_result(self, path: &str) -> Result<T, WorkableError> {
        match self {
            Reply::Ok(v) => Ok(v),
            Reply::RateLimited => Err(WorkableError::RateLimited {
                path: path.to_string(),
            }),
            Reply::Status(code) => Err(WorkableError::Status {
                status: StatusCode::from_u16(code).unwrap(),
                path: path.to_string(),
                body: String::new(),
            }),
        }
    }
}

pub type Hook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Scripted remote ATS. Calls are recorded as labels such as `list_jobs`,
/// `details:J1`, `candidates:J1` and `ratings:C1`; a hook registered for a
/// label runs (and is awaited) when that call happens.
#[derive(Clone, Default)]
pub struct FakeAts {
    jobs: Arc<Mutex<Option<Reply<Vec<Value>>>>>,
    candidates: Arc<Mutex<HashMap<String, Reply<Vec<Value>>>>>,
    details: Arc<Mutex<HashMap<String, Reply<Option<Value>>>>>,
    ratings: Arc<Mutex<HashMap<String, Value>>>,
    calls: Arc<Mutex<Vec<String>>>,
    hooks: Arc<Mutex<HashMap<String, Hook>>>,
    panic_on_list: Arc<AtomicBool>,
}

impl FakeAts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(self, reply: Reply<Vec<Value>>) -> Self {
        *self.jobs.lock().unwrap() = Some(reply);
        self
    }

    pub fn candidates(self, job: &str, reply: Reply<Vec<Value>>) -> Self {
        self.candidates.lock().unwrap().insert(job.to_string(), reply);
        self
    }

    pub fn details(self, job: &str, reply: Reply<Option<Value>>) -> Self {
        self.details.lock().unwrap().insert(job.to_string(), reply);
        self
    }

    pub fn ratings(self, candidate: &str, value: Value) -> Self {
        self.ratings.lock().unwrap().insert(candidate.to_string(), value);
        self
    }

    pub fn hook(self, label: &str, hook: Hook) -> Self {
        self.hooks.lock().unwrap().insert(label.to_string(), hook);
        self
    }

    pub fn panic_on_list(self) -> Self {
        self.panic_on_list.store(true, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, label: &str) -> bool {
        self.calls().iter().any(|c| c == label)
    }

    async fn record(&self, label: String) {
        self.calls.lock().unwrap().push(label.clone());
        let hook = self.hooks.lock().unwrap().get(&label).cloned();
        if let Some(hook) = hook {
            hook().await;
        }
    }

    fn lookup<T: Clone>(map: &Mutex<HashMap<String, T>>, job: &JobIdentifiers) -> Option<T> {
        let map = map.lock().unwrap();
        job.iter().find_map(|id| map.get(id).cloned())
    }
}

#[async_trait::async_trait]
impl WorkableApi for FakeAts {
    async fn list_open_jobs(&self) -> Result<Vec<Value>, WorkableError> {
        if self.panic_on_list.load(Ordering::SeqCst) {
            panic!("fake ATS exploded");
        }
        self.record("list_jobs".into()).await;
        let reply = self.jobs.lock().unwrap().clone();
        reply.unwrap_or(Reply::Ok(Vec::new())).into_result("/jobs")
    }

    async fn list_job_candidates(
        &self,
        job: &JobIdentifiers,
        _paginate: bool,
        _max_pages: Option<usize>,
    ) -> Result<Vec<Value>, WorkableError> {
        let primary = job.primary().unwrap_or_default().to_string();
        self.record(format!("candidates:{primary}")).await;
        Self::lookup(&self.candidates, job)
            .unwrap_or(Reply::Ok(Vec::new()))
            .into_result(&format!("/jobs/{primary}/candidates"))
    }

    async fn get_job_details(&self, job: &JobIdentifiers) -> Result<Option<Value>, WorkableError> {
        let primary = job.primary().unwrap_or_default().to_string();
        self.record(format!("details:{primary}")).await;
        Self::lookup(&self.details, job)
            .unwrap_or(Reply::Ok(None))
            .into_result(&format!("/jobs/{primary}"))
    }

    async fn get_candidate_ratings(&self, candidate_id: &str) -> Option<Value> {
        self.record(format!("ratings:{candidate_id}")).await;
        self.ratings.lock().unwrap().get(candidate_id).cloned()
    }
}

pub struct FakeFactory(pub FakeAts);

impl ApiFactory for FakeFactory {
    fn connect(&self, _subdomain: &str, _access_token: &str) -> Result<Arc<dyn WorkableApi>> {
        Ok(Arc::new(self.0.clone()))
    }
}

pub async fn count(pool: &Pool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}
