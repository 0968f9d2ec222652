//! Workable SPI client: throttled requests, 429 handling, cursor pagination.
//!
//! Every request is followed by a fixed throttle sleep so a single client
//! stays under the remote limit of 10 requests per 10 seconds. A 429 earns
//! one cooldown and one retry; a second 429 surfaces as
//! [`WorkableError::RateLimited`], which callers treat as "stop the run".

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Request, StatusCode, Url};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config;

pub mod http;
pub mod payload;
pub mod score;

use http::{RawResponse, ReqwestTransport, Transport};
use payload::{candidate_id, extract_items, job_dedup_key, next_cursor, scalar_string, JobIdentifiers};

const JOB_KEYS: &[&str] = &["jobs", "data"];
const CANDIDATE_KEYS: &[&str] = &["candidates", "data"];
const FILE_KEYS: &[&str] = &["files", "attachments", "data"];

#[derive(Debug, Error)]
pub enum WorkableError {
    #[error("rate limit exhausted after retry on {path}")]
    RateLimited { path: String },
    #[error("workable error {status} on {path}: {body}")]
    Status {
        status: StatusCode,
        path: String,
        body: String,
    },
    #[error("failed to reach Workable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid Workable response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid Workable URL: {0}")]
    InvalidUrl(String),
    #[error("access token is not a valid header value")]
    InvalidToken,
    #[error("no identifier of job {0} was accepted by Workable")]
    UnknownJob(String),
}

impl WorkableError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, WorkableError::RateLimited { .. })
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            WorkableError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn parse_url(raw: &str) -> Result<Url, WorkableError> {
    Url::parse(raw).map_err(|e| WorkableError::InvalidUrl(format!("{raw}: {e}")))
}

fn join_url(base: &Url, path: &str) -> Result<Url, WorkableError> {
    base.join(path)
        .map_err(|e| WorkableError::InvalidUrl(format!("{path}: {e}")))
}

/// The subset of the remote API the sync orchestrator depends on.
#[async_trait]
pub trait WorkableApi: Send + Sync {
    /// Union of jobs across the configured state filters plus an unfiltered
    /// listing, de-duplicated by shortcode (else id).
    async fn list_open_jobs(&self) -> Result<Vec<Value>, WorkableError>;

    async fn list_job_candidates(
        &self,
        job: &JobIdentifiers,
        paginate: bool,
        max_pages: Option<usize>,
    ) -> Result<Vec<Value>, WorkableError>;

    /// Best-effort. Only a rate-limit is returned as an error.
    async fn get_job_details(&self, job: &JobIdentifiers) -> Result<Option<Value>, WorkableError>;

    /// Best-effort; `None` on any failure.
    async fn get_candidate_ratings(&self, candidate_id: &str) -> Option<Value>;
}

pub struct WorkableClient<T = ReqwestTransport> {
    transport: T,
    base_url: Url,
    token: String,
    throttle: Duration,
    cooldown: Duration,
    page_limit: u32,
    job_states: Vec<String>,
    ratings_available: AtomicBool,
}

impl<T> fmt::Debug for WorkableClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkableClient")
            .field("base_url", &self.base_url)
            .field("throttle", &self.throttle)
            .finish_non_exhaustive()
    }
}

impl WorkableClient<ReqwestTransport> {
    /// Production client for one organization's subdomain.
    pub fn from_config(
        cfg: &config::Workable,
        subdomain: &str,
        token: &str,
    ) -> Result<Self, WorkableError> {
        let transport = ReqwestTransport::new(Duration::from_secs(cfg.timeout_secs))?;
        let base_url = parse_url(&cfg.base_url_for(subdomain))?;
        Ok(Self::with_transport(transport, base_url, token)
            .throttle(cfg.throttle())
            .cooldown(cfg.cooldown())
            .page_limit(cfg.page_limit)
            .job_states(cfg.job_states.clone()))
    }
}

impl<T: Transport> WorkableClient<T> {
    pub fn with_transport(transport: T, base_url: Url, token: &str) -> Self {
        let defaults = config::Workable::default();
        Self {
            transport,
            base_url,
            token: token.trim().to_string(),
            throttle: defaults.throttle(),
            cooldown: defaults.cooldown(),
            page_limit: defaults.page_limit,
            job_states: defaults.job_states,
            ratings_available: AtomicBool::new(true),
        }
    }

    pub fn throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn page_limit(mut self, limit: u32) -> Self {
        self.page_limit = limit.max(1);
        self
    }

    pub fn job_states(mut self, states: Vec<String>) -> Self {
        self.job_states = states;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn ratings_available(&self) -> bool {
        self.ratings_available.load(Ordering::Relaxed)
    }

    pub fn build_request(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        authenticated: bool,
    ) -> Result<Request, WorkableError> {
        let mut request = Request::new(method, url);
        let headers = request.headers_mut();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if authenticated {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
                .map_err(|_| WorkableError::InvalidToken)?;
            headers.insert(AUTHORIZATION, bearer);
        }
        if let Some(body) = body {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            *request.body_mut() = Some(body.to_string().into());
        }
        Ok(request)
    }

    /// URL for a path relative to the API root (leading `/` ignored).
    pub fn endpoint(&self, path: &str) -> Result<Url, WorkableError> {
        join_url(&self.base_url, path.trim_start_matches('/'))
    }

    /// Turn a `paging.next` value into a URL. Absolute URLs are used as-is
    /// (they may point at another host or path). Relative values are either
    /// host-rooted (`/spi/v3/jobs?...`) or relative to the API root.
    pub fn resolve_cursor(&self, next: &str) -> Result<Url, WorkableError> {
        let next = next.trim();
        if next.starts_with("http://") || next.starts_with("https://") {
            return parse_url(next);
        }
        if next.starts_with(self.base_url.path()) {
            return join_url(&self.base_url, next);
        }
        self.endpoint(next)
    }

    fn is_api_host(&self, url: &Url) -> bool {
        url.host_str() == self.base_url.host_str()
    }

    async fn pause(&self, d: Duration) {
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
        authenticated: bool,
    ) -> Result<RawResponse, WorkableError> {
        let request = self.build_request(method.clone(), url.clone(), body, authenticated)?;
        debug!(method = %request.method(), url = %request.url(), "workable request");
        for (name, value) in request.headers() {
            if name == AUTHORIZATION {
                trace!("  {}: Bearer [REDACTED]", name);
            } else {
                trace!("  {}: {}", name, value.to_str().unwrap_or("[invalid]"));
            }
        }
        let res = self.transport.send(request).await;
        self.pause(self.throttle).await;
        res
    }

    /// One request under the rate-limit protocol: a 429 earns a single
    /// cooldown + retry, a second 429 is `RateLimited`.
    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        authenticated: bool,
    ) -> Result<RawResponse, WorkableError> {
        let res = self.send_once(&method, &url, body, authenticated).await?;
        if res.status != StatusCode::TOO_MANY_REQUESTS {
            return Ok(res);
        }
        warn!(
            path = url.path(),
            cooldown_ms = self.cooldown.as_millis() as u64,
            "rate limited by Workable; cooling down before retry"
        );
        self.pause(self.cooldown).await;
        let res = self.send_once(&method, &url, body, authenticated).await?;
        if res.status == StatusCode::TOO_MANY_REQUESTS {
            warn!(path = url.path(), "rate limited again after cooldown");
            return Err(WorkableError::RateLimited {
                path: url.path().to_string(),
            });
        }
        Ok(res)
    }

    async fn request_json(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Value, WorkableError> {
        let path = url.path().to_string();
        let authenticated = self.is_api_host(&url);
        if !authenticated {
            debug!(url = %url, "request leaves the API host; sending without credentials");
        }
        let res = self.execute(method, url, body, authenticated).await?;
        if !res.status.is_success() {
            return Err(WorkableError::Status {
                status: res.status,
                path,
                body: res.text(),
            });
        }
        if res.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&res.body)?)
    }

    async fn get_json(&self, url: Url) -> Result<Value, WorkableError> {
        self.request_json(Method::GET, url, None).await
    }

    /// Follow `paging.next` until exhausted, a repeated cursor, or `max_pages`.
    pub async fn paginate(
        &self,
        first: Url,
        keys: &[&str],
        max_pages: Option<usize>,
    ) -> Result<Vec<Value>, WorkableError> {
        let mut items = Vec::new();
        let mut visited = HashSet::new();
        let mut pages = 0usize;
        let mut next = Some(first);

        while let Some(url) = next.take() {
            if !visited.insert(url.to_string()) {
                debug!(url = %url, "pagination cursor repeated; stopping");
                break;
            }
            let body = self.get_json(url).await?;
            items.extend(extract_items(&body, keys));
            pages += 1;
            if max_pages.is_some_and(|cap| pages >= cap) {
                debug!(pages, "page cap reached");
                break;
            }
            next = match next_cursor(&body) {
                Some(cursor) => Some(self.resolve_cursor(&cursor)?),
                None => None,
            };
        }
        Ok(items)
    }

    fn listing_url(&self, path: &str, state: Option<&str>) -> Result<Url, WorkableError> {
        let mut url = self.endpoint(path)?;
        {
            let mut q = url.query_pairs_mut();
            if let Some(state) = state {
                q.append_pair("state", state);
            }
            q.append_pair("limit", &self.page_limit.to_string());
        }
        Ok(url)
    }

    pub async fn list_open_jobs(&self) -> Result<Vec<Value>, WorkableError> {
        let filters: Vec<Option<&str>> = self
            .job_states
            .iter()
            .map(|s| Some(s.as_str()))
            .chain(std::iter::once(None))
            .collect();

        let mut seen = HashSet::new();
        let mut jobs = Vec::new();
        for (i, state) in filters.into_iter().enumerate() {
            let url = self.listing_url("jobs", state)?;
            match self.paginate(url, JOB_KEYS, None).await {
                Ok(batch) => {
                    debug!(state = state.unwrap_or("any"), count = batch.len(), "jobs listed");
                    for job in batch {
                        match job_dedup_key(&job) {
                            Some(key) => {
                                if seen.insert(key) {
                                    jobs.push(job);
                                }
                            }
                            None => warn!("skipping job without shortcode or id"),
                        }
                    }
                }
                Err(err) if i == 0 => return Err(err),
                Err(err) => {
                    warn!(?err, state = state.unwrap_or("any"), "job listing filter failed; continuing")
                }
            }
        }
        Ok(jobs)
    }

    pub async fn list_job_candidates(
        &self,
        job: &JobIdentifiers,
        paginate: bool,
        max_pages: Option<usize>,
    ) -> Result<Vec<Value>, WorkableError> {
        let cap = if paginate { max_pages } else { Some(1) };
        for id in job.iter() {
            let url = self.listing_url(&format!("jobs/{}/candidates", id), None)?;
            match self.paginate(url, CANDIDATE_KEYS, cap).await {
                Ok(items) => return Ok(dedup_candidates(items)),
                Err(err) if err.status() == Some(StatusCode::NOT_FOUND) => {
                    debug!(job = id, "candidate listing not found under identifier; trying next");
                }
                Err(err) => return Err(err),
            }
        }
        Err(WorkableError::UnknownJob(job.to_string()))
    }

    pub async fn get_job_details(
        &self,
        job: &JobIdentifiers,
    ) -> Result<Option<Value>, WorkableError> {
        for id in job.iter() {
            let url = self.endpoint(&format!("jobs/{}", id))?;
            match self.get_json(url).await {
                Ok(body) if body.is_object() => {
                    return Ok(Some(body.get("job").cloned().unwrap_or(body)));
                }
                Ok(_) => debug!(job = id, "empty job details"),
                Err(err) if err.is_rate_limited() => return Err(err),
                Err(err) => debug!(?err, job = id, "job details lookup failed"),
            }
        }
        Ok(None)
    }

    pub async fn get_candidate(&self, candidate_id: &str) -> Result<Option<Value>, WorkableError> {
        let url = self.endpoint(&format!("candidates/{}", candidate_id))?;
        match self.get_json(url).await {
            Ok(body) if body.is_object() => {
                Ok(Some(body.get("candidate").cloned().unwrap_or(body)))
            }
            Ok(_) => Ok(None),
            Err(err) if err.is_rate_limited() => Err(err),
            Err(err) => {
                debug!(?err, candidate = candidate_id, "candidate lookup failed");
                Ok(None)
            }
        }
    }

    pub async fn get_candidate_files(&self, candidate_id: &str) -> Vec<Value> {
        let url = match self.endpoint(&format!("candidates/{}/files", candidate_id)) {
            Ok(url) => url,
            Err(_) => return Vec::new(),
        };
        match self.get_json(url).await {
            Ok(body) => extract_items(&body, FILE_KEYS),
            Err(err) => {
                debug!(?err, candidate = candidate_id, "candidate files lookup failed");
                Vec::new()
            }
        }
    }

    /// Ratings are not available on every plan. The first 403/404 switches the
    /// lookup off for the rest of this client's life.
    pub async fn get_candidate_ratings(&self, candidate_id: &str) -> Option<Value> {
        if !self.ratings_available() {
            return None;
        }
        let url = self
            .endpoint(&format!("candidates/{}/ratings", candidate_id))
            .ok()?;
        match self.get_json(url).await {
            Ok(body) => Some(body),
            Err(err)
                if matches!(
                    err.status(),
                    Some(StatusCode::FORBIDDEN) | Some(StatusCode::NOT_FOUND)
                ) =>
            {
                info!(candidate = candidate_id, "ratings endpoint unavailable; disabling");
                self.ratings_available.store(false, Ordering::Relaxed);
                None
            }
            Err(err) => {
                debug!(?err, candidate = candidate_id, "ratings lookup failed");
                None
            }
        }
    }

    async fn download(&self, url: &str) -> Option<Vec<u8>> {
        let url = Url::parse(url).ok()?;
        let authenticated = self.is_api_host(&url);
        match self.execute(Method::GET, url.clone(), None, authenticated).await {
            Ok(res) if res.status.is_success() && !res.body.is_empty() => Some(res.body),
            Ok(res) => {
                debug!(url = %url, status = %res.status, "resume download rejected");
                None
            }
            Err(err) => {
                debug!(?err, url = %url, "resume download failed");
                None
            }
        }
    }

    /// First resume that downloads successfully, trying the direct resume URL,
    /// then attachment entries on the payload, then the files endpoint.
    pub async fn download_candidate_resume(&self, candidate: &Value) -> Option<(String, Vec<u8>)> {
        let mut sources = Vec::new();
        if let Some(url) = candidate.get("resume_url").and_then(scalar_string) {
            sources.push(FileSource { name: None, url });
        }
        for key in ["attachments", "files"] {
            if let Some(entries) = candidate.get(key).and_then(Value::as_array) {
                sources.extend(entries.iter().filter_map(FileSource::from_entry));
            }
        }
        for src in &sources {
            if let Some(bytes) = self.download(&src.url).await {
                return Some((src.file_name(), bytes));
            }
        }

        let id = candidate_id(candidate)?;
        for entry in self.get_candidate_files(&id).await {
            let Some(src) = FileSource::from_entry(&entry) else {
                continue;
            };
            if sources.iter().any(|s| s.url == src.url) {
                continue;
            }
            if let Some(bytes) = self.download(&src.url).await {
                return Some((src.file_name(), bytes));
            }
        }
        None
    }

    /// Post an assessment result to the candidate's activity timeline.
    pub async fn post_candidate_activity(
        &self,
        candidate_id: &str,
        body: &Value,
    ) -> Result<Value, WorkableError> {
        let url = self.endpoint(&format!("candidates/{}/activities", candidate_id))?;
        self.request_json(Method::POST, url, Some(body)).await
    }

    pub async fn update_candidate_stage(
        &self,
        candidate_id: &str,
        stage: &str,
    ) -> Result<(), WorkableError> {
        let url = self.endpoint(&format!("candidates/{}", candidate_id))?;
        let body = json!({ "candidate": { "stage": stage } });
        self.request_json(Method::PATCH, url, Some(&body)).await?;
        Ok(())
    }
}

struct FileSource {
    name: Option<String>,
    url: String,
}

impl FileSource {
    fn from_entry(entry: &Value) -> Option<Self> {
        let url = ["url", "download_url", "file_url"]
            .iter()
            .find_map(|k| entry.get(*k).and_then(scalar_string))?;
        let name = ["name", "filename", "file_name"]
            .iter()
            .find_map(|k| entry.get(*k).and_then(scalar_string));
        Some(Self { name, url })
    }

    fn file_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        Url::parse(&self.url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut s| s.next_back().map(str::to_string))
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "resume".to_string())
    }
}

fn dedup_candidates(items: Vec<Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|c| match candidate_id(c) {
            Some(id) => seen.insert(id),
            None => true,
        })
        .collect()
}

#[async_trait]
impl<T: Transport> WorkableApi for WorkableClient<T> {
    async fn list_open_jobs(&self) -> Result<Vec<Value>, WorkableError> {
        WorkableClient::list_open_jobs(self).await
    }

    async fn list_job_candidates(
        &self,
        job: &JobIdentifiers,
        paginate: bool,
        max_pages: Option<usize>,
    ) -> Result<Vec<Value>, WorkableError> {
        WorkableClient::list_job_candidates(self, job, paginate, max_pages).await
    }

    async fn get_job_details(&self, job: &JobIdentifiers) -> Result<Option<Value>, WorkableError> {
        WorkableClient::get_job_details(self, job).await
    }

    async fn get_candidate_ratings(&self, candidate_id: &str) -> Option<Value> {
        WorkableClient::get_candidate_ratings(self, candidate_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::RawResponse;

    struct NoTransport;

    #[async_trait]
    impl Transport for NoTransport {
        async fn send(&self, _request: Request) -> Result<RawResponse, WorkableError> {
            Ok(RawResponse::new(StatusCode::OK, "{}"))
        }
    }

    fn client() -> WorkableClient<NoTransport> {
        let base = Url::parse("https://acme.workable.com/spi/v3/").unwrap();
        WorkableClient::with_transport(NoTransport, base, "token")
    }

    #[test]
    fn build_request_sets_headers() {
        let c = client();
        let url = c.endpoint("/jobs").unwrap();
        let body = json!({ "sample": true });
        let request = c
            .build_request(Method::POST, url, Some(&body), true)
            .unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.url().path(), "/spi/v3/jobs");
        let headers = request.headers();
        assert_eq!(
            headers.get("Authorization").and_then(|h| h.to_str().ok()).unwrap(),
            "Bearer token"
        );
        assert_eq!(
            headers.get("Content-Type").and_then(|h| h.to_str().ok()).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn unauthenticated_request_omits_token() {
        let c = client();
        let url = Url::parse("https://storage.example/resume.pdf").unwrap();
        let request = c.build_request(Method::GET, url, None, false).unwrap();
        assert!(request.headers().get("Authorization").is_none());
        assert!(request.headers().get("Content-Type").is_none());
    }

    #[test]
    fn resolve_cursor_handles_every_form() {
        let c = client();
        assert_eq!(
            c.resolve_cursor("https://other.example/api/jobs?since_id=9")
                .unwrap()
                .as_str(),
            "https://other.example/api/jobs?since_id=9"
        );
        assert_eq!(
            c.resolve_cursor("/spi/v3/jobs?since_id=9").unwrap().as_str(),
            "https://acme.workable.com/spi/v3/jobs?since_id=9"
        );
        assert_eq!(
            c.resolve_cursor("/jobs?since_id=9").unwrap().as_str(),
            "https://acme.workable.com/spi/v3/jobs?since_id=9"
        );
        assert_eq!(
            c.resolve_cursor("jobs/AB1/candidates?since_id=3").unwrap().as_str(),
            "https://acme.workable.com/spi/v3/jobs/AB1/candidates?since_id=3"
        );
    }

    #[test]
    fn file_source_names_fall_back_to_url() {
        let named = FileSource::from_entry(&json!({ "name": "cv.pdf", "url": "https://x/y/z.pdf" })).unwrap();
        assert_eq!(named.file_name(), "cv.pdf");
        let unnamed = FileSource::from_entry(&json!({ "download_url": "https://x/files/abc.docx?sig=1" })).unwrap();
        assert_eq!(unnamed.file_name(), "abc.docx");
        assert!(FileSource::from_entry(&json!({ "name": "no-url" })).is_none());
    }

    #[test]
    fn dedup_keeps_first_sighting() {
        let items = vec![
            json!({ "id": "a", "n": 1 }),
            json!({ "id": "b" }),
            json!({ "id": "a", "n": 2 }),
            json!({ "email": "x@y.z" }),
        ];
        let out = dedup_candidates(items);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0]["n"], 1);
    }
}
