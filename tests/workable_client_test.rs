use async_trait::async_trait;
use ats_sync::workable::http::{RawResponse, Transport};
use ats_sync::workable::payload::JobIdentifiers;
use ats_sync::workable::{WorkableClient, WorkableError};
use reqwest::{Request, StatusCode, Url};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Sent {
    method: String,
    url: String,
    auth: Option<String>,
    body: Option<Value>,
}

/// Replays queued responses in order and records every request it receives.
/// An exhausted script answers 500.
#[derive(Default)]
struct ScriptedTransport {
    replies: Mutex<VecDeque<RawResponse>>,
    sent: Mutex<Vec<Sent>>,
}

impl ScriptedTransport {
    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn urls(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.url).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: Request) -> Result<RawResponse, WorkableError> {
        let auth = request
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);
        let body = request
            .body()
            .and_then(|b| b.as_bytes())
            .map(|b| serde_json::from_slice(b).unwrap());
        self.sent.lock().unwrap().push(Sent {
            method: request.method().to_string(),
            url: request.url().to_string(),
            auth,
            body,
        });
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| RawResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "script exhausted")))
    }
}

const BASE: &str = "https://acme.workable.com/spi/v3/";

fn ok(body: Value) -> RawResponse {
    RawResponse::json(StatusCode::OK, &body)
}

fn status(code: u16) -> RawResponse {
    RawResponse::new(StatusCode::from_u16(code).unwrap(), "{\"error\":\"nope\"}")
}

fn client(replies: Vec<RawResponse>) -> WorkableClient<ScriptedTransport> {
    let transport = ScriptedTransport {
        replies: Mutex::new(replies.into()),
        ..Default::default()
    };
    WorkableClient::with_transport(transport, Url::parse(BASE).unwrap(), "secret")
        .throttle(Duration::ZERO)
        .cooldown(Duration::ZERO)
        .page_limit(2)
        .job_states(vec!["published".into(), "draft".into()])
}

fn ids(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .map(|v| v["id"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn single_429_is_retried_after_cooldown() {
    let c = client(vec![status(429), ok(json!({ "id": "C1", "name": "Ann" }))]);
    let candidate = c.get_candidate("C1").await.unwrap().unwrap();
    assert_eq!(candidate["name"], "Ann");
    assert_eq!(c.transport().sent().len(), 2);
}

#[tokio::test]
async fn second_429_is_rate_limited() {
    let c = client(vec![status(429), status(429)]);
    let err = c.get_candidate("C1").await.unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(c.transport().sent().len(), 2);
}

#[tokio::test]
async fn requests_carry_bearer_token() {
    let c = client(vec![ok(json!({ "candidates": [] }))]);
    c.list_job_candidates(&JobIdentifiers::new(["AB1".to_string()]), true, None)
        .await
        .unwrap();
    let sent = c.transport().sent();
    assert_eq!(sent[0].method, "GET");
    assert_eq!(sent[0].auth.as_deref(), Some("Bearer secret"));
    assert_eq!(
        sent[0].url,
        "https://acme.workable.com/spi/v3/jobs/AB1/candidates?limit=2"
    );
}

#[tokio::test]
async fn pagination_follows_absolute_and_relative_cursors() {
    let c = client(vec![
        ok(json!({
            "candidates": [{ "id": "C1" }, { "id": "C2" }],
            "paging": { "next": "https://acme.workable.com/spi/v3/jobs/AB1/candidates?limit=2&since_id=C2" }
        })),
        ok(json!({
            "candidates": [{ "id": "C3" }, { "id": "C2" }],
            "paging": { "next": "/spi/v3/jobs/AB1/candidates?limit=2&since_id=C3" }
        })),
        ok(json!({ "candidates": [{ "id": "C4" }] })),
    ]);
    let job = JobIdentifiers::new(["AB1".to_string()]);
    let candidates = c.list_job_candidates(&job, true, None).await.unwrap();

    assert_eq!(ids(&candidates), vec!["C1", "C2", "C3", "C4"]);
    let urls = c.transport().urls();
    assert_eq!(urls.len(), 3);
    assert!(urls[1].ends_with("since_id=C2"));
    assert_eq!(
        urls[2],
        "https://acme.workable.com/spi/v3/jobs/AB1/candidates?limit=2&since_id=C3"
    );
}

#[tokio::test]
async fn repeated_cursor_stops_pagination() {
    let page = json!({
        "candidates": [{ "id": "C1" }],
        "paging": { "next": "jobs/AB1/candidates?limit=2" }
    });
    let c = client(vec![ok(page.clone()), ok(page)]);
    let job = JobIdentifiers::new(["AB1".to_string()]);
    let candidates = c.list_job_candidates(&job, true, None).await.unwrap();
    assert_eq!(ids(&candidates), vec!["C1"]);
    assert_eq!(c.transport().sent().len(), 1);
}

#[tokio::test]
async fn page_cap_and_single_page_mode() {
    let page = |n: u32| {
        ok(json!({
            "candidates": [{ "id": format!("C{n}") }],
            "paging": { "next": format!("jobs/AB1/candidates?since_id=C{n}") }
        }))
    };
    let job = JobIdentifiers::new(["AB1".to_string()]);

    let c = client(vec![page(1), page(2), page(3)]);
    let capped = c.list_job_candidates(&job, true, Some(2)).await.unwrap();
    assert_eq!(ids(&capped), vec!["C1", "C2"]);
    assert_eq!(c.transport().sent().len(), 2);

    let c = client(vec![page(1), page(2)]);
    let single = c.list_job_candidates(&job, false, None).await.unwrap();
    assert_eq!(ids(&single), vec!["C1"]);
    assert_eq!(c.transport().sent().len(), 1);
}

#[tokio::test]
async fn candidate_listing_falls_back_to_next_identifier_on_404() {
    let c = client(vec![status(404), ok(json!({ "candidates": [{ "id": "C9" }] }))]);
    let job = JobIdentifiers::new(["AB1".to_string(), "123".to_string()]);
    let candidates = c.list_job_candidates(&job, true, None).await.unwrap();
    assert_eq!(ids(&candidates), vec!["C9"]);
    let urls = c.transport().urls();
    assert!(urls[0].contains("/jobs/AB1/candidates"));
    assert!(urls[1].contains("/jobs/123/candidates"));
}

#[tokio::test]
async fn candidate_listing_with_no_accepted_identifier_fails() {
    let c = client(vec![status(404), status(404)]);
    let job = JobIdentifiers::new(["AB1".to_string(), "123".to_string()]);
    let err = c.list_job_candidates(&job, true, None).await.unwrap_err();
    assert!(matches!(err, WorkableError::UnknownJob(_)));
}

#[tokio::test]
async fn job_listing_unions_state_filters() {
    let c = client(vec![
        ok(json!({ "jobs": [{ "shortcode": "A", "id": "1" }, { "shortcode": "B", "id": "2" }] })),
        ok(json!({ "jobs": [{ "shortcode": "C", "id": "3" }, { "shortcode": "A", "id": "1" }] })),
        ok(json!([{ "id": "4" }, { "title": "no identifiers" }, { "shortcode": "B", "id": "2" }])),
    ]);
    let jobs = c.list_open_jobs().await.unwrap();

    assert_eq!(ids(&jobs), vec!["1", "2", "3", "4"]);
    let urls = c.transport().urls();
    assert_eq!(
        urls,
        vec![
            "https://acme.workable.com/spi/v3/jobs?state=published&limit=2",
            "https://acme.workable.com/spi/v3/jobs?state=draft&limit=2",
            "https://acme.workable.com/spi/v3/jobs?limit=2",
        ]
    );
}

#[tokio::test]
async fn first_job_filter_error_propagates() {
    let c = client(vec![status(401)]);
    let err = c.list_open_jobs().await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    assert_eq!(c.transport().sent().len(), 1);
}

#[tokio::test]
async fn later_job_filter_errors_are_skipped() {
    let c = client(vec![
        ok(json!({ "jobs": [{ "shortcode": "A", "id": "1" }] })),
        status(500),
        ok(json!({ "jobs": [{ "shortcode": "B", "id": "2" }] })),
    ]);
    let jobs = c.list_open_jobs().await.unwrap();
    assert_eq!(ids(&jobs), vec!["1", "2"]);
}

#[tokio::test]
async fn job_details_unwrap_and_fall_back() {
    let c = client(vec![
        status(404),
        ok(json!({ "job": { "shortcode": "AB1", "description": "<p>Hi</p>" } })),
    ]);
    let job = JobIdentifiers::new(["AB1".to_string(), "123".to_string()]);
    let details = c.get_job_details(&job).await.unwrap().unwrap();
    assert_eq!(details["description"], "<p>Hi</p>");

    let c = client(vec![status(500), status(500)]);
    assert!(c.get_job_details(&job).await.unwrap().is_none());

    let c = client(vec![status(429), status(429)]);
    assert!(c.get_job_details(&job).await.unwrap_err().is_rate_limited());
}

#[tokio::test]
async fn ratings_are_disabled_after_404() {
    let c = client(vec![status(404), ok(json!({ "ratings": [] }))]);
    assert!(c.get_candidate_ratings("C1").await.is_none());
    assert!(!c.ratings_available());
    assert!(c.get_candidate_ratings("C2").await.is_none());
    assert_eq!(c.transport().sent().len(), 1);
}

#[tokio::test]
async fn ratings_survive_transient_errors() {
    let c = client(vec![status(500), ok(json!({ "ratings": [{ "score": 4 }] }))]);
    assert!(c.get_candidate_ratings("C1").await.is_none());
    assert!(c.ratings_available());
    let ratings = c.get_candidate_ratings("C1").await.unwrap();
    assert_eq!(ratings["ratings"][0]["score"], 4);
}

#[tokio::test]
async fn resume_download_skips_token_on_foreign_hosts() {
    let c = client(vec![RawResponse::new(StatusCode::OK, b"%PDF-1.4".to_vec())]);
    let candidate = json!({
        "id": "C1",
        "resume_url": "https://files.example.com/resumes/ann.pdf?sig=abc"
    });
    let (name, bytes) = c.download_candidate_resume(&candidate).await.unwrap();
    assert_eq!(name, "ann.pdf");
    assert_eq!(bytes, b"%PDF-1.4");
    assert!(c.transport().sent()[0].auth.is_none());
}

#[tokio::test]
async fn resume_download_falls_back_to_files_endpoint() {
    let c = client(vec![
        status(403),
        ok(json!({ "files": [
            { "name": "cv.docx", "url": "https://acme.workable.com/spi/v3/files/9" }
        ] })),
        RawResponse::new(StatusCode::OK, b"docx".to_vec()),
    ]);
    let candidate = json!({
        "id": "C1",
        "attachments": [{ "url": "https://files.example.com/expired.pdf" }]
    });
    let (name, bytes) = c.download_candidate_resume(&candidate).await.unwrap();
    assert_eq!(name, "cv.docx");
    assert_eq!(bytes, b"docx");

    let sent = c.transport().sent();
    assert_eq!(sent.len(), 3);
    assert!(sent[0].auth.is_none());
    assert!(sent[1].url.ends_with("/candidates/C1/files"));
    assert_eq!(sent[2].auth.as_deref(), Some("Bearer secret"));
}

#[tokio::test]
async fn activity_and_stage_writes() {
    let c = client(vec![ok(json!({ "id": "A1" })), RawResponse::new(StatusCode::OK, "")]);
    let body = json!({ "body": "Assessment score: 87", "member_id": "M1" });
    let res = c.post_candidate_activity("C1", &body).await.unwrap();
    assert_eq!(res["id"], "A1");
    c.update_candidate_stage("C1", "interview").await.unwrap();

    let sent = c.transport().sent();
    assert_eq!(sent[0].method, "POST");
    assert!(sent[0].url.ends_with("/candidates/C1/activities"));
    assert_eq!(sent[0].body.as_ref(), Some(&body));
    assert_eq!(sent[1].method, "PATCH");
    assert!(sent[1].url.ends_with("/candidates/C1"));
    assert_eq!(
        sent[1].body.as_ref(),
        Some(&json!({ "candidate": { "stage": "interview" } }))
    );
}

#[tokio::test]
async fn write_errors_carry_status_and_body() {
    let c = client(vec![status(422)]);
    let err = c.update_candidate_stage("C1", "nowhere").await.unwrap_err();
    match err {
        WorkableError::Status { status, path, body } => {
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
            assert_eq!(path, "/spi/v3/candidates/C1");
            assert!(body.contains("nope"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn cursor_to_another_host_is_followed_without_token() {
    let c = client(vec![
        ok(json!({
            "candidates": [{ "id": "C1" }],
            "paging": { "next": "https://mirror.example.net/spi/v3/jobs/AB1/candidates?since_id=C1" }
        })),
        ok(json!({ "candidates": [{ "id": "C2" }] })),
    ]);
    let job = JobIdentifiers::new(["AB1".to_string()]);
    let candidates = c.list_job_candidates(&job, true, None).await.unwrap();
    assert_eq!(ids(&candidates), vec!["C1", "C2"]);

    let sent = c.transport().sent();
    assert_eq!(sent[0].auth.as_deref(), Some("Bearer secret"));
    assert!(sent[1].url.starts_with("https://mirror.example.net/"));
    assert!(sent[1].auth.is_none());
}
