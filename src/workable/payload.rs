//! Helpers for reading loosely-shaped Workable payloads.
//!
//! The API nests collections under different keys depending on the endpoint
//! and account, and candidate/job fields come in several representations.
//! Everything here is pure and works on `serde_json::Value`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Pipeline stages that close a candidate's application for a job.
pub const TERMINAL_STAGES: &[&str] = &[
    "hired",
    "rejected",
    "withdrawn",
    "disqualified",
    "declined",
    "archived",
];

static JOB_CODE_IN_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/(?:j|jobs|view)/([A-Za-z0-9]{4,})(?:[/?#]|$)").expect("valid job code regex")
});

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));

/// Render a scalar (string or number) as a trimmed, non-empty string.
pub fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_string(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| v.get(*k).and_then(scalar_string))
}

/// Pull the item array out of a listing response. Accepts a bare array or an
/// object holding the array under one of `keys`.
pub fn extract_items(body: &Value, keys: &[&str]) -> Vec<Value> {
    if let Some(items) = body.as_array() {
        return items.clone();
    }
    keys.iter()
        .find_map(|k| body.get(*k).and_then(Value::as_array))
        .cloned()
        .unwrap_or_default()
}

/// `paging.next` continuation, absolute URL or relative path+query.
pub fn next_cursor(body: &Value) -> Option<String> {
    body.get("paging")
        .and_then(|p| p.get("next"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Every representation a remote job is known by, most reliable first:
/// shortcode, numeric/opaque id, then a code parsed out of its public URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobIdentifiers(Vec<String>);

impl JobIdentifiers {
    pub fn from_job(job: &Value) -> Self {
        let mut ids = Self::default();
        if let Some(code) = first_string(job, &["shortcode", "code"]) {
            ids.push(code);
        }
        if let Some(id) = first_string(job, &["id"]) {
            ids.push(id);
        }
        for key in ["shortlink", "url", "application_url"] {
            if let Some(url) = job.get(key).and_then(Value::as_str) {
                if let Some(code) = job_code_from_url(url) {
                    ids.push(code);
                }
            }
        }
        ids
    }

    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Self::default();
        for id in ids {
            out.push(id.into());
        }
        out
    }

    fn push(&mut self, id: String) {
        let id = id.trim().to_string();
        if !id.is_empty() && !self.0.contains(&id) {
            self.0.push(id);
        }
    }

    /// Stable key used for local storage and de-duplication.
    pub fn primary(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|x| x.eq_ignore_ascii_case(id.trim()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for JobIdentifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("|"))
    }
}

pub fn job_code_from_url(url: &str) -> Option<String> {
    JOB_CODE_IN_URL
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Job de-duplication key: shortcode preferred, else remote id.
pub fn job_dedup_key(job: &Value) -> Option<String> {
    first_string(job, &["shortcode", "code"]).or_else(|| first_string(job, &["id"]))
}

pub fn job_title(job: &Value) -> Option<String> {
    first_string(job, &["title", "full_title", "name"])
}

pub fn job_state(job: &Value) -> Option<String> {
    first_string(job, &["state", "status"])
}

pub fn candidate_id(candidate: &Value) -> Option<String> {
    first_string(candidate, &["id"])
}

/// Raw stage label: plain string, `{ "name": .. }` object, or `stage_name`.
pub fn candidate_stage(candidate: &Value) -> Option<String> {
    match candidate.get("stage") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(obj @ Value::Object(_)) => first_string(obj, &["name", "slug", "kind"]),
        _ => first_string(candidate, &["stage_name", "stage_kind"]),
    }
}

pub fn is_terminal_stage(candidate: &Value) -> bool {
    if candidate.get("disqualified").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    candidate_stage(candidate)
        .map(|s| TERMINAL_STAGES.contains(&s.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn normalize_email(raw: &str) -> Option<String> {
    let e = raw.trim().to_ascii_lowercase();
    (e.contains('@') && !e.starts_with('@') && !e.ends_with('@')).then_some(e)
}

fn email_from_list(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_array)?.iter().find_map(|e| match e {
        Value::String(s) => normalize_email(s),
        Value::Object(_) => first_string(e, &["value", "email", "address"])
            .and_then(|s| normalize_email(&s)),
        _ => None,
    })
}

/// Email fallback chain: direct field, `emails` list, nested `contact`.
pub fn extract_email(candidate: &Value) -> Option<String> {
    if let Some(e) = candidate
        .get("email")
        .and_then(Value::as_str)
        .and_then(normalize_email)
    {
        return Some(e);
    }
    if let Some(e) = email_from_list(candidate.get("emails")) {
        return Some(e);
    }
    let contact = candidate.get("contact")?;
    contact
        .get("email")
        .and_then(Value::as_str)
        .and_then(normalize_email)
        .or_else(|| email_from_list(contact.get("emails")))
}

/// Structured profile fields pulled from a candidate payload. `None` means
/// "not present", which leaves the stored value untouched on update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub headline: Option<String>,
    pub summary: Option<String>,
    pub location: Option<String>,
    pub skills: Option<Vec<String>>,
    pub education: Option<Vec<Value>>,
    pub experience: Option<Vec<Value>>,
    pub profile_url: Option<String>,
}

impl CandidateProfile {
    pub fn from_payload(c: &Value) -> Self {
        let full_name = first_string(c, &["name", "full_name"]).or_else(|| {
            let parts: Vec<String> = ["firstname", "lastname"]
                .iter()
                .filter_map(|k| c.get(*k).and_then(scalar_string))
                .collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        });

        let location = match c.get("location") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(obj @ Value::Object(_)) => first_string(obj, &["location_str"]).or_else(|| {
                let parts: Vec<String> = ["city", "region", "country"]
                    .iter()
                    .filter_map(|k| obj.get(*k).and_then(scalar_string))
                    .collect();
                (!parts.is_empty()).then(|| parts.join(", "))
            }),
            _ => first_string(c, &["address"]),
        };

        let skills = c.get("skills").and_then(Value::as_array).map(|arr| {
            arr.iter()
                .filter_map(|s| match s {
                    Value::Object(_) => first_string(s, &["name", "value"]),
                    other => scalar_string(other),
                })
                .collect::<Vec<_>>()
        });

        let entries = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| c.get(*k).and_then(Value::as_array))
                .filter(|a| !a.is_empty())
                .cloned()
        };

        Self {
            full_name,
            phone: first_string(c, &["phone"]),
            headline: first_string(c, &["headline"]),
            summary: first_string(c, &["summary", "cover_letter"]),
            location,
            skills: skills.filter(|s| !s.is_empty()),
            education: entries(&["education_entries", "education"]),
            experience: entries(&["experience_entries", "experience"]),
            profile_url: first_string(c, &["profile_url", "url"]),
        }
    }
}

fn html_to_markdown(html: &str) -> String {
    match htmd::convert(html) {
        Ok(md) => md.trim().to_string(),
        Err(_) => HTML_TAG
            .replace_all(html, " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Render a job (listing entry merged with details) as Markdown spec text.
pub fn render_job_spec(title: &str, job: &Value) -> String {
    let mut out = format!("# {}\n", title.trim());
    if let Some(desc) = first_string(job, &["full_description", "description"]) {
        out.push('\n');
        out.push_str(&html_to_markdown(&desc));
        out.push('\n');
    }
    for (key, heading) in [("requirements", "Requirements"), ("benefits", "Benefits")] {
        if let Some(html) = job.get(key).and_then(scalar_string) {
            let md = html_to_markdown(&html);
            if !md.is_empty() {
                out.push_str(&format!("\n## {}\n\n{}\n", heading, md));
            }
        }
    }
    out
}
