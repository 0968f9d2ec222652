//! Row and input models used by repositories.
//!
//! Keep these structs focused on the data moved in and out of queries.
//! Sync logic lives in `crate::sync`.

use chrono::{DateTime, Utc};

use crate::model::{LastSyncSummary, ProgressSnapshot, RecordState};
use crate::workable::payload::{CandidateProfile, JobIdentifiers};
use crate::workable::score::WorkableScore;

/// Connection details needed to build a remote client for one organization.
#[derive(Debug, Clone)]
pub struct OrgCredentials {
    pub organization_id: i64,
    pub subdomain: Option<String>,
    pub access_token: Option<String>,
    pub connected: bool,
}

impl OrgCredentials {
    /// Subdomain and token when the organization is connected and both are set.
    pub fn usable(&self) -> Option<(&str, &str)> {
        if !self.connected {
            return None;
        }
        let subdomain = self.subdomain.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let token = self.access_token.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        Some((subdomain, token))
    }
}

#[derive(Debug, Clone)]
pub struct OrganizationRow {
    pub id: i64,
    pub name: String,
    pub connected: bool,
    pub sync_started_at: Option<DateTime<Utc>>,
    pub sync_progress: Option<ProgressSnapshot>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<String>,
    pub last_sync_summary: Option<LastSyncSummary>,
}

#[derive(Debug, Clone)]
pub struct RoleRow {
    pub id: i64,
    pub external_job_id: String,
    pub name: String,
    pub remote_state: Option<String>,
    pub job_spec_text: Option<String>,
    pub job_spec_file_path: Option<String>,
    pub record_state: RecordState,
}

#[derive(Debug, Clone)]
pub struct CandidateRow {
    pub id: i64,
    pub external_candidate_id: Option<String>,
    pub email: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub headline: Option<String>,
    pub location: Option<String>,
    pub skills: Vec<String>,
    pub record_state: RecordState,
}

#[derive(Debug, Clone)]
pub struct ApplicationRow {
    pub id: i64,
    pub candidate_id: i64,
    pub role_id: i64,
    pub source: String,
    pub status: Option<String>,
    pub workable_stage: Option<String>,
    pub workable_score_raw: Option<f64>,
    pub workable_score: Option<f64>,
    pub workable_score_source: Option<String>,
    pub rank_score: Option<f64>,
    pub record_state: RecordState,
}

/// Role fields written on every sighting of a remote job.
#[derive(Debug)]
pub struct RoleUpsert<'a> {
    pub organization_id: i64,
    pub identifiers: &'a JobIdentifiers,
    pub name: &'a str,
    pub remote_state: Option<&'a str>,
    pub job_spec_text: Option<&'a str>,
    pub job_spec_file_path: Option<&'a str>,
}

#[derive(Debug)]
pub struct CandidateUpsert<'a> {
    pub organization_id: i64,
    pub external_candidate_id: Option<&'a str>,
    pub email: &'a str,
    pub profile: &'a CandidateProfile,
}

#[derive(Debug)]
pub struct ApplicationUpsert<'a> {
    pub organization_id: i64,
    pub candidate_id: i64,
    pub role_id: i64,
    pub stage: Option<&'a str>,
    pub score: Option<&'a WorkableScore>,
}
