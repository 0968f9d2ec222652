use super::model::{
    ApplicationRow, ApplicationUpsert, CandidateRow, CandidateUpsert, OrgCredentials,
    OrganizationRow, RoleRow, RoleUpsert,
};
use crate::model::{
    LastSyncSummary, ProgressSnapshot, RecordState, RunCounters, RunPhase, RunSnapshot, RunStatus,
    SyncMode,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {normalized}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/` and create the parent
/// directory. In-memory and non-sqlite URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }
    let rest = &url["sqlite:".len()..];
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{path}?{q}"),
        None => format!("sqlite://{path}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Organizations
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn create_organization(pool: &Pool, name: &str) -> Result<i64> {
    let res = sqlx::query("INSERT INTO organizations (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await?;
    Ok(res.last_insert_rowid())
}

/// Store remote credentials and mark the organization connected.
#[instrument(skip_all)]
pub async fn connect_organization(
    pool: &Pool,
    org_id: i64,
    subdomain: &str,
    access_token: &str,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE organizations SET workable_subdomain = ?, workable_access_token = ?, workable_connected = 1 WHERE id = ?",
    )
    .bind(subdomain.trim())
    .bind(access_token.trim())
    .bind(org_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn disconnect_organization(pool: &Pool, org_id: i64) -> Result<()> {
    sqlx::query("UPDATE organizations SET workable_connected = 0 WHERE id = ?")
        .bind(org_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn fetch_credentials(pool: &Pool, org_id: i64) -> Result<Option<OrgCredentials>> {
    let row = sqlx::query(
        "SELECT id, workable_subdomain, workable_access_token, workable_connected FROM organizations WHERE id = ?",
    )
    .bind(org_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| OrgCredentials {
        organization_id: r.get("id"),
        subdomain: r.get("workable_subdomain"),
        access_token: r.get("workable_access_token"),
        connected: r.get::<i64, _>("workable_connected") != 0,
    }))
}

#[instrument(skip_all)]
pub async fn fetch_organization(pool: &Pool, org_id: i64) -> Result<Option<OrganizationRow>> {
    let row = sqlx::query(
        "SELECT id, name, workable_connected, sync_started_at, sync_progress, last_sync_at, last_sync_status, last_sync_summary FROM organizations WHERE id = ?",
    )
    .bind(org_id)
    .fetch_optional(pool)
    .await?;
    let Some(r) = row else {
        return Ok(None);
    };
    let progress: Option<String> = r.get("sync_progress");
    let summary: Option<String> = r.get("last_sync_summary");
    Ok(Some(OrganizationRow {
        id: r.get("id"),
        name: r.get("name"),
        connected: r.get::<i64, _>("workable_connected") != 0,
        sync_started_at: r.get("sync_started_at"),
        sync_progress: progress.as_deref().map(serde_json::from_str).transpose()?,
        last_sync_at: r.get("last_sync_at"),
        last_sync_status: r.get("last_sync_status"),
        last_sync_summary: summary.as_deref().map(serde_json::from_str).transpose()?,
    }))
}

/// Connected organizations whose last sync is older than `synced_before` and
/// that have no run in flight.
#[instrument(skip_all)]
pub async fn organizations_due_for_sync(
    pool: &Pool,
    synced_before: DateTime<Utc>,
) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT o.id FROM organizations o
         WHERE o.workable_connected = 1
           AND (o.last_sync_at IS NULL OR o.last_sync_at < ?)
           AND NOT EXISTS (
             SELECT 1 FROM sync_runs r
             WHERE r.organization_id = o.id AND r.status = 'running' AND r.finished_at IS NULL
           )
         ORDER BY o.id",
    )
    .bind(synced_before)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

#[instrument(skip_all)]
pub async fn begin_org_progress(
    pool: &Pool,
    org_id: i64,
    started_at: DateTime<Utc>,
    progress: &ProgressSnapshot,
) -> Result<()> {
    sqlx::query("UPDATE organizations SET sync_started_at = ?, sync_progress = ? WHERE id = ?")
        .bind(started_at)
        .bind(serde_json::to_string(progress)?)
        .bind(org_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn update_org_progress(
    pool: &Pool,
    org_id: i64,
    progress: &ProgressSnapshot,
) -> Result<()> {
    sqlx::query("UPDATE organizations SET sync_progress = ? WHERE id = ?")
        .bind(serde_json::to_string(progress)?)
        .bind(org_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn clear_org_progress(pool: &Pool, org_id: i64) -> Result<()> {
    sqlx::query("UPDATE organizations SET sync_started_at = NULL, sync_progress = NULL WHERE id = ?")
        .bind(org_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn write_last_sync(
    pool: &Pool,
    org_id: i64,
    at: DateTime<Utc>,
    summary: &LastSyncSummary,
) -> Result<()> {
    sqlx::query(
        "UPDATE organizations SET last_sync_at = ?, last_sync_status = ?, last_sync_summary = ? WHERE id = ?",
    )
    .bind(at)
    .bind(summary.status.as_str())
    .bind(serde_json::to_string(summary)?)
    .bind(org_id)
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Run ledger
// ---------------------------------------------------------------------------

const RUN_COLUMNS: &str = "id, organization_id, mode, status, phase, job_filter, jobs_total, jobs_processed, candidates_seen, candidates_upserted, applications_upserted, errors, started_at, finished_at, cancel_requested_at";

fn run_from_row(r: &SqliteRow) -> Result<RunSnapshot> {
    let mode: String = r.get("mode");
    let status: String = r.get("status");
    let errors: String = r.get("errors");
    Ok(RunSnapshot {
        id: r.get("id"),
        organization_id: r.get("organization_id"),
        mode: SyncMode::parse(&mode).ok_or_else(|| anyhow!("unknown sync mode {mode}"))?,
        status: RunStatus::parse(&status).ok_or_else(|| anyhow!("unknown run status {status}"))?,
        phase: r.get("phase"),
        job_filter: r.get("job_filter"),
        counters: RunCounters {
            jobs_total: r.get("jobs_total"),
            jobs_processed: r.get("jobs_processed"),
            candidates_seen: r.get("candidates_seen"),
            candidates_upserted: r.get("candidates_upserted"),
            applications_upserted: r.get("applications_upserted"),
        },
        errors: serde_json::from_str(&errors).context("run errors column is not a JSON list")?,
        started_at: r.get("started_at"),
        finished_at: r.get("finished_at"),
        cancel_requested_at: r.get("cancel_requested_at"),
    })
}

/// Create a `running` ledger row unless the organization already has one.
/// Returns `None` when another run holds the slot.
#[instrument(skip_all)]
pub async fn claim_run(
    pool: &Pool,
    org_id: i64,
    mode: SyncMode,
    job_filter: Option<&str>,
) -> Result<Option<i64>> {
    let now = Utc::now();
    let res = sqlx::query(
        "INSERT INTO sync_runs (organization_id, mode, status, phase, job_filter, errors, started_at, updated_at)
         SELECT ?, ?, 'running', ?, ?, '[]', ?, ?
         WHERE NOT EXISTS (
           SELECT 1 FROM sync_runs WHERE organization_id = ? AND status = 'running' AND finished_at IS NULL
         )",
    )
    .bind(org_id)
    .bind(mode.as_str())
    .bind(RunPhase::Queued.as_str())
    .bind(job_filter)
    .bind(now)
    .bind(now)
    .bind(org_id)
    .execute(pool)
    .await;
    match res {
        Ok(done) if done.rows_affected() == 0 => Ok(None),
        Ok(done) => Ok(Some(done.last_insert_rowid())),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[instrument(skip_all)]
pub async fn fetch_run(pool: &Pool, run_id: i64) -> Result<Option<RunSnapshot>> {
    let sql = format!("SELECT {RUN_COLUMNS} FROM sync_runs WHERE id = ?");
    let row = sqlx::query(&sql).bind(run_id).fetch_optional(pool).await?;
    row.as_ref().map(run_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn latest_run_for_org(pool: &Pool, org_id: i64) -> Result<Option<RunSnapshot>> {
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM sync_runs WHERE organization_id = ? ORDER BY id DESC LIMIT 1"
    );
    let row = sqlx::query(&sql).bind(org_id).fetch_optional(pool).await?;
    row.as_ref().map(run_from_row).transpose()
}

/// Persist a checkpoint. No-op once the run left `running`.
#[instrument(skip_all)]
pub async fn checkpoint_run(
    pool: &Pool,
    run_id: i64,
    phase: &str,
    counters: &RunCounters,
    errors: &[String],
) -> Result<()> {
    sqlx::query(
        "UPDATE sync_runs SET phase = ?, jobs_total = ?, jobs_processed = ?, candidates_seen = ?, candidates_upserted = ?, applications_upserted = ?, errors = ?, updated_at = ?
         WHERE id = ? AND status = 'running'",
    )
    .bind(phase)
    .bind(counters.jobs_total)
    .bind(counters.jobs_processed)
    .bind(counters.candidates_seen)
    .bind(counters.candidates_upserted)
    .bind(counters.applications_upserted)
    .bind(serde_json::to_string(errors)?)
    .bind(Utc::now())
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fresh read of the run's cancellation stamp.
#[instrument(skip_all)]
pub async fn run_cancel_requested(pool: &Pool, run_id: i64) -> Result<bool> {
    let stamped = sqlx::query_scalar::<_, i64>(
        "SELECT cancel_requested_at IS NOT NULL FROM sync_runs WHERE id = ?",
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await?;
    Ok(stamped.unwrap_or(0) != 0)
}

/// Stamp `cancel_requested_at` on a running run. Returns false if the run is
/// unknown or already terminal.
#[instrument(skip_all)]
pub async fn request_run_cancel(pool: &Pool, run_id: i64) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE sync_runs SET cancel_requested_at = COALESCE(cancel_requested_at, ?), updated_at = ?
         WHERE id = ? AND status = 'running' AND finished_at IS NULL",
    )
    .bind(Utc::now())
    .bind(Utc::now())
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Move a running run to a terminal status with its final counters. The
/// phase column takes the status label. Returns false if the run had
/// already been finalized.
#[instrument(skip_all)]
pub async fn finish_run(
    pool: &Pool,
    run_id: i64,
    status: RunStatus,
    counters: &RunCounters,
    errors: &[String],
) -> Result<bool> {
    let now = Utc::now();
    let res = sqlx::query(
        "UPDATE sync_runs SET status = ?, phase = ?, jobs_total = ?, jobs_processed = ?, candidates_seen = ?, candidates_upserted = ?, applications_upserted = ?, errors = ?, finished_at = ?, updated_at = ?
         WHERE id = ? AND status = 'running'",
    )
    .bind(status.as_str())
    .bind(status.as_str())
    .bind(counters.jobs_total)
    .bind(counters.jobs_processed)
    .bind(counters.candidates_seen)
    .bind(counters.candidates_upserted)
    .bind(counters.applications_upserted)
    .bind(serde_json::to_string(errors)?)
    .bind(now)
    .bind(now)
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Terminal stamp that keeps whatever counters were last checkpointed,
/// optionally appending one error. Used when the orchestrator could not
/// finalize the run itself.
#[instrument(skip_all)]
pub async fn stamp_run_terminal(
    pool: &Pool,
    run_id: i64,
    status: RunStatus,
    error: Option<&str>,
) -> Result<bool> {
    let Some(run) = fetch_run(pool, run_id).await? else {
        return Ok(false);
    };
    if run.status != RunStatus::Running {
        return Ok(false);
    }
    let mut errors = run.errors;
    if let Some(e) = error {
        errors.push(e.to_string());
    }
    finish_run(pool, run_id, status, &run.counters, &errors).await
}

/// Fail runs left `running` whose ledger row was last touched before
/// `idle_before`, and clear the progress of their organizations. Live runs
/// checkpoint regularly, so they stay newer than any sensible cut-off.
#[instrument(skip_all)]
pub async fn fail_stale_runs(
    pool: &Pool,
    idle_before: DateTime<Utc>,
    reason: &str,
) -> Result<Vec<i64>> {
    let stale = sqlx::query(
        "SELECT id, organization_id FROM sync_runs
         WHERE status = 'running' AND finished_at IS NULL AND updated_at < ?
         ORDER BY id",
    )
    .bind(idle_before)
    .fetch_all(pool)
    .await?;

    let mut ids = Vec::with_capacity(stale.len());
    for r in &stale {
        let run_id: i64 = r.get("id");
        let now = Utc::now();
        let done = sqlx::query(
            "UPDATE sync_runs
             SET status = 'failed', phase = 'failed', finished_at = ?, updated_at = ?,
                 errors = json_insert(errors, '$[#]', ?)
             WHERE id = ? AND status = 'running' AND updated_at < ?",
        )
        .bind(now)
        .bind(now)
        .bind(reason)
        .bind(run_id)
        .bind(idle_before)
        .execute(pool)
        .await?;
        if done.rows_affected() == 1 {
            clear_org_progress(pool, r.get("organization_id")).await?;
            ids.push(run_id);
        }
    }
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Imported entities
// ---------------------------------------------------------------------------

/// Insert or update the role for a remote job, matching on any of its
/// identifiers. A soft-deleted match is resurrected.
#[instrument(skip_all)]
pub async fn upsert_role(pool: &Pool, role: &RoleUpsert<'_>) -> Result<i64> {
    let primary = role
        .identifiers
        .primary()
        .ok_or_else(|| anyhow!("job has no identifier"))?;
    let now = Utc::now();

    let mut existing = None;
    for id in role.identifiers.iter() {
        existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM roles WHERE organization_id = ? AND external_job_id = ?",
        )
        .bind(role.organization_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;
        if existing.is_some() {
            break;
        }
    }

    if let Some(id) = existing {
        sqlx::query(
            "UPDATE roles SET name = ?, remote_state = COALESCE(?, remote_state),
                job_spec_text = COALESCE(?, job_spec_text), job_spec_file_path = COALESCE(?, job_spec_file_path),
                source = 'workable', record_state = 'active', deleted_at = NULL, last_synced_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(role.name)
        .bind(role.remote_state)
        .bind(role.job_spec_text)
        .bind(role.job_spec_file_path)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
        return Ok(id);
    }

    let res = sqlx::query(
        "INSERT INTO roles (organization_id, external_job_id, name, remote_state, job_spec_text, job_spec_file_path, source, record_state, last_synced_at, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, 'workable', 'active', ?, ?, ?)",
    )
    .bind(role.organization_id)
    .bind(primary)
    .bind(role.name)
    .bind(role.remote_state)
    .bind(role.job_spec_text)
    .bind(role.job_spec_file_path)
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(res.last_insert_rowid())
}

fn json_list<T: serde::Serialize>(v: Option<&Vec<T>>) -> Result<Option<String>> {
    Ok(v.map(serde_json::to_string).transpose()?)
}

/// Insert or update a candidate matched by remote id, then by email. Profile
/// fields merge: a missing incoming value keeps the stored one.
#[instrument(skip_all)]
pub async fn upsert_candidate(pool: &Pool, c: &CandidateUpsert<'_>) -> Result<i64> {
    let email = c.email.trim().to_lowercase();
    let p = c.profile;
    let skills = json_list(p.skills.as_ref())?;
    let education = json_list(p.education.as_ref())?;
    let experience = json_list(p.experience.as_ref())?;
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    let mut existing = None;
    if let Some(ext) = c.external_candidate_id {
        existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM candidates WHERE organization_id = ? AND external_candidate_id = ?",
        )
        .bind(c.organization_id)
        .bind(ext)
        .fetch_optional(&mut *tx)
        .await?;
    }
    if existing.is_none() {
        existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM candidates WHERE organization_id = ? AND lower(email) = ? ORDER BY id LIMIT 1",
        )
        .bind(c.organization_id)
        .bind(&email)
        .fetch_optional(&mut *tx)
        .await?;
    }

    let id = if let Some(id) = existing {
        sqlx::query(
            "UPDATE candidates SET
                external_candidate_id = COALESCE(external_candidate_id, ?),
                email = ?,
                full_name = COALESCE(?, full_name),
                phone = COALESCE(?, phone),
                headline = COALESCE(?, headline),
                summary = COALESCE(?, summary),
                location = COALESCE(?, location),
                skills = COALESCE(?, skills),
                education = COALESCE(?, education),
                experience = COALESCE(?, experience),
                profile_url = COALESCE(?, profile_url),
                record_state = 'active', deleted_at = NULL, updated_at = ?
             WHERE id = ?",
        )
        .bind(c.external_candidate_id)
        .bind(&email)
        .bind(&p.full_name)
        .bind(&p.phone)
        .bind(&p.headline)
        .bind(&p.summary)
        .bind(&p.location)
        .bind(&skills)
        .bind(&education)
        .bind(&experience)
        .bind(&p.profile_url)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        id
    } else {
        let res = sqlx::query(
            "INSERT INTO candidates (organization_id, external_candidate_id, email, full_name, phone, headline, summary, location, skills, education, experience, profile_url, record_state, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?)",
        )
        .bind(c.organization_id)
        .bind(c.external_candidate_id)
        .bind(&email)
        .bind(&p.full_name)
        .bind(&p.phone)
        .bind(&p.headline)
        .bind(&p.summary)
        .bind(&p.location)
        .bind(&skills)
        .bind(&education)
        .bind(&experience)
        .bind(&p.profile_url)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        res.last_insert_rowid()
    };

    tx.commit().await?;
    Ok(id)
}

/// Insert or update the candidate/role application. `rank_score` prefers the
/// normalized remote score and falls back to a stored CV-match score.
#[instrument(skip_all)]
pub async fn upsert_application(pool: &Pool, a: &ApplicationUpsert<'_>) -> Result<i64> {
    let now = Utc::now();
    let raw = a.score.map(|s| s.raw);
    let normalized = a.score.and_then(|s| s.normalized);
    let score_source = a.score.map(|s| s.source.as_str());

    let existing = sqlx::query(
        "SELECT id, cv_match_score FROM candidate_applications WHERE candidate_id = ? AND role_id = ?",
    )
    .bind(a.candidate_id)
    .bind(a.role_id)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = existing {
        let id: i64 = row.get("id");
        let cv_match: Option<f64> = row.get("cv_match_score");
        sqlx::query(
            "UPDATE candidate_applications SET
                source = 'workable',
                status = COALESCE(?, status),
                workable_stage = COALESCE(?, workable_stage),
                workable_score_raw = ?,
                workable_score = ?,
                workable_score_source = ?,
                rank_score = ?,
                record_state = 'active', deleted_at = NULL, last_synced_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(a.stage)
        .bind(a.stage)
        .bind(raw)
        .bind(normalized)
        .bind(score_source)
        .bind(normalized.or(cv_match))
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
        return Ok(id);
    }

    let res = sqlx::query(
        "INSERT INTO candidate_applications (organization_id, candidate_id, role_id, source, status, workable_stage, workable_score_raw, workable_score, workable_score_source, rank_score, record_state, last_synced_at, created_at, updated_at)
         VALUES (?, ?, ?, 'workable', ?, ?, ?, ?, ?, ?, 'active', ?, ?, ?)",
    )
    .bind(a.organization_id)
    .bind(a.candidate_id)
    .bind(a.role_id)
    .bind(a.stage)
    .bind(a.stage)
    .bind(raw)
    .bind(normalized)
    .bind(score_source)
    .bind(normalized)
    .bind(now)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(res.last_insert_rowid())
}

fn record_state(r: &SqliteRow) -> Result<RecordState> {
    let s: String = r.get("record_state");
    RecordState::parse(&s).ok_or_else(|| anyhow!("unknown record state {s}"))
}

#[instrument(skip_all)]
pub async fn list_roles(pool: &Pool, org_id: i64) -> Result<Vec<RoleRow>> {
    let rows = sqlx::query(
        "SELECT id, external_job_id, name, remote_state, job_spec_text, job_spec_file_path, record_state
         FROM roles WHERE organization_id = ? ORDER BY id",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|r| -> Result<RoleRow> {
            Ok(RoleRow {
                id: r.get("id"),
                external_job_id: r.get("external_job_id"),
                name: r.get("name"),
                remote_state: r.get("remote_state"),
                job_spec_text: r.get("job_spec_text"),
                job_spec_file_path: r.get("job_spec_file_path"),
                record_state: record_state(r)?,
            })
        })
        .collect()
}

#[instrument(skip_all)]
pub async fn list_candidates(pool: &Pool, org_id: i64) -> Result<Vec<CandidateRow>> {
    let rows = sqlx::query(
        "SELECT id, external_candidate_id, email, full_name, phone, headline, location, skills, record_state
         FROM candidates WHERE organization_id = ? ORDER BY id",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|r| -> Result<CandidateRow> {
            let skills: Option<String> = r.get("skills");
            Ok(CandidateRow {
                id: r.get("id"),
                external_candidate_id: r.get("external_candidate_id"),
                email: r.get("email"),
                full_name: r.get("full_name"),
                phone: r.get("phone"),
                headline: r.get("headline"),
                location: r.get("location"),
                skills: skills
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()?
                    .unwrap_or_default(),
                record_state: record_state(r)?,
            })
        })
        .collect()
}

#[instrument(skip_all)]
pub async fn list_applications(pool: &Pool, org_id: i64) -> Result<Vec<ApplicationRow>> {
    let rows = sqlx::query(
        "SELECT id, candidate_id, role_id, source, status, workable_stage, workable_score_raw, workable_score, workable_score_source, rank_score, record_state
         FROM candidate_applications WHERE organization_id = ? ORDER BY id",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|r| -> Result<ApplicationRow> {
            Ok(ApplicationRow {
                id: r.get("id"),
                candidate_id: r.get("candidate_id"),
                role_id: r.get("role_id"),
                source: r.get("source"),
                status: r.get("status"),
                workable_stage: r.get("workable_stage"),
                workable_score_raw: r.get("workable_score_raw"),
                workable_score: r.get("workable_score"),
                workable_score_source: r.get("workable_score_source"),
                rank_score: r.get("rank_score"),
                record_state: record_state(r)?,
            })
        })
        .collect()
}
