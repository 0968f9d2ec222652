use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal and in-flight states of a sync run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Partial,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "partial" => Some(RunStatus::Partial),
            "cancelled" => Some(RunStatus::Cancelled),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Checkpoint label recorded on the run while it is in flight. Once the run
/// finalizes, the phase column carries the terminal status instead.
///
/// Phases only move forward, except that `ListingCandidates` and
/// `SyncingCandidate` alternate once per job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Queued,
    ListingJobs,
    ListingCandidates,
    SyncingCandidate,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Queued => "queued",
            RunPhase::ListingJobs => "listing_jobs",
            RunPhase::ListingCandidates => "listing_candidates",
            RunPhase::SyncingCandidate => "syncing_candidate",
        }
    }
}

/// Requested depth of a sync. `Full` currently runs the metadata pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Metadata,
    Full,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Metadata => "metadata",
            SyncMode::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "metadata" => Some(SyncMode::Metadata),
            "full" => Some(SyncMode::Full),
            _ => None,
        }
    }
}

/// Soft-delete lifecycle of imported roles, candidates and applications.
/// A row that does not exist is the third ("absent") state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    Active,
    Deleted,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::Active => "active",
            RecordState::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(RecordState::Active),
            "deleted" => Some(RecordState::Deleted),
            _ => None,
        }
    }
}

/// Monotonic counters persisted at every checkpoint.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunCounters {
    pub jobs_total: i64,
    pub jobs_processed: i64,
    pub candidates_seen: i64,
    pub candidates_upserted: i64,
    pub applications_upserted: i64,
}

/// Point-in-time view of one run ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub id: i64,
    pub organization_id: i64,
    pub mode: SyncMode,
    pub status: RunStatus,
    pub phase: String,
    pub job_filter: Option<String>,
    pub counters: RunCounters,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancel_requested_at: Option<DateTime<Utc>>,
}

impl RunSnapshot {
    pub fn is_active(&self) -> bool {
        self.status == RunStatus::Running && self.finished_at.is_none()
    }
}

/// Transient progress mirrored onto the organization row while a run is live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub run_id: i64,
    pub phase: String,
    #[serde(flatten)]
    pub counters: RunCounters,
    pub errors: usize,
}

/// Summary written to the organization when a run finalizes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastSyncSummary {
    pub run_id: i64,
    pub status: RunStatus,
    #[serde(flatten)]
    pub counters: RunCounters,
    pub errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Partial,
            RunStatus::Cancelled,
            RunStatus::Failed,
        ] {
            assert_eq!(RunStatus::parse(s.as_str()), Some(s));
        }
        assert!(RunStatus::parse("queued").is_none());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn progress_snapshot_flattens_counters() {
        let snap = ProgressSnapshot {
            run_id: 7,
            phase: RunPhase::SyncingCandidate.as_str().into(),
            counters: RunCounters {
                candidates_seen: 3,
                ..Default::default()
            },
            errors: 0,
        };
        let v = serde_json::to_value(&snap).unwrap();
        assert_eq!(v["phase"], "syncing_candidate");
        assert_eq!(v["candidates_seen"], 3);
    }
}
