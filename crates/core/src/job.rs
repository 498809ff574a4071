//! Job records, partial updates, and the job status state machine.
//!
//! A [`JobRecord`] is the reconciled view of one bulk-import job. It only
//! ever changes by applying a [`JobUpdate`] through [`JobRecord::apply`],
//! which enforces the state machine:
//!
//! ```text
//! queued -> running -> completed
//!        \          \-> failed
//!         \-> completed | failed
//! ```
//!
//! Terminal records are frozen. Updates that contradict them are rejected
//! field by field; the rest of the update still applies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::recency::recency_key;
use crate::types::{EpochMillis, JobId, OwnerId};

/// Error text recorded when a job is reported failed without a reason.
pub const UNKNOWN_ERROR: &str = "unknown error";

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of an import job.
///
/// The remote feed uses both `processing` and `running` for the same state;
/// both deserialize to [`JobStatus::Running`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    #[serde(alias = "processing")]
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Canonical wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// `completed` and `failed` have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Queued or running.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Position in the lifecycle. A status may only move to an equal or
    /// higher rank.
    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "running" | "processing" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// JobRecord
// ---------------------------------------------------------------------------

/// Reconciled status of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub owner_id: OwnerId,
    pub status: JobStatus,
    pub processed: u64,
    /// `0` while the job is queued and the item count is not yet known.
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    /// Only set when `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Only set when `status` is `completed`. Forwarded verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
}

/// Result of applying an update to an existing record.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// The record after the update. Equal to the original when nothing
    /// applicable changed.
    pub record: JobRecord,
    /// Wire names of the fields that were ignored because they would have
    /// regressed or contradicted the record.
    pub rejected: Vec<&'static str>,
}

impl JobRecord {
    /// Whether the job is queued or running.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Ordering key: `created_at ?? started_at ?? finished_at` in epoch ms.
    pub fn recency(&self) -> EpochMillis {
        recency_key(
            self.created_at.as_deref(),
            self.started_at.as_deref(),
            self.finished_at.as_deref(),
        )
    }

    /// Apply `update` on top of this record.
    ///
    /// The update's `id` is not consulted; callers route updates by id.
    pub fn apply(&self, update: &JobUpdate) -> Transition {
        let mut next = self.clone();
        let mut rejected = Vec::new();

        if let Some(owner) = &update.owner_id {
            if *owner != self.owner_id {
                rejected.push("ownerId");
            }
        }

        if self.status.is_terminal() {
            // Frozen. Timestamps never observed before may still be filled in.
            fill_if_missing(&mut next.created_at, &update.created_at);
            fill_if_missing(&mut next.started_at, &update.started_at);
            fill_if_missing(&mut next.finished_at, &update.finished_at);

            reject_if_differs(&mut rejected, "status", update.status, self.status);
            reject_if_differs(&mut rejected, "processed", update.processed, self.processed);
            reject_if_differs(&mut rejected, "total", update.total, self.total);
            if update.error.is_some() && update.error != self.error {
                rejected.push("error");
            }
            if update.results.is_some() && update.results != self.results {
                rejected.push("results");
            }

            return Transition {
                record: next,
                rejected,
            };
        }

        if let Some(status) = update.status {
            if status.rank() >= self.status.rank() {
                next.status = status;
            } else {
                rejected.push("status");
            }
        }
        if let Some(total) = update.total {
            // A known total never reverts to unknown, and never drops below
            // what has already been processed.
            let stale = total != self.total
                && ((self.total > 0 && total == 0) || (total > 0 && total < self.processed));
            if stale {
                rejected.push("total");
            } else {
                next.total = total;
            }
        }
        if let Some(processed) = update.processed {
            if processed >= self.processed {
                next.processed = processed;
            } else {
                rejected.push("processed");
            }
        }
        overwrite_if_present(&mut next.created_at, &update.created_at);
        overwrite_if_present(&mut next.started_at, &update.started_at);
        overwrite_if_present(&mut next.finished_at, &update.finished_at);
        overwrite_if_present(&mut next.error, &update.error);
        overwrite_if_present(&mut next.results, &update.results);

        next.normalize();

        Transition {
            record: next,
            rejected,
        }
    }

    /// Enforce the per-status field invariants.
    fn normalize(&mut self) {
        if self.total > 0 && self.processed > self.total {
            self.processed = self.total;
        }
        match self.status {
            JobStatus::Completed => {
                self.error = None;
                if self.results.is_none() {
                    self.results = Some(Value::Object(Default::default()));
                }
            }
            JobStatus::Failed => {
                self.results = None;
                if self.error.is_none() {
                    self.error = Some(UNKNOWN_ERROR.to_string());
                }
            }
            JobStatus::Queued | JobStatus::Running => {
                self.error = None;
                self.results = None;
            }
        }
    }
}

fn fill_if_missing<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
    if slot.is_none() {
        slot.clone_from(incoming);
    }
}

fn overwrite_if_present<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *slot = Some(value.clone());
    }
}

fn reject_if_differs<T: PartialEq>(
    rejected: &mut Vec<&'static str>,
    field: &'static str,
    incoming: Option<T>,
    current: T,
) {
    if incoming.is_some_and(|value| value != current) {
        rejected.push(field);
    }
}

// ---------------------------------------------------------------------------
// JobUpdate
// ---------------------------------------------------------------------------

/// A partial job record: the shape of job-creation responses, push event
/// payloads and poll results.
///
/// Every field is optional. Identifiers may arrive as JSON strings or
/// numbers and are normalised to strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdate {
    #[serde(
        default,
        deserialize_with = "deserialize_opaque_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<JobId>,
    #[serde(
        default,
        alias = "owner_id",
        deserialize_with = "deserialize_opaque_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_id: Option<OwnerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, alias = "created_at", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, alias = "started_at", skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, alias = "finished_at", skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
}

impl JobUpdate {
    /// Start an update for the given job.
    pub fn for_job(id: impl Into<JobId>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<OwnerId>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_processed(mut self, processed: u64) -> Self {
        self.processed = Some(processed);
        self
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    /// Set `processed` and `total` together.
    pub fn with_progress(self, processed: u64, total: u64) -> Self {
        self.with_processed(processed).with_total(total)
    }

    pub fn with_created_at(mut self, ts: impl Into<String>) -> Self {
        self.created_at = Some(ts.into());
        self
    }

    pub fn with_started_at(mut self, ts: impl Into<String>) -> Self {
        self.started_at = Some(ts.into());
        self
    }

    pub fn with_finished_at(mut self, ts: impl Into<String>) -> Self {
        self.finished_at = Some(ts.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_results(mut self, results: Value) -> Self {
        self.results = Some(results);
        self
    }

    /// The job id, if present and non-blank.
    pub fn job_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.trim().is_empty())
    }

    /// Shallow-merge a newer update into this one. Fields present in
    /// `newer` overwrite; absent fields keep their current value.
    ///
    /// A `newer` whose status ranks below the pending one, or that lacks a
    /// terminal status while a terminal one is pending, only fills fields
    /// that are still absent.
    pub fn merge_from(&mut self, newer: JobUpdate) {
        let stale = match (self.status, newer.status) {
            (Some(pending), Some(incoming)) => incoming.rank() < pending.rank(),
            (Some(pending), None) => pending.is_terminal(),
            (None, _) => false,
        };

        let JobUpdate {
            id,
            owner_id,
            status,
            processed,
            total,
            created_at,
            started_at,
            finished_at,
            error,
            results,
        } = newer;

        merge_field(&mut self.id, id, stale);
        merge_field(&mut self.owner_id, owner_id, stale);
        merge_field(&mut self.status, status, stale);
        merge_field(&mut self.processed, processed, stale);
        merge_field(&mut self.total, total, stale);
        merge_field(&mut self.created_at, created_at, stale);
        merge_field(&mut self.started_at, started_at, stale);
        merge_field(&mut self.finished_at, finished_at, stale);
        merge_field(&mut self.error, error, stale);
        merge_field(&mut self.results, results, stale);
    }

    /// Build the record for a job seen for the first time.
    ///
    /// Requires a non-blank `id` and `owner_id`. A missing status means
    /// `queued`; missing counters mean `0`.
    pub fn into_record(self) -> Result<JobRecord, CoreError> {
        let id = match self.job_id() {
            Some(id) => id.to_string(),
            None => return Err(CoreError::Validation("job update has no id".to_string())),
        };
        let owner_id = match self.owner_id.filter(|owner| !owner.trim().is_empty()) {
            Some(owner) => owner,
            None => {
                return Err(CoreError::Validation(format!(
                    "first sighting of job {id} has no owner"
                )))
            }
        };

        let mut record = JobRecord {
            id,
            owner_id,
            status: self.status.unwrap_or(JobStatus::Queued),
            processed: self.processed.unwrap_or(0),
            total: self.total.unwrap_or(0),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            error: self.error,
            results: self.results,
        };
        record.normalize();
        Ok(record)
    }
}

fn merge_field<T>(slot: &mut Option<T>, incoming: Option<T>, fill_only: bool) {
    if incoming.is_some() && (slot.is_none() || !fill_only) {
        *slot = incoming;
    }
}

/// Accept a JSON string or number as an identifier.
fn deserialize_opaque_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or numeric id, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
