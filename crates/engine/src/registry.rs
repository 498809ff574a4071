//! Bounded, per-owner store of reconciled job records.
//!
//! [`JobRegistry`] is the single writer for job state. Every mutation goes
//! through [`JobRegistry::merge`], which:
//!
//! 1. applies each update through [`JobRecord::apply`] (state machine and
//!    terminal freeze),
//! 2. skips the write when the result equals the stored record, so the
//!    stored `Arc` keeps its identity and memoized readers stay valid,
//! 3. runs retention for every owner it touched.
//!
//! Retention keeps at most `N - active` terminal records per owner, newest
//! first. Active records are never evicted.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use jobsync_core::job::{JobRecord, JobUpdate};
use jobsync_core::types::{JobId, OwnerId};
use tokio::sync::RwLock;

use crate::buffer::MergeSink;
use crate::config::EngineConfig;

/// Counts describing one merge pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    /// Records seen for the first time.
    pub created: usize,
    /// Existing records replaced with a changed copy.
    pub updated: usize,
    /// Updates that produced no change (write skipped).
    pub unchanged: usize,
    /// Updates dropped entirely (blank id, first sighting without owner).
    pub dropped: usize,
    /// Individual fields ignored as stale or contradictory.
    pub rejected_fields: usize,
    /// Terminal records removed by retention.
    pub evicted: usize,
}

/// In-memory job store shared by every engine in the process.
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<JobRecord>>>,
    retention_window: usize,
    presentation_limit: usize,
}

impl JobRegistry {
    /// Create an empty registry.
    ///
    /// * `retention_window`   - records kept per owner after eviction (`N`).
    /// * `presentation_limit` - cap applied by [`list_for_owner`](Self::list_for_owner).
    pub fn new(retention_window: usize, presentation_limit: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention_window,
            presentation_limit,
        }
    }

    /// Create a registry using the limits from `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.retention_window, config.presentation_limit)
    }

    /// Merge a batch of updates keyed by job id, then apply retention.
    ///
    /// The map key is authoritative; an `id` inside the update is ignored.
    pub async fn merge(&self, updates: HashMap<JobId, JobUpdate>) -> MergeReport {
        let mut report = MergeReport::default();
        let mut touched: HashSet<OwnerId> = HashSet::new();
        let mut jobs = self.jobs.write().await;

        for (job_id, mut update) in updates {
            if job_id.trim().is_empty() {
                tracing::warn!("Dropping job update with blank id");
                report.dropped += 1;
                continue;
            }

            let Some(existing) = jobs.get(&job_id).cloned() else {
                update.id = Some(job_id.clone());
                match update.into_record() {
                    Ok(record) => {
                        tracing::debug!(
                            job_id = %record.id,
                            owner_id = %record.owner_id,
                            status = %record.status,
                            "Tracking new job",
                        );
                        touched.insert(record.owner_id.clone());
                        jobs.insert(job_id, Arc::new(record));
                        report.created += 1;
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Dropping first sighting of job");
                        report.dropped += 1;
                    }
                }
                continue;
            };

            let transition = existing.apply(&update);

            if !transition.rejected.is_empty() {
                report.rejected_fields += transition.rejected.len();
                if existing.status.is_terminal() {
                    tracing::warn!(
                        job_id = %job_id,
                        owner_id = %existing.owner_id,
                        status = %existing.status,
                        rejected = ?transition.rejected,
                        "Ignoring update fields that contradict a finished job",
                    );
                } else {
                    tracing::debug!(
                        job_id = %job_id,
                        status = %existing.status,
                        rejected = ?transition.rejected,
                        "Ignoring stale update fields",
                    );
                }
            }

            if transition.record == *existing {
                report.unchanged += 1;
                continue;
            }

            if transition.record.status != existing.status {
                tracing::info!(
                    job_id = %job_id,
                    owner_id = %existing.owner_id,
                    from = %existing.status,
                    to = %transition.record.status,
                    "Job status changed",
                );
            }

            touched.insert(existing.owner_id.clone());
            jobs.insert(job_id, Arc::new(transition.record));
            report.updated += 1;
        }

        for owner_id in &touched {
            report.evicted += evict_terminal(&mut jobs, owner_id, self.retention_window);
        }

        if report.evicted > 0 {
            tracing::debug!(evicted = report.evicted, "Retention evicted finished jobs");
        }

        report
    }

    /// The presenter view for one owner: newest first, capped to the
    /// presentation limit. Unchanged records keep their `Arc` identity
    /// between calls.
    pub async fn list_for_owner(&self, owner_id: &str) -> Vec<Arc<JobRecord>> {
        let jobs = self.jobs.read().await;
        let mut owned: Vec<Arc<JobRecord>> = jobs
            .values()
            .filter(|record| record.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| newest_first(a, b));
        owned.truncate(self.presentation_limit);
        owned
    }

    /// Delete every finished job of `owner_id` immediately, ignoring the
    /// retention window. Returns the number removed.
    pub async fn clear_terminal(&self, owner_id: &str) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, record| record.owner_id != owner_id || record.is_active());
        let removed = before - jobs.len();

        if removed > 0 {
            tracing::info!(owner_id, removed, "Cleared finished jobs");
        }
        removed
    }

    /// Ids of the owner's queued or running jobs, sorted.
    pub async fn active_job_ids(&self, owner_id: &str) -> Vec<JobId> {
        let jobs = self.jobs.read().await;
        let mut ids: Vec<JobId> = jobs
            .values()
            .filter(|record| record.owner_id == owner_id && record.is_active())
            .map(|record| record.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Look up a single job.
    pub async fn get(&self, job_id: &str) -> Option<Arc<JobRecord>> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// Total records across all owners.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl MergeSink for JobRegistry {
    async fn apply_batch(&self, batch: HashMap<JobId, JobUpdate>) {
        self.merge(batch).await;
    }
}

/// Recency descending, ties by id so the order is total.
fn newest_first(a: &JobRecord, b: &JobRecord) -> Ordering {
    b.recency()
        .cmp(&a.recency())
        .then_with(|| a.id.cmp(&b.id))
}

/// Remove the owner's oldest terminal records beyond `window - active`.
fn evict_terminal(
    jobs: &mut HashMap<JobId, Arc<JobRecord>>,
    owner_id: &str,
    window: usize,
) -> usize {
    let mut active = 0usize;
    let mut terminal: Vec<&Arc<JobRecord>> = Vec::new();
    for record in jobs.values().filter(|record| record.owner_id == owner_id) {
        if record.is_active() {
            active += 1;
        } else {
            terminal.push(record);
        }
    }

    let budget = window.saturating_sub(active);
    if terminal.len() <= budget {
        return 0;
    }

    terminal.sort_by(|a, b| newest_first(a, b));
    let doomed: Vec<JobId> = terminal[budget..]
        .iter()
        .map(|record| record.id.clone())
        .collect();

    for job_id in &doomed {
        jobs.remove(job_id);
    }
    doomed.len()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
