//! Plain-text rendering of the presenter view.

use jobsync_core::job::{JobRecord, JobStatus};
use jobsync_engine::JobRegistry;

/// Whole-number completion percentage, or `None` while the total is unknown.
pub fn percent(processed: u64, total: u64) -> Option<u64> {
    (total > 0).then(|| processed.min(total) * 100 / total)
}

/// One line per job, e.g. `42  running    30/120 (25%)`.
pub fn render_line(record: &JobRecord) -> String {
    let progress = match percent(record.processed, record.total) {
        Some(pct) => format!("{}/{} ({pct}%)", record.processed, record.total),
        None => format!("{}/?", record.processed),
    };

    let mut line = format!("{:<12} {:<10} {progress}", record.id, record.status.as_str());
    if record.status == JobStatus::Failed {
        if let Some(error) = &record.error {
            line.push_str(&format!("  error: {error}"));
        }
    }
    line
}

/// Whether `owner_id` has tracked jobs and none of them is still active.
///
/// Looks at every retained job, not just the presenter view.
pub async fn all_finished(registry: &JobRegistry, owner_id: &str) -> bool {
    !registry.list_for_owner(owner_id).await.is_empty()
        && registry.active_job_ids(owner_id).await.is_empty()
}
