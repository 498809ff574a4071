//! Event type names for job updates published on the push channel.
//!
//! The remote worker publishes one of these per observed change. The
//! payload of each is a partial job record (see [`JobUpdate`](crate::job::JobUpdate)).

/// Progress update while a job is queued or running.
pub const MSG_TYPE_JOB_PROGRESS: &str = "job_progress";

/// Job completed successfully.
pub const MSG_TYPE_JOB_COMPLETED: &str = "job_completed";

/// Job failed with an error.
pub const MSG_TYPE_JOB_FAILED: &str = "job_failed";

/// Whether `event_type` carries a job update payload.
pub fn is_job_event(event_type: &str) -> bool {
    matches!(
        event_type,
        MSG_TYPE_JOB_PROGRESS | MSG_TYPE_JOB_COMPLETED | MSG_TYPE_JOB_FAILED
    )
}
