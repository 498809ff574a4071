//! Poll feed: periodically fetches the status of every active job.
//!
//! Each tick spawns one cycle. A cycle fetches all of the owner's active
//! jobs concurrently, each fetch bounded by a timeout, and feeds the
//! results into the [`UpdateBuffer`]. A tick that lands while the previous
//! cycle is still running is skipped. Cancelling the loop stops new cycles
//! only; fetches already in flight finish and are merged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use jobsync_core::job::JobUpdate;
use jobsync_core::types::{JobId, OwnerId};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::buffer::UpdateBuffer;
use crate::config::EngineConfig;
use crate::registry::JobRegistry;

/// Errors from a single status fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("status request failed: {0}")]
    Request(String),

    #[error("malformed status response: {0}")]
    Malformed(String),
}

/// Fetches the current state of one job from the remote service.
#[async_trait]
pub trait JobStatusFetcher: Send + Sync {
    async fn fetch_status(&self, job_id: &str) -> Result<JobUpdate, FetchError>;
}

/// Outcome counts of one poll cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollCycleReport {
    /// Active jobs fetched this cycle.
    pub requested: usize,
    /// Results handed to the buffer.
    pub succeeded: usize,
    /// Fetches that returned an error.
    pub failed: usize,
    /// Fetches that exceeded the timeout.
    pub timed_out: usize,
    /// Results dropped for naming another job or owner.
    pub discarded: usize,
}

enum FetchOutcome {
    Ingested,
    Failed,
    TimedOut,
    Discarded,
}

/// Periodic status poller for one owner.
pub struct PollReconciler {
    owner_id: OwnerId,
    registry: Arc<JobRegistry>,
    fetcher: Arc<dyn JobStatusFetcher>,
    buffer: UpdateBuffer,
    interval: Duration,
    fetch_timeout: Duration,
}

impl PollReconciler {
    pub fn new(
        owner_id: impl Into<OwnerId>,
        registry: Arc<JobRegistry>,
        fetcher: Arc<dyn JobStatusFetcher>,
        buffer: UpdateBuffer,
        config: &EngineConfig,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            registry,
            fetcher,
            buffer,
            interval: config.poll_interval,
            fetch_timeout: config.fetch_timeout,
        }
    }

    /// Run the poll loop until the cancellation token is triggered.
    ///
    /// The first cycle starts immediately.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<PollCycleReport>> = None;

        tracing::info!(
            owner_id = %self.owner_id,
            poll_interval_ms = self.interval.as_millis() as u64,
            "Job status poller started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(owner_id = %self.owner_id, "Job status poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if in_flight.as_ref().is_some_and(|cycle| !cycle.is_finished()) {
                        tracing::debug!(owner_id = %self.owner_id, "Previous poll cycle still running, skipping tick");
                        continue;
                    }
                    let this = Arc::clone(&self);
                    in_flight = Some(tokio::spawn(async move { this.run_cycle().await }));
                }
            }
        }
    }

    /// Fetch every active job once and ingest the results.
    pub async fn run_cycle(&self) -> PollCycleReport {
        let job_ids = self.registry.active_job_ids(&self.owner_id).await;
        let mut report = PollCycleReport {
            requested: job_ids.len(),
            ..Default::default()
        };
        if job_ids.is_empty() {
            return report;
        }

        let outcomes = join_all(job_ids.iter().map(|job_id| self.fetch_one(job_id))).await;
        for outcome in outcomes {
            match outcome {
                FetchOutcome::Ingested => report.succeeded += 1,
                FetchOutcome::Failed => report.failed += 1,
                FetchOutcome::TimedOut => report.timed_out += 1,
                FetchOutcome::Discarded => report.discarded += 1,
            }
        }

        tracing::debug!(
            owner_id = %self.owner_id,
            requested = report.requested,
            succeeded = report.succeeded,
            failed = report.failed,
            timed_out = report.timed_out,
            "Poll cycle finished",
        );
        report
    }

    async fn fetch_one(&self, job_id: &str) -> FetchOutcome {
        let fetched =
            tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch_status(job_id)).await;

        let mut update = match fetched {
            Ok(Ok(update)) => update,
            Ok(Err(e)) => {
                tracing::warn!(job_id, error = %e, "Job status fetch failed");
                return FetchOutcome::Failed;
            }
            Err(_) => {
                tracing::warn!(
                    job_id,
                    timeout_ms = self.fetch_timeout.as_millis() as u64,
                    "Job status fetch timed out",
                );
                return FetchOutcome::TimedOut;
            }
        };

        if let Some(returned) = update.job_id() {
            if returned != job_id {
                tracing::warn!(job_id, returned, "Status response names a different job");
                return FetchOutcome::Discarded;
            }
        }
        if let Some(owner) = update.owner_id.as_deref() {
            if owner != self.owner_id {
                tracing::warn!(job_id, owner_id = owner, "Status response belongs to another owner");
                return FetchOutcome::Discarded;
            }
        }

        update.id = Some(job_id.to_string());
        update.owner_id = Some(self.owner_id.clone());
        self.buffer.ingest(update);
        FetchOutcome::Ingested
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use jobsync_core::job::JobStatus;

    use super::*;
    use crate::buffer::MergeSink;

    #[derive(Clone)]
    enum Scripted {
        Reply(JobUpdate),
        Delayed(Duration, JobUpdate),
        Fail,
    }

    #[derive(Default)]
    struct ScriptedFetcher {
        replies: Mutex<HashMap<JobId, Scripted>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn script(self, job_id: &str, reply: Scripted) -> Self {
            self.replies.lock().unwrap().insert(job_id.to_string(), reply);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobStatusFetcher for ScriptedFetcher {
        async fn fetch_status(&self, job_id: &str) -> Result<JobUpdate, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.replies.lock().unwrap().get(job_id).cloned();
            match scripted {
                Some(Scripted::Reply(update)) => Ok(update),
                Some(Scripted::Delayed(delay, update)) => {
                    tokio::time::sleep(delay).await;
                    Ok(update)
                }
                Some(Scripted::Fail) => Err(FetchError::Request("connection reset".into())),
                None => Err(FetchError::NotFound(job_id.to_string())),
            }
        }
    }

    async fn seeded(jobs: &[(&str, JobStatus)]) -> (Arc<JobRegistry>, UpdateBuffer) {
        let registry = Arc::new(JobRegistry::new(25, 8));
        let batch = jobs
            .iter()
            .map(|(id, status)| {
                (
                    id.to_string(),
                    JobUpdate::for_job(*id).with_owner("alice").with_status(*status),
                )
            })
            .collect();
        registry.merge(batch).await;

        let sink: Arc<dyn MergeSink> = registry.clone();
        let buffer = UpdateBuffer::new(Duration::from_millis(250), &sink);
        (registry, buffer)
    }

    fn config(poll_secs: u64, timeout_secs: u64) -> EngineConfig {
        EngineConfig {
            poll_interval: Duration::from_secs(poll_secs),
            fetch_timeout: Duration::from_secs(timeout_secs),
            ..Default::default()
        }
    }

    fn reconciler(
        registry: &Arc<JobRegistry>,
        fetcher: &Arc<ScriptedFetcher>,
        buffer: &UpdateBuffer,
        config: &EngineConfig,
    ) -> Arc<PollReconciler> {
        Arc::new(PollReconciler::new(
            "alice",
            registry.clone(),
            fetcher.clone(),
            buffer.clone(),
            config,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_does_not_affect_other_jobs() {
        let (registry, buffer) = seeded(&[("a", JobStatus::Queued), ("b", JobStatus::Queued)]).await;
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .script(
                    "a",
                    Scripted::Reply(JobUpdate::default().with_status(JobStatus::Running).with_progress(5, 10)),
                )
                .script("b", Scripted::Fail),
        );
        let poller = reconciler(&registry, &fetcher, &buffer, &config(5, 8));

        let report = poller.run_cycle().await;
        assert_eq!(report.requested, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);

        buffer.flush_now().await;
        let a = registry.get("a").await.unwrap();
        assert_eq!(a.status, JobStatus::Running);
        assert_eq!(a.processed, 5);
        assert_eq!(registry.get("b").await.unwrap().status, JobStatus::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out() {
        let (registry, buffer) = seeded(&[("a", JobStatus::Running)]).await;
        let fetcher = Arc::new(ScriptedFetcher::default().script(
            "a",
            Scripted::Delayed(Duration::from_secs(60), JobUpdate::default().with_processed(9)),
        ));
        let poller = reconciler(&registry, &fetcher, &buffer, &config(5, 8));

        let report = poller.run_cycle().await;
        assert_eq!(report.timed_out, 1);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_to_fetch_without_active_jobs() {
        let (registry, buffer) = seeded(&[("done", JobStatus::Completed)]).await;
        let fetcher = Arc::new(ScriptedFetcher::default());
        let poller = reconciler(&registry, &fetcher, &buffer, &config(5, 8));

        assert_eq!(poller.run_cycle().await, PollCycleReport::default());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn responses_for_other_jobs_or_owners_are_discarded() {
        let (registry, buffer) = seeded(&[("a", JobStatus::Running), ("b", JobStatus::Running)]).await;
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .script("a", Scripted::Reply(JobUpdate::for_job("zzz").with_processed(1)))
                .script("b", Scripted::Reply(JobUpdate::default().with_owner("mallory"))),
        );
        let poller = reconciler(&registry, &fetcher, &buffer, &config(5, 8));

        let report = poller.run_cycle().await;
        assert_eq!(report.discarded, 2);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn response_without_ids_is_stamped() {
        let (registry, buffer) = seeded(&[("7", JobStatus::Queued)]).await;
        let fetcher = Arc::new(ScriptedFetcher::default().script(
            "7",
            Scripted::Reply(JobUpdate::default().with_status(JobStatus::Completed)),
        ));
        let poller = reconciler(&registry, &fetcher, &buffer, &config(5, 8));

        poller.run_cycle().await;
        buffer.flush_now().await;

        let record = registry.get("7").await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.owner_id, "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_cycle_finishes_after_cancel() {
        let (registry, buffer) = seeded(&[("a", JobStatus::Running)]).await;
        let fetcher = Arc::new(ScriptedFetcher::default().script(
            "a",
            Scripted::Delayed(Duration::from_secs(2), JobUpdate::default().with_processed(7)),
        ));
        let poller = reconciler(&registry, &fetcher, &buffer, &config(5, 8));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poller.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(registry.get("a").await.unwrap().processed, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_ticks_are_skipped() {
        let (registry, buffer) = seeded(&[("a", JobStatus::Running)]).await;
        let fetcher = Arc::new(ScriptedFetcher::default().script(
            "a",
            Scripted::Delayed(Duration::from_secs(12), JobUpdate::default().with_processed(1)),
        ));
        let poller = reconciler(&registry, &fetcher, &buffer, &config(5, 30));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poller.run(cancel.clone()));

        // Ticks at 5s and 10s land while the first fetch is still running.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(fetcher.calls(), 1);

        // The 15s tick starts a fresh cycle.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fetcher.calls(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }
}
