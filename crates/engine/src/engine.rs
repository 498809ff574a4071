//! One owner's reconciliation session.
//!
//! [`ReconciliationEngine::start`] wires a debounce buffer to the shared
//! registry, subscribes to the push feed and spawns the status poller.
//! [`ReconciliationEngine::shutdown`] tears all of it down again. Dropping
//! the engine without calling `shutdown` still stops both feeds, but
//! pending updates are left to their timer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use jobsync_core::job::{JobRecord, JobUpdate};
use jobsync_core::types::OwnerId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::{MergeSink, UpdateBuffer};
use crate::config::EngineConfig;
use crate::poll::{JobStatusFetcher, PollReconciler};
use crate::push::{PushChannel, PushListener};
use crate::registry::{JobRegistry, MergeReport};

/// How long shutdown waits for the poll loop to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Keeps one owner's view of their import jobs up to date.
pub struct ReconciliationEngine {
    owner_id: OwnerId,
    registry: Arc<JobRegistry>,
    buffer: UpdateBuffer,
    push: PushListener,
    cancel: CancellationToken,
    poller: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl ReconciliationEngine {
    /// Start a session for `owner_id`.
    ///
    /// A push channel that refuses the subscription is logged and the
    /// session continues on polling alone. Must be called inside a Tokio
    /// runtime.
    pub fn start(
        owner_id: impl Into<OwnerId>,
        config: &EngineConfig,
        registry: Arc<JobRegistry>,
        channel: Arc<dyn PushChannel>,
        fetcher: Arc<dyn JobStatusFetcher>,
    ) -> Self {
        let owner_id = owner_id.into();

        let sink: Arc<dyn MergeSink> = registry.clone();
        let buffer = UpdateBuffer::new(config.debounce, &sink);

        let push = PushListener::new(owner_id.clone(), channel, buffer.clone());
        if let Err(e) = push.subscribe() {
            tracing::warn!(
                owner_id = %owner_id,
                error = %e,
                "Push feed unavailable, continuing with polling only",
            );
        }

        let cancel = CancellationToken::new();
        let poller = Arc::new(PollReconciler::new(
            owner_id.clone(),
            registry.clone(),
            fetcher,
            buffer.clone(),
            config,
        ));
        let poll_task = tokio::spawn(poller.run(cancel.clone()));

        tracing::info!(
            owner_id = %owner_id,
            debounce_ms = config.debounce.as_millis() as u64,
            push_connected = push.is_subscribed(),
            "Reconciliation engine started",
        );

        Self {
            owner_id,
            registry,
            buffer,
            push,
            cancel,
            poller: Mutex::new(Some(poll_task)),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Record a job-creation response immediately, skipping the debounce
    /// window so the new job shows up at once.
    pub async fn track_created(&self, update: JobUpdate) -> MergeReport {
        let Some(update) = self.claim(update) else {
            return MergeReport {
                dropped: 1,
                ..Default::default()
            };
        };
        let Some(job_id) = update.job_id().map(str::to_owned) else {
            tracing::warn!(owner_id = %self.owner_id, "Created job has no id, not tracking");
            return MergeReport {
                dropped: 1,
                ..Default::default()
            };
        };

        self.registry.merge(HashMap::from([(job_id, update)])).await
    }

    /// Feed an update from any other source through the debounce buffer.
    pub fn ingest(&self, update: JobUpdate) {
        if let Some(update) = self.claim(update) {
            self.buffer.ingest(update);
        }
    }

    /// The owner's jobs, newest first, capped to the presentation limit.
    pub async fn jobs(&self) -> Vec<Arc<JobRecord>> {
        self.registry.list_for_owner(&self.owner_id).await
    }

    /// Remove the owner's finished jobs.
    pub async fn clear_terminal(&self) -> usize {
        self.registry.clear_terminal(&self.owner_id).await
    }

    /// Apply everything buffered right away.
    pub async fn flush(&self) -> usize {
        self.buffer.flush_now().await
    }

    pub fn is_push_connected(&self) -> bool {
        self.push.is_subscribed()
    }

    /// Stop polling, drop the push subscription and flush pending updates.
    ///
    /// Safe to call more than once. Fetches already in flight still land
    /// in the registry when they complete.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.cancel();
        let poll_task = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = poll_task {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                tracing::warn!(owner_id = %self.owner_id, "Poll loop did not stop in time");
            }
        }

        self.push.unsubscribe().await;
        let flushed = self.buffer.flush_now().await;

        tracing::info!(owner_id = %self.owner_id, flushed, "Reconciliation engine stopped");
    }

    /// Stamp the session owner onto `update`, or reject it if it names
    /// someone else.
    fn claim(&self, mut update: JobUpdate) -> Option<JobUpdate> {
        if let Some(owner) = update.owner_id.as_deref().filter(|owner| *owner != self.owner_id) {
            tracing::warn!(
                owner_id = %self.owner_id,
                update_owner = owner,
                job_id = ?update.id,
                "Ignoring update for another owner",
            );
            return None;
        }
        update.owner_id = Some(self.owner_id.clone());
        Some(update)
    }
}

impl Drop for ReconciliationEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
