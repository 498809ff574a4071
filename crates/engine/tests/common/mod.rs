//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jobsync_core::job::{JobStatus, JobUpdate};
use jobsync_engine::poll::{FetchError, JobStatusFetcher};
use jobsync_engine::push::{PushChannel, PushError};
use jobsync_engine::{EngineConfig, JobRegistry};
use jobsync_events::PlatformEvent;
use tokio::sync::broadcast;

pub const OWNER: &str = "alice";

/// Poll interval long enough that only the initial cycle runs.
pub const QUIET_POLL: Duration = Duration::from_secs(3600);

pub fn config(poll_interval: Duration) -> EngineConfig {
    EngineConfig {
        poll_interval,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Status fetcher answering from a fixed script, optionally after a delay.
#[derive(Default)]
pub struct ScriptedFetcher {
    replies: Mutex<HashMap<String, (Duration, JobUpdate)>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn reply(self, job_id: &str, update: JobUpdate) -> Self {
        self.reply_after(job_id, Duration::ZERO, update)
    }

    pub fn reply_after(self, job_id: &str, delay: Duration, update: JobUpdate) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(job_id.to_string(), (delay, update));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStatusFetcher for ScriptedFetcher {
    async fn fetch_status(&self, job_id: &str) -> Result<JobUpdate, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.replies.lock().unwrap().get(job_id).cloned();
        let Some((delay, update)) = scripted else {
            return Err(FetchError::NotFound(job_id.to_string()));
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(update)
    }
}

// ---------------------------------------------------------------------------
// Push channels
// ---------------------------------------------------------------------------

/// A push channel that never accepts subscribers.
pub struct DownChannel;

impl PushChannel for DownChannel {
    fn subscribe(&self) -> Result<broadcast::Receiver<PlatformEvent>, PushError> {
        Err(PushError::Unavailable("connection refused".into()))
    }
}

// ---------------------------------------------------------------------------
// Registry helpers
// ---------------------------------------------------------------------------

/// A registry already holding `jobs` for [`OWNER`].
pub async fn registry_with(jobs: &[(&str, JobStatus)]) -> Arc<JobRegistry> {
    let registry = Arc::new(JobRegistry::new(25, 8));
    let batch = jobs
        .iter()
        .map(|(id, status)| {
            (
                id.to_string(),
                JobUpdate::for_job(*id)
                    .with_owner(OWNER)
                    .with_status(*status)
                    .with_total(10),
            )
        })
        .collect();
    registry.merge(batch).await;
    registry
}

/// Let spawned tasks run and paused timers elapse.
pub async fn settle(duration: Duration) {
    tokio::time::sleep(duration).await;
}
