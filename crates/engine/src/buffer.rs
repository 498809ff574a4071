//! Debounced coalescing of job updates.
//!
//! [`UpdateBuffer::ingest`] never awaits: it merges the update into a
//! pending map under a short mutex and, if the buffer was idle, arms a
//! single timer. Further updates within the window ride along with that
//! timer instead of resetting it, so a flush happens at most `delay` after
//! the first update even under continuous load.
//!
//! Flushes are serialised by a writer lock. Each arm bumps a generation
//! counter; a timer only flushes if the generation it was armed with is
//! still current, which makes an explicit [`UpdateBuffer::flush_now`]
//! supersede the armed timer.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use jobsync_core::job::JobUpdate;
use jobsync_core::types::JobId;
use tokio::runtime::Handle;

/// Consumer of flushed update batches.
#[async_trait]
pub trait MergeSink: Send + Sync {
    /// Apply one coalesced batch, keyed by job id.
    async fn apply_batch(&self, batch: HashMap<JobId, JobUpdate>);
}

/// Coalesces updates per job and flushes them once per debounce window.
///
/// Cheap to clone; clones share the same pending state.
#[derive(Clone)]
pub struct UpdateBuffer {
    inner: Arc<Inner>,
}

struct Inner {
    pending: Mutex<Pending>,
    /// Held for the whole swap-and-merge so batches apply in swap order.
    writer: tokio::sync::Mutex<()>,
    delay: Duration,
    /// Weak so that a timer outliving its consumer is harmless.
    sink: Weak<dyn MergeSink>,
    runtime: Handle,
}

#[derive(Default)]
struct Pending {
    updates: HashMap<JobId, JobUpdate>,
    generation: u64,
    armed: bool,
}

impl UpdateBuffer {
    /// Create a buffer that flushes into `sink` after `delay`.
    ///
    /// Must be called from within a Tokio runtime; timers are spawned on it.
    pub fn new(delay: Duration, sink: &Arc<dyn MergeSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(Pending::default()),
                writer: tokio::sync::Mutex::new(()),
                delay,
                sink: Arc::downgrade(sink),
                runtime: Handle::current(),
            }),
        }
    }

    /// Queue an update for the next flush.
    ///
    /// Updates without an id are dropped. Fields present in `update`
    /// overwrite those already pending for the same job.
    pub fn ingest(&self, update: JobUpdate) {
        let Some(job_id) = update.job_id().map(str::to_owned) else {
            tracing::warn!(?update, "Dropping job update without id");
            return;
        };

        let generation = {
            let mut pending = self.inner.lock_pending();
            match pending.updates.entry(job_id) {
                Entry::Occupied(mut slot) => slot.get_mut().merge_from(update),
                Entry::Vacant(slot) => {
                    slot.insert(update);
                }
            }

            if pending.armed {
                return;
            }
            pending.armed = true;
            pending.generation += 1;
            pending.generation
        };

        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move {
            tokio::time::sleep(inner.delay).await;
            inner.flush(Some(generation)).await;
        });
    }

    /// Flush whatever is pending right away. Returns the number of jobs
    /// handed to the sink.
    pub async fn flush_now(&self) -> usize {
        self.inner.flush(None).await
    }

    /// Number of jobs waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.inner.lock_pending().updates.len()
    }

    /// Current flush generation.
    pub fn generation(&self) -> u64 {
        self.inner.lock_pending().generation
    }
}

impl Inner {
    fn lock_pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap out the pending map and hand it to the sink.
    ///
    /// `armed` is the generation a timer was armed with; `None` for an
    /// explicit flush.
    async fn flush(&self, armed: Option<u64>) -> usize {
        let _writer = self.writer.lock().await;

        let batch = {
            let mut pending = self.lock_pending();
            if let Some(generation) = armed {
                if !pending.armed || pending.generation != generation {
                    tracing::debug!(
                        generation,
                        current = pending.generation,
                        "Abandoning superseded flush",
                    );
                    return 0;
                }
            }
            pending.armed = false;
            pending.generation += 1;
            std::mem::take(&mut pending.updates)
        };

        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        match self.sink.upgrade() {
            Some(sink) => {
                sink.apply_batch(batch).await;
                tracing::debug!(count, "Flushed job updates");
            }
            None => {
                tracing::debug!(count, "Merge target gone, discarding buffered updates");
            }
        }
        count
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
