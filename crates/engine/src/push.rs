//! Push feed: forwards job events from the event bus into the update buffer.
//!
//! A [`PushListener`] owns at most one subscription at a time. The receive
//! loop runs as a background task and exits when cancelled or when the
//! channel closes. Lagged receivers lose events; the poll loop covers the
//! gap.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use jobsync_core::job::JobUpdate;
use jobsync_core::job_events::is_job_event;
use jobsync_core::types::OwnerId;
use jobsync_events::{EventBus, PlatformEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buffer::UpdateBuffer;

/// How long [`PushListener::unsubscribe`] waits for the receive loop to exit.
const UNSUBSCRIBE_GRACE: Duration = Duration::from_secs(2);

/// Errors from the push transport.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The channel could not hand out a subscription.
    #[error("push channel unavailable: {0}")]
    Unavailable(String),
}

/// Source of push events.
pub trait PushChannel: Send + Sync {
    /// Open a new subscription.
    fn subscribe(&self) -> Result<broadcast::Receiver<PlatformEvent>, PushError>;
}

impl PushChannel for EventBus {
    fn subscribe(&self) -> Result<broadcast::Receiver<PlatformEvent>, PushError> {
        Ok(EventBus::subscribe(self))
    }
}

/// One owner's subscription to the push feed.
pub struct PushListener {
    owner_id: OwnerId,
    channel: Arc<dyn PushChannel>,
    buffer: UpdateBuffer,
    subscription: Mutex<Option<Subscription>>,
}

struct Subscription {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PushListener {
    pub fn new(owner_id: impl Into<OwnerId>, channel: Arc<dyn PushChannel>, buffer: UpdateBuffer) -> Self {
        Self {
            owner_id: owner_id.into(),
            channel,
            buffer,
            subscription: Mutex::new(None),
        }
    }

    /// Start receiving events.
    ///
    /// Returns `Ok(false)` when already subscribed, so a second call never
    /// opens a second receiver. A subscription whose loop has exited (the
    /// channel closed) is replaced.
    pub fn subscribe(&self) -> Result<bool, PushError> {
        let mut slot = self.lock_subscription();
        if slot.as_ref().is_some_and(|sub| !sub.task.is_finished()) {
            tracing::debug!(owner_id = %self.owner_id, "Push feed already subscribed");
            return Ok(false);
        }

        let receiver = self.channel.subscribe()?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(listen(
            self.owner_id.clone(),
            receiver,
            self.buffer.clone(),
            cancel.clone(),
        ));

        tracing::info!(owner_id = %self.owner_id, "Subscribed to push feed");
        *slot = Some(Subscription { cancel, task });
        Ok(true)
    }

    /// Stop receiving events. Returns `false` if there was nothing to stop.
    pub async fn unsubscribe(&self) -> bool {
        let Some(subscription) = self.lock_subscription().take() else {
            return false;
        };

        subscription.cancel.cancel();
        if tokio::time::timeout(UNSUBSCRIBE_GRACE, subscription.task)
            .await
            .is_err()
        {
            tracing::warn!(owner_id = %self.owner_id, "Push listener did not stop in time");
        }
        tracing::info!(owner_id = %self.owner_id, "Unsubscribed from push feed");
        true
    }

    /// Whether a receive loop is currently running.
    pub fn is_subscribed(&self) -> bool {
        self.lock_subscription()
            .as_ref()
            .is_some_and(|sub| !sub.task.is_finished())
    }

    fn lock_subscription(&self) -> MutexGuard<'_, Option<Subscription>> {
        self.subscription.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PushListener {
    fn drop(&mut self) {
        let slot = self
            .subscription
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(subscription) = slot.take() {
            subscription.cancel.cancel();
        }
    }
}

async fn listen(
    owner_id: OwnerId,
    mut receiver: broadcast::Receiver<PlatformEvent>,
    buffer: UpdateBuffer,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(owner_id = %owner_id, "Push listener cancelled");
                break;
            }
            received = receiver.recv() => {
                match received {
                    Ok(event) => {
                        forward_event(&owner_id, &buffer, event);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            owner_id = %owner_id,
                            skipped = n,
                            "Push listener lagged, polling will catch up",
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!(owner_id = %owner_id, "Push channel closed, listener stopping");
                        break;
                    }
                }
            }
        }
    }
}

/// Hand a job event for `owner_id` to the buffer. Returns whether it was
/// forwarded.
fn forward_event(owner_id: &str, buffer: &UpdateBuffer, event: PlatformEvent) -> bool {
    if !is_job_event(&event.event_type) {
        return false;
    }

    let mut update: JobUpdate = match serde_json::from_value(event.payload) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!(
                error = %e,
                event_type = %event.event_type,
                "Dropping malformed job event",
            );
            return false;
        }
    };

    // Payload owner wins over the envelope.
    let belongs = update
        .owner_id
        .as_deref()
        .or(event.owner_id.as_deref())
        .is_some_and(|owner| owner == owner_id);
    if !belongs {
        return false;
    }

    update.owner_id = Some(owner_id.to_string());
    buffer.ingest(update);
    true
}
