//! Progress reconciliation for bulk-import jobs.
//!
//! Two unreliable feeds describe the same jobs: push events from the
//! [`EventBus`](jobsync_events::EventBus) and periodic status polls. Both
//! land in an [`UpdateBuffer`](buffer::UpdateBuffer), which coalesces bursts
//! and flushes them into the [`JobRegistry`](registry::JobRegistry) at most
//! one debounce window later. The registry owns merge, monotonicity and
//! retention; presenters only read from it.
//!
//! [`ReconciliationEngine`](engine::ReconciliationEngine) wires one owner's
//! session together and tears it down explicitly.

pub mod api;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod poll;
pub mod push;
pub mod registry;

pub use buffer::{MergeSink, UpdateBuffer};
pub use config::EngineConfig;
pub use engine::ReconciliationEngine;
pub use registry::{JobRegistry, MergeReport};
