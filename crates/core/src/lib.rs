//! Domain model for bulk-import job tracking.
//!
//! Pure types and functions shared by the event bus, the reconciliation
//! engine and the monitor binary. Nothing in this crate performs I/O.

pub mod error;
pub mod job;
pub mod job_events;
pub mod recency;
pub mod types;
