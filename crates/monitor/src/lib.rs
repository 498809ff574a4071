//! Terminal monitor for one owner's bulk-import jobs.

pub mod config;
pub mod report;
