//! Engine tuning read from `JOBSYNC_*` environment variables.
//!
//! A variable that is unset or does not parse falls back to the matching
//! `DEFAULT_*` constant, as does a zero poll interval or fetch timeout.

use std::time::Duration;

/// Default delay between the first buffered update and its flush.
pub const DEFAULT_DEBOUNCE_MS: u64 = 250;

/// Default interval between status polls for active jobs.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default per-fetch timeout for status polls.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 8;

/// Default number of records retained per owner after eviction.
pub const DEFAULT_RETENTION_WINDOW: usize = 25;

/// Default number of records returned to presenters.
pub const DEFAULT_PRESENTATION_LIMIT: usize = 8;

/// Reconciliation engine tuning.
///
/// All fields have defaults suitable for an interactive session. Override
/// via environment variables with [`EngineConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Fixed debounce window. Bounds propagation latency.
    pub debounce: Duration,
    /// Status poll interval. Never zero.
    pub poll_interval: Duration,
    /// Timeout for one status fetch. Never zero.
    pub fetch_timeout: Duration,
    /// Records retained per owner (`N`). Active jobs count against it but
    /// are never evicted.
    pub retention_window: usize,
    /// Cap on the presenter view. Independent of `retention_window`.
    pub presentation_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            retention_window: DEFAULT_RETENTION_WINDOW,
            presentation_limit: DEFAULT_PRESENTATION_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default |
    /// |-------------------------------|---------|
    /// | `JOBSYNC_DEBOUNCE_MS`         | `250`   |
    /// | `JOBSYNC_POLL_INTERVAL_SECS`  | `5`     |
    /// | `JOBSYNC_FETCH_TIMEOUT_SECS`  | `8`     |
    /// | `JOBSYNC_RETENTION_WINDOW`    | `25`    |
    /// | `JOBSYNC_PRESENTATION_LIMIT`  | `8`     |
    ///
    /// Unparsable values fall back to the default. Zero is rejected for the
    /// poll interval and fetch timeout.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "Ignoring unparsable configuration value");
                    None
                }
            }
        };

        let debounce_ms = read("JOBSYNC_DEBOUNCE_MS").unwrap_or(DEFAULT_DEBOUNCE_MS);
        let poll_interval_secs = read("JOBSYNC_POLL_INTERVAL_SECS")
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        let fetch_timeout_secs = read("JOBSYNC_FETCH_TIMEOUT_SECS")
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);
        let retention_window = read("JOBSYNC_RETENTION_WINDOW")
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_RETENTION_WINDOW);
        let presentation_limit = read("JOBSYNC_PRESENTATION_LIMIT")
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_PRESENTATION_LIMIT);

        Self {
            debounce: Duration::from_millis(debounce_ms),
            poll_interval: Duration::from_secs(poll_interval_secs),
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            retention_window,
            presentation_limit,
        }
    }
}
