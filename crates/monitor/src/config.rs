use std::time::Duration;

use jobsync_core::types::{JobId, OwnerId};
use jobsync_engine::EngineConfig;

/// Default interval between status reports.
pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum MonitorConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("JOBSYNC_IMPORT_PAYLOAD is not valid JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Monitor settings, including the engine tuning.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Base URL of the job service.
    pub api_url: String,
    pub owner_id: OwnerId,
    /// Existing jobs to start tracking.
    pub job_ids: Vec<JobId>,
    pub report_interval: Duration,
    /// When set, an import job is submitted with this payload at startup.
    pub import_payload: Option<serde_json::Value>,
    pub engine: EngineConfig,
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self, MonitorConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, MonitorConfigError> {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or(MonitorConfigError::Missing(key))
        };

        let api_url = required("JOBSYNC_API_URL")?;
        let owner_id = required("JOBSYNC_OWNER_ID")?.trim().to_string();

        let job_ids: Vec<JobId> = lookup("JOBSYNC_JOB_IDS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let report_interval_secs = lookup("JOBSYNC_REPORT_INTERVAL_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_REPORT_INTERVAL_SECS);

        let import_payload = match lookup("JOBSYNC_IMPORT_PAYLOAD") {
            Some(raw) if !raw.trim().is_empty() => Some(serde_json::from_str(&raw)?),
            _ => None,
        };

        Ok(Self {
            api_url,
            owner_id,
            job_ids,
            report_interval: Duration::from_secs(report_interval_secs),
            import_payload,
            engine: EngineConfig::from_lookup(&lookup),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = MonitorConfig::from_lookup(lookup(&[
            ("JOBSYNC_API_URL", "http://localhost:8080"),
            ("JOBSYNC_OWNER_ID", "alice"),
        ]))
        .unwrap();

        assert_eq!(config.owner_id, "alice");
        assert!(config.job_ids.is_empty());
        assert_eq!(config.report_interval, Duration::from_secs(DEFAULT_REPORT_INTERVAL_SECS));
        assert!(config.import_payload.is_none());
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn job_ids_are_split_and_trimmed() {
        let config = MonitorConfig::from_lookup(lookup(&[
            ("JOBSYNC_API_URL", "http://localhost:8080"),
            ("JOBSYNC_OWNER_ID", "alice"),
            ("JOBSYNC_JOB_IDS", " 12, 13 ,,abc "),
            ("JOBSYNC_POLL_INTERVAL_SECS", "2"),
        ]))
        .unwrap();

        assert_eq!(config.job_ids, vec!["12", "13", "abc"]);
        assert_eq!(config.engine.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn missing_owner_is_an_error() {
        let err = MonitorConfig::from_lookup(lookup(&[
            ("JOBSYNC_API_URL", "http://localhost:8080"),
            ("JOBSYNC_OWNER_ID", "  "),
        ]))
        .unwrap_err();
        assert_matches!(err, MonitorConfigError::Missing("JOBSYNC_OWNER_ID"));
    }

    #[test]
    fn import_payload_must_be_json() {
        let err = MonitorConfig::from_lookup(lookup(&[
            ("JOBSYNC_API_URL", "http://localhost:8080"),
            ("JOBSYNC_OWNER_ID", "alice"),
            ("JOBSYNC_IMPORT_PAYLOAD", "{not json"),
        ]))
        .unwrap_err();
        assert_matches!(err, MonitorConfigError::InvalidPayload(_));

        let config = MonitorConfig::from_lookup(lookup(&[
            ("JOBSYNC_API_URL", "http://localhost:8080"),
            ("JOBSYNC_OWNER_ID", "alice"),
            ("JOBSYNC_IMPORT_PAYLOAD", r#"{"source": "contacts.csv"}"#),
        ]))
        .unwrap();
        assert_eq!(config.import_payload.unwrap()["source"], "contacts.csv");
    }
}
