//! `jobsync-monitor` -- follows one owner's bulk-import jobs from the
//! terminal.
//!
//! Starts a reconciliation session against the job service, optionally
//! submits a new import, and logs a progress report every interval until
//! all tracked jobs have finished or Ctrl-C is pressed.
//!
//! # Environment variables
//!
//! | Variable                       | Required | Default | Description                              |
//! |--------------------------------|----------|---------|------------------------------------------|
//! | `JOBSYNC_API_URL`              | yes      | --      | Job service base URL                     |
//! | `JOBSYNC_OWNER_ID`             | yes      | --      | Owner whose jobs are followed            |
//! | `JOBSYNC_JOB_IDS`              | no       | --      | Comma-separated existing job ids         |
//! | `JOBSYNC_IMPORT_PAYLOAD`       | no       | --      | JSON payload for a new import job        |
//! | `JOBSYNC_REPORT_INTERVAL_SECS` | no       | `10`    | Seconds between progress reports         |
//!
//! Progress comes from polling the job service. The session also listens
//! on an in-process [`EventBus`], but nothing publishes to it here; push
//! events only arrive when the engine is embedded next to a publisher
//! sharing the same bus.
//!
//! Engine tuning (`JOBSYNC_DEBOUNCE_MS`, `JOBSYNC_POLL_INTERVAL_SECS`, ...)
//! is read by [`EngineConfig::from_lookup`](jobsync_engine::EngineConfig::from_lookup).

use std::sync::Arc;

use jobsync_core::job::JobUpdate;
use jobsync_engine::api::JobsApi;
use jobsync_engine::{JobRegistry, ReconciliationEngine};
use jobsync_events::EventBus;
use jobsync_monitor::config::MonitorConfig;
use jobsync_monitor::report;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobsync_monitor=info,jobsync_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = MonitorConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid monitor configuration");
        std::process::exit(1);
    });

    tracing::info!(
        api_url = %config.api_url,
        owner_id = %config.owner_id,
        tracked = config.job_ids.len(),
        "Starting jobsync-monitor",
    );

    let api = Arc::new(JobsApi::new(config.api_url.clone()));
    let bus = Arc::new(EventBus::default());
    let registry = Arc::new(JobRegistry::from_config(&config.engine));

    let engine = ReconciliationEngine::start(
        config.owner_id.clone(),
        &config.engine,
        registry.clone(),
        bus,
        api.clone(),
    );

    for job_id in &config.job_ids {
        engine.track_created(JobUpdate::for_job(job_id.clone())).await;
    }

    if let Some(payload) = &config.import_payload {
        match api.create_import_job(&config.owner_id, payload).await {
            Ok(created) => {
                engine.track_created(created).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to submit import job");
            }
        }
    }

    let mut ticker = tokio::time::interval(config.report_interval);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            _ = ticker.tick() => {
                let jobs = engine.jobs().await;
                if jobs.is_empty() {
                    tracing::info!("No jobs tracked");
                    continue;
                }
                for job in &jobs {
                    tracing::info!(job_id = %job.id, "{}", report::render_line(job));
                }
                if report::all_finished(&registry, &config.owner_id).await {
                    tracing::info!("All tracked jobs finished");
                    break;
                }
            }
        }
    }

    engine.shutdown().await;
}
