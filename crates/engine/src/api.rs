//! REST client for the remote job service.
//!
//! Covers the two calls the engine needs: creating an import job and
//! fetching a job's current status. The status call backs the poll feed via
//! [`JobStatusFetcher`].

use async_trait::async_trait;
use jobsync_core::job::JobUpdate;

use crate::poll::{FetchError, JobStatusFetcher};

/// HTTP client for the job service.
pub struct JobsApi {
    client: reqwest::Client,
    api_url: String,
}

/// Errors from the job service REST layer.
#[derive(Debug, thiserror::Error)]
pub enum JobsApiError {
    /// The HTTP request itself failed (network, DNS, TLS, decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Job service error ({status}): {body}")]
    Api {
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl JobsApi {
    /// Create a client for the service at `api_url`, e.g.
    /// `http://host:8080/api`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Submit a bulk import for `owner_id`.
    ///
    /// Sends `POST /jobs/import`. The response is the job's initial state;
    /// if it omits the owner, `owner_id` is filled in so the record can be
    /// tracked straight away.
    pub async fn create_import_job(
        &self,
        owner_id: &str,
        payload: &serde_json::Value,
    ) -> Result<JobUpdate, JobsApiError> {
        let body = serde_json::json!({
            "ownerId": owner_id,
            "payload": payload,
        });

        let response = self
            .client
            .post(self.endpoint("jobs/import"))
            .json(&body)
            .send()
            .await?;

        let mut created: JobUpdate = Self::parse_response(response).await?;
        if created.owner_id.is_none() {
            created.owner_id = Some(owner_id.to_string());
        }
        tracing::info!(job_id = ?created.id, owner_id, "Import job created");
        Ok(created)
    }

    /// Fetch one job's current state via `GET /jobs/{id}`.
    pub async fn get_job(&self, job_id: &str) -> Result<JobUpdate, JobsApiError> {
        let response = self
            .client
            .get(self.endpoint(&format!("jobs/{job_id}")))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path)
    }

    // ---- private helpers ----

    /// Return the response unchanged on success, or
    /// [`JobsApiError::Api`] with the status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, JobsApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(JobsApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, JobsApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl JobStatusFetcher for JobsApi {
    async fn fetch_status(&self, job_id: &str) -> Result<JobUpdate, FetchError> {
        self.get_job(job_id)
            .await
            .map_err(|e| fetch_error(job_id, e))
    }
}

fn fetch_error(job_id: &str, error: JobsApiError) -> FetchError {
    match error {
        JobsApiError::Api { status: 404, .. } => FetchError::NotFound(job_id.to_string()),
        JobsApiError::Request(e) if e.is_decode() => FetchError::Malformed(e.to_string()),
        other => FetchError::Request(other.to_string()),
    }
}
