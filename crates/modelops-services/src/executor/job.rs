//! External training/evaluation jobs.
//!
//! A job is submitted once and then polled from a background task that
//! reports its terminal state over a oneshot channel. The pipeline awaits
//! the channel, not the job, so a stage timeout simply drops the receiver:
//! the poller notices and stops, and the external job is left to finish
//! or fail on its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use modelops_platform::http::{HttpClient, HttpResponse};
use modelops_types::job::{JobHandle, JobOutput, JobRequest, JobState};

use super::retry::{StageError, is_retryable};
use crate::error::ServiceError;

/// Consecutive failed polls tolerated before the job is given up on.
const MAX_POLL_FAILURES: u32 = 5;

/// A service that runs training and evaluation jobs.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Submit a job and return its handle.
    async fn submit(&self, request: &JobRequest) -> Result<JobHandle, StageError>;

    /// Fetch the current state of a submitted job.
    async fn poll(&self, handle: &JobHandle) -> Result<JobState, StageError>;
}

/// Submits jobs and waits on them via a background polling task.
#[derive(Clone)]
pub struct JobPoller {
    backend: Arc<dyn JobBackend>,
    interval: Duration,
}

impl JobPoller {
    pub fn new(backend: Arc<dyn JobBackend>, interval: Duration) -> Self {
        Self { backend, interval }
    }

    /// Submit `request` and wait for the job to reach a terminal state.
    pub async fn run(&self, request: &JobRequest) -> Result<(JobHandle, JobOutput), StageError> {
        let handle = self.backend.submit(request).await?;
        info!(
            run_id = %request.run_id(),
            kind = request.kind(),
            job_id = %handle.job_id,
            "submitted external job"
        );

        let output = self
            .watch(handle.clone())
            .await
            .map_err(|_| StageError::Service(ServiceError::ChannelClosed))??;
        Ok((handle, output))
    }

    /// Spawn a task polling `handle` until the job finishes.
    pub fn watch(&self, handle: JobHandle) -> oneshot::Receiver<Result<JobOutput, StageError>> {
        let (mut tx, rx) = oneshot::channel();
        let backend = self.backend.clone();
        let period = self.interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut failures = 0u32;

            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        info!(job_id = %handle.job_id, "job result no longer awaited; leaving job to finish");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                let outcome = match backend.poll(&handle).await {
                    Ok(JobState::Succeeded {
                        artifact_ref,
                        metrics,
                    }) => Ok(JobOutput {
                        artifact_ref,
                        metrics,
                    }),
                    Ok(JobState::Failed { message }) => Err(StageError::JobFailed {
                        job_id: handle.job_id.clone(),
                        message,
                    }),
                    Ok(state) => {
                        failures = 0;
                        debug!(job_id = %handle.job_id, ?state, "job still in progress");
                        continue;
                    }
                    Err(e) if is_retryable(&e) && failures + 1 < MAX_POLL_FAILURES => {
                        failures += 1;
                        warn!(job_id = %handle.job_id, failures, error = %e, "job poll failed");
                        continue;
                    }
                    Err(e) => Err(e),
                };

                // The receiver may already be gone; nothing left to do then.
                let _ = tx.send(outcome);
                return;
            }
        });

        rx
    }
}

/// [`JobBackend`] speaking JSON over HTTP.
///
/// - `POST {endpoint}/jobs` with the [`JobRequest`] → `{"job_id": "..."}`
/// - `GET {endpoint}/jobs/{job_id}` → a [`JobState`] object
///
/// Transport errors and 5xx responses are transient; any other non-2xx
/// response is a validation error.
pub struct HttpJobBackend {
    http: Arc<dyn HttpClient>,
    endpoint: String,
    headers: HashMap<String, String>,
}

impl HttpJobBackend {
    pub fn new(
        http: Arc<dyn HttpClient>,
        endpoint: &str,
        headers: HashMap<String, String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            headers,
        }
    }

    fn check(&self, what: &str, response: &HttpResponse) -> Result<(), StageError> {
        if response.is_success() {
            return Ok(());
        }
        let detail = format!(
            "job service returned {} for {what}: {}",
            response.status,
            response.snippet()
        );
        if response.is_server_error() {
            Err(StageError::Transient(detail))
        } else {
            Err(StageError::Validation(detail))
        }
    }
}

#[async_trait]
impl JobBackend for HttpJobBackend {
    async fn submit(&self, request: &JobRequest) -> Result<JobHandle, StageError> {
        let url = format!("{}/jobs", self.endpoint);
        let body = serde_json::to_value(request).map_err(ServiceError::from)?;
        let response = self
            .http
            .post_json(&url, &self.headers, &body)
            .await
            .map_err(|e| StageError::Transient(format!("POST {url}: {e}")))?;
        self.check("job submission", &response)?;

        response
            .json::<JobHandle>()
            .map_err(|e| StageError::Transient(format!("malformed job submission response: {e}")))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<JobState, StageError> {
        let url = format!("{}/jobs/{}", self.endpoint, handle.job_id);
        let response = self
            .http
            .get(&url, &self.headers)
            .await
            .map_err(|e| StageError::Transient(format!("GET {url}: {e}")))?;
        self.check("job status", &response)?;

        response
            .json::<JobState>()
            .map_err(|e| StageError::Transient(format!("malformed job status response: {e}")))
    }
}
