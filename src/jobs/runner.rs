//! Running a print job's fetches under its egress policy.
//!
//! # Design Decisions
//! - The job's policy is bound once, around the whole job, so every fetch
//!   the job makes inherits it whether issued sequentially or concurrently
//! - A job's resources are fetched concurrently on the job's own task
//! - Any failed fetch, non-success status or render failure fails the job

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;

use crate::error::FetchError;
use crate::http::client::SharedClient;
use crate::http::request::RequestExecutor;
use crate::jobs::render::{FetchedResource, RenderError, Renderer};
use crate::jobs::status::{new_reference_id, JobState, JobStatus};
use crate::jobs::store::JobStore;
use crate::routing::ambient::AmbientJobContext;
use crate::routing::policy::EgressPolicy;

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// A job waiting to run.
#[derive(Debug, Clone)]
pub struct PrintJob {
    pub reference_id: String,
    pub app_id: String,
    /// `None` sends every request direct.
    pub policy: Option<Arc<EgressPolicy>>,
    pub resources: Vec<String>,
}

impl PrintJob {
    pub fn new(app_id: impl Into<String>, policy: Option<Arc<EgressPolicy>>, resources: Vec<String>) -> Self {
        let app_id = app_id.into();
        Self {
            reference_id: new_reference_id(&app_id),
            app_id,
            policy,
            resources,
        }
    }
}

/// Final status of a job plus its rendered output when it finished.
#[derive(Debug)]
pub struct JobReport {
    pub status: JobStatus,
    pub output: Option<Vec<u8>>,
}

pub struct JobRunner {
    client: Arc<SharedClient>,
    store: Arc<dyn JobStore>,
    renderer: Arc<dyn Renderer>,
}

impl JobRunner {
    pub fn new(client: Arc<SharedClient>, store: Arc<dyn JobStore>, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            client,
            store,
            renderer,
        }
    }

    /// Record the job as waiting. Returns its reference id.
    pub fn submit(&self, job: &PrintJob) -> String {
        self.store.put(JobStatus::waiting(&job.reference_id, &job.app_id));
        tracing::info!(job = %job.reference_id, resources = job.resources.len(), "Job submitted");
        job.reference_id.clone()
    }

    /// Run a job to completion. A job cancelled before it starts is skipped.
    pub async fn run(&self, job: PrintJob) -> JobReport {
        let mut status = self
            .store
            .get(&job.reference_id)
            .unwrap_or_else(|| JobStatus::waiting(&job.reference_id, &job.app_id));
        if status.is_done() {
            tracing::info!(job = %job.reference_id, state = ?status.state, "Job not started");
            return JobReport { status, output: None };
        }
        status.start();
        self.store.put(status.clone());
        tracing::info!(job = %job.reference_id, app = %job.app_id, "Job started");

        let requests = AtomicUsize::new(0);
        let work = self.fetch_and_render(&job, &requests);
        let result = match job.policy.clone() {
            Some(policy) => AmbientJobContext::scope(policy, work).await,
            None => work.await,
        };

        status.request_count = requests.load(Ordering::Relaxed);
        let output = match result {
            Ok(output) => {
                status.finish(JobState::Finished, None);
                tracing::info!(
                    job = %job.reference_id,
                    requests = status.request_count,
                    elapsed_ms = status.elapsed_ms(),
                    "Job finished"
                );
                Some(output)
            }
            Err(e) => {
                status.finish(JobState::Error, Some(e.to_string()));
                tracing::warn!(job = %job.reference_id, error = %e, "Job failed");
                None
            }
        };
        self.store.put(status.clone());
        JobReport { status, output }
    }

    async fn fetch_and_render(&self, job: &PrintJob, requests: &AtomicUsize) -> Result<Vec<u8>, JobError> {
        // Requests inherit the policy bound around this future.
        let executor = RequestExecutor::new(self.client.clone(), None);
        let fetches = job.resources.iter().map(|url| fetch(&executor, url, requests));
        let resources = join_all(fetches)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.renderer.render(&job.reference_id, &resources)?)
    }
}

async fn fetch(executor: &RequestExecutor, url: &str, requests: &AtomicUsize) -> Result<FetchedResource, JobError> {
    let request = executor.get(url)?;
    requests.fetch_add(1, Ordering::Relaxed);
    let mut response = request.execute().await?;
    let status = response.status();
    if !status.is_success() {
        response.close();
        return Err(JobError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = response.bytes().await?;
    response.close();
    Ok(FetchedResource {
        url: url.to_string(),
        status: status.as_u16(),
        content_type,
        body,
    })
}
