//! Rendering of fetched resources.

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

/// One resource fetched on behalf of a job.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, Error)]
#[error("rendering failed: {0}")]
pub struct RenderError(pub String);

/// Turns a job's fetched resources into its output document.
pub trait Renderer: Send + Sync {
    fn render(&self, reference_id: &str, resources: &[FetchedResource]) -> Result<Vec<u8>, RenderError>;
}

#[derive(Serialize)]
struct ResourceSummary<'a> {
    url: &'a str,
    status: u16,
    content_type: Option<&'a str>,
    bytes: usize,
}

#[derive(Serialize)]
struct JobSummary<'a> {
    reference_id: &'a str,
    resources: Vec<ResourceSummary<'a>>,
}

/// Writes a JSON summary of what was fetched. Used by the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct SummaryRenderer;

impl Renderer for SummaryRenderer {
    fn render(&self, reference_id: &str, resources: &[FetchedResource]) -> Result<Vec<u8>, RenderError> {
        let summary = JobSummary {
            reference_id,
            resources: resources
                .iter()
                .map(|r| ResourceSummary {
                    url: &r.url,
                    status: r.status,
                    content_type: r.content_type.as_deref(),
                    bytes: r.body.len(),
                })
                .collect(),
        };
        serde_json::to_vec_pretty(&summary).map_err(|e| RenderError(e.to_string()))
    }
}
