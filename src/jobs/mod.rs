//! Print jobs as seen by the egress layer.
//!
//! Persistence and rendering stay behind the narrow `JobStore` and
//! `Renderer` traits; this module only drives a job's fetches and records
//! its status.

pub mod render;
pub mod runner;
pub mod status;
pub mod store;

pub use render::{FetchedResource, RenderError, Renderer, SummaryRenderer};
pub use runner::{JobError, JobReport, JobRunner, PrintJob};
pub use status::{new_reference_id, JobState, JobStatus};
pub use store::{InMemoryJobStore, JobStore};
