//! Print job status.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Running,
    Finished,
    Error,
    Cancelled,
}

impl JobState {
    pub fn is_done(self) -> bool {
        !matches!(self, JobState::Waiting | JobState::Running)
    }
}

/// Snapshot of one job, as kept by a `JobStore`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub reference_id: String,
    pub app_id: String,
    pub state: JobState,
    /// Milliseconds since the epoch.
    pub start_time_ms: u64,
    pub completion_time_ms: Option<u64>,
    /// Outbound requests dispatched so far.
    pub request_count: usize,
    pub error: Option<String>,
}

impl JobStatus {
    pub fn waiting(reference_id: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            reference_id: reference_id.into(),
            app_id: app_id.into(),
            state: JobState::Waiting,
            start_time_ms: now_ms(),
            completion_time_ms: None,
            request_count: 0,
            error: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    /// Run time so far, or total run time once done.
    pub fn elapsed_ms(&self) -> u64 {
        self.completion_time_ms
            .unwrap_or_else(now_ms)
            .saturating_sub(self.start_time_ms)
    }

    pub(crate) fn start(&mut self) {
        self.state = JobState::Running;
        self.start_time_ms = now_ms();
    }

    pub(crate) fn finish(&mut self, state: JobState, error: Option<String>) {
        self.state = state;
        self.error = error;
        self.completion_time_ms = Some(now_ms());
    }
}

/// `<uuid>@<app id>`.
pub fn new_reference_id(app_id: &str) -> String {
    format!("{}@{}", Uuid::new_v4(), app_id)
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_states() {
        assert!(!JobState::Waiting.is_done());
        assert!(!JobState::Running.is_done());
        assert!(JobState::Finished.is_done());
        assert!(JobState::Error.is_done());
        assert!(JobState::Cancelled.is_done());
    }

    #[test]
    fn elapsed_uses_completion_time_once_done() {
        let mut status = JobStatus::waiting("r", "default");
        status.start_time_ms = 1_000;
        status.completion_time_ms = Some(3_500);
        assert_eq!(status.elapsed_ms(), 2_500);

        status.completion_time_ms = None;
        assert!(status.elapsed_ms() > 2_500);
    }

    #[test]
    fn reference_id_carries_app() {
        let id = new_reference_id("default");
        let (uuid, app) = id.split_once('@').unwrap();
        assert!(Uuid::parse_str(uuid).is_ok());
        assert_eq!(app, "default");
    }

    #[test]
    fn state_serializes_in_snake_case() {
        let status = JobStatus::waiting("r", "a");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "waiting");
    }
}
