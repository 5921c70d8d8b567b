//! Job status storage.

use std::sync::Arc;

use dashmap::DashMap;

use crate::jobs::status::{JobState, JobStatus};

/// Where job statuses live. The egress layer only reads and writes whole
/// snapshots by reference id.
pub trait JobStore: Send + Sync {
    fn get(&self, reference_id: &str) -> Option<JobStatus>;
    fn put(&self, status: JobStatus);

    /// Mark a job cancelled unless it is already done. Returns whether it changed.
    fn cancel(&self, reference_id: &str) -> bool {
        match self.get(reference_id) {
            Some(mut status) if !status.is_done() => {
                status.finish(JobState::Cancelled, None);
                self.put(status);
                true
            }
            _ => false,
        }
    }
}

/// A thread-safe, process-local job store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    inner: Arc<DashMap<String, JobStatus>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Reference ids of jobs not yet done.
    pub fn pending(&self) -> Vec<String> {
        self.inner
            .iter()
            .filter(|r| !r.value().is_done())
            .map(|r| r.key().clone())
            .collect()
    }

    pub fn remove(&self, reference_id: &str) -> Option<JobStatus> {
        self.inner.remove(reference_id).map(|(_, status)| status)
    }

    /// Drop every done job. Returns how many were dropped.
    pub fn evict_done(&self) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, status| !status.is_done());
        before.saturating_sub(self.inner.len())
    }
}

impl JobStore for InMemoryJobStore {
    fn get(&self, reference_id: &str) -> Option<JobStatus> {
        self.inner.get(reference_id).map(|r| r.value().clone())
    }

    fn put(&self, status: JobStatus) {
        self.inner.insert(status.reference_id.clone(), status);
    }
}
