//! Ambient job context.
//!
//! Makes the dispatching job's `EgressPolicy` visible to route planning inside
//! the shared client without threading it through the client's API.
//!
//! # Design Decisions
//! - Bound per future with a tokio task-local, never in a process-wide cell:
//!   two jobs dispatching concurrently on the same worker thread each see
//!   their own policy
//! - Everything polled inside the scope sees the value; tasks spawned from it
//!   inherit only through `AmbientJobContext::spawn`
//! - Nested scopes shadow outer ones for their duration

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::routing::policy::EgressPolicy;

tokio::task_local! {
    static CURRENT_POLICY: Arc<EgressPolicy>;
}

/// Accessors for the policy of the job whose request is being dispatched.
#[derive(Debug, Clone, Copy)]
pub struct AmbientJobContext;

impl AmbientJobContext {
    /// Run `fut` with `policy` as the active policy.
    pub async fn scope<F: Future>(policy: Arc<EgressPolicy>, fut: F) -> F::Output {
        CURRENT_POLICY.scope(policy, fut).await
    }

    /// Synchronous variant of [`AmbientJobContext::scope`].
    pub fn sync_scope<R>(policy: Arc<EgressPolicy>, f: impl FnOnce() -> R) -> R {
        CURRENT_POLICY.sync_scope(policy, f)
    }

    /// The active policy, if any.
    pub fn current() -> Option<Arc<EgressPolicy>> {
        CURRENT_POLICY.try_with(Arc::clone).ok()
    }

    /// Spawn a task that inherits the caller's active policy.
    pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match Self::current() {
            Some(policy) => tokio::spawn(CURRENT_POLICY.scope(policy, fut)),
            None => tokio::spawn(fut),
        }
    }
}
