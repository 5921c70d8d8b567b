//! Atomically swappable policy set.

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::compile::PolicySet;
use crate::config::loader::{load_policies, ConfigError};
use crate::routing::policy::EgressPolicy;

/// Current compiled policies, shared by every job launcher.
///
/// Jobs clone their `Arc<EgressPolicy>` when they start, so a reload only
/// affects jobs started after it.
#[derive(Debug)]
pub struct ConfigHandle {
    policies: ArcSwap<PolicySet>,
}

impl ConfigHandle {
    pub fn new(policies: PolicySet) -> Self {
        Self {
            policies: ArcSwap::from_pointee(policies),
        }
    }

    pub fn load(&self) -> Arc<PolicySet> {
        self.policies.load_full()
    }

    pub fn policy_for(&self, app: &str) -> Option<Arc<EgressPolicy>> {
        self.policies.load().get(app)
    }

    pub fn replace(&self, policies: PolicySet) {
        tracing::info!(apps = policies.len(), "Egress policies replaced");
        self.policies.store(Arc::new(policies));
    }

    /// Reload from `path`. On failure the current policies stay in place.
    pub fn reload(&self, path: &Path) -> Result<(), ConfigError> {
        match load_policies(path) {
            Ok((_, policies)) => {
                self.replace(policies);
                Ok(())
            }
            Err(e) => {
                tracing::error!(path = ?path, error = %e, "Reload failed, keeping current policies");
                Err(e)
            }
        }
    }
}
