//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::registry::ConfigHandle;

/// Reloads the policy set whenever the configuration file changes.
pub struct ConfigWatcher {
    path: PathBuf,
    handle: Arc<ConfigHandle>,
}

impl ConfigWatcher {
    pub fn new(path: &Path, handle: Arc<ConfigHandle>) -> Self {
        Self {
            path: path.to_path_buf(),
            handle,
        }
    }

    /// Start watching. Watching stops when the returned watcher is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let handle = self.handle.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!(path = ?path, "Config file change detected, reloading");
                    // Failures are logged by the handle; the current set stays.
                    let _ = handle.reload(&path);
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}
