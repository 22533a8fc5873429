//! The set of directories currently registered with the native watcher.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use crate::error::{ConnectorError, Result};

#[derive(Default)]
struct RegistryInner {
    watcher: Option<RecommendedWatcher>,
    watched: HashSet<PathBuf>,
}

/// One watcher plus the directories it watches, guarded by a single mutex.
#[derive(Default)]
pub(super) struct WatchRegistry {
    inner: Mutex<RegistryInner>,
}

impl WatchRegistry {
    pub(super) fn install(&self, watcher: RecommendedWatcher) {
        let mut inner = self.inner.lock();
        inner.watched.clear();
        inner.watcher = Some(watcher);
    }

    /// Adds a non-recursive watch. Returns `false` if the directory was already watched.
    pub(super) fn watch(&self, dir: &Path) -> Result<bool> {
        let mut inner = self.inner.lock();
        if inner.watched.contains(dir) {
            return Ok(false);
        }
        let watcher = inner
            .watcher
            .as_mut()
            .ok_or_else(|| ConnectorError::Monitor("monitor is not running".to_string()))?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|error| {
                ConnectorError::Monitor(format!("failed to watch {}: {error}", dir.display()))
            })?;
        inner.watched.insert(dir.to_path_buf());
        Ok(true)
    }

    /// Drops the directory and everything beneath it.
    pub(super) fn forget(&self, dir: &Path) {
        let mut inner = self.inner.lock();
        let RegistryInner { watcher, watched } = &mut *inner;
        watched.retain(|path| {
            if !path.starts_with(dir) {
                return true;
            }
            if let Some(watcher) = watcher.as_mut() {
                // The kernel usually dropped the watch together with the directory.
                let _ = watcher.unwatch(path);
            }
            false
        });
    }

    pub(super) fn contains(&self, dir: &Path) -> bool {
        self.inner.lock().watched.contains(dir)
    }

    pub(super) fn len(&self) -> usize {
        self.inner.lock().watched.len()
    }

    /// Removes the watcher so the caller can drop it outside the lock.
    pub(super) fn take(&self) -> Option<RecommendedWatcher> {
        let mut inner = self.inner.lock();
        inner.watched.clear();
        inner.watcher.take()
    }
}
