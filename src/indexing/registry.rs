//! The set of active watch units and the reconciliation of overlapping roots.
//!
//! No two units ever hold roots where one is equal to or nested under the
//! other. Adding a root already covered is a no-op; adding a directory that
//! contains existing roots supersedes them once the new unit is running.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use super::unit::WatchUnit;
use super::walker::BoundedWalker;
use crate::error::{IndexerError, IndexerResult};
use crate::hooks::Hooks;
use crate::paths;
use crate::pool::WorkerPool;

pub struct WatchRegistry {
    units: RwLock<Vec<Arc<WatchUnit>>>,
    /// Serializes watch and unwatch so reconciliation sees a stable unit set.
    ops: tokio::sync::Mutex<()>,
    hooks: Hooks,
    pool: WorkerPool,
    walker: BoundedWalker,
}

impl WatchRegistry {
    pub fn new(hooks: Hooks, pool: WorkerPool, walk_permits: usize) -> Self {
        let walker = BoundedWalker::new(&pool, walk_permits);
        Self {
            units: RwLock::new(Vec::new()),
            ops: tokio::sync::Mutex::new(()),
            hooks,
            pool,
            walker,
        }
    }

    /// Start watching `root`.
    ///
    /// Returns `Ok(false)` if `root` is already covered by an existing watch,
    /// or if the initial population of a new watch failed. In the latter case
    /// the error goes to the listener and no unit is left behind. Malformed
    /// requests are returned as errors and leave the registry untouched.
    pub async fn watch_path(&self, root: impl AsRef<Path>) -> IndexerResult<bool> {
        let root = paths::normalize(root.as_ref());
        let _ops = self.ops.lock().await;

        if self.units.read().iter().any(|unit| unit.covers(&root)) {
            crate::debug_event!("registry", "already covered", "{}", root.display());
            return Ok(false);
        }

        let is_dir = match tokio::fs::metadata(&root).await {
            Ok(metadata) => metadata.is_dir(),
            Err(source) => {
                let error = IndexerError::Read {
                    path: root.clone(),
                    source,
                };
                self.hooks.on_error(&error, &root);
                return Ok(false);
            }
        };

        // Removed only after the broader watch is running
        let superseded: Vec<PathBuf> = if is_dir {
            self.watched_root_paths()
                .into_iter()
                .filter(|existing| paths::is_nested(existing, &root))
                .collect()
        } else {
            if let Some(unit) = self.file_set_unit_in(root.parent()) {
                unit.add_file(root.clone()).await?;
                crate::log_event!("registry", "watching", "{} (joined file set)", root.display());
                return Ok(true);
            }
            Vec::new()
        };

        let unit = Arc::new(WatchUnit::new(
            [root.clone()],
            self.hooks.clone(),
            &self.pool,
            self.walker.clone(),
        )?);
        if let Err(e) = unit.start().await {
            unit.close().await;
            tracing::warn!("[registry] failed to start watch on {}: {e}", root.display());
            self.hooks.on_error(&e, &root);
            return Ok(false);
        }
        self.units.write().push(unit);
        crate::log_event!("registry", "watching", "{}", root.display());

        for narrower in superseded {
            self.remove_root_strict(&narrower).await?;
            crate::debug_event!("registry", "superseded", "{}", narrower.display());
        }
        Ok(true)
    }

    /// Stop watching a root previously returned by [`watched_root_paths`](Self::watched_root_paths).
    ///
    /// Returns `false` if `root` is not a registered root.
    pub async fn unwatch_path(&self, root: impl AsRef<Path>) -> bool {
        let root = paths::normalize(root.as_ref());
        let _ops = self.ops.lock().await;
        self.remove_root(&root).await
    }

    /// Like [`unwatch_path`](Self::unwatch_path), but an unknown root is an error.
    pub async fn unwatch_path_strict(&self, root: impl AsRef<Path>) -> IndexerResult<()> {
        let root = paths::normalize(root.as_ref());
        let _ops = self.ops.lock().await;
        self.remove_root_strict(&root).await
    }

    async fn remove_root_strict(&self, root: &Path) -> IndexerResult<()> {
        if self.remove_root(root).await {
            Ok(())
        } else {
            Err(IndexerError::UnknownRoot {
                path: root.to_path_buf(),
            })
        }
    }

    async fn remove_root(&self, root: &Path) -> bool {
        let owner = self
            .units
            .read()
            .iter()
            .find(|unit| unit.has_root(root))
            .cloned();
        let Some(unit) = owner else {
            return false;
        };

        if unit.is_watching_files() && unit.root_paths().len() > 1 {
            unit.remove_file(root);
        } else {
            self.units.write().retain(|u| !Arc::ptr_eq(u, &unit));
            unit.close().await;
        }
        crate::log_event!("registry", "unwatched", "{}", root.display());
        true
    }

    fn file_set_unit_in(&self, directory: Option<&Path>) -> Option<Arc<WatchUnit>> {
        let directory = directory?;
        self.units
            .read()
            .iter()
            .find(|unit| unit.is_watching_files() && unit.directory() == directory)
            .cloned()
    }

    pub fn watched_root_paths(&self) -> BTreeSet<PathBuf> {
        self.units
            .read()
            .iter()
            .flat_map(|unit| unit.root_paths())
            .collect()
    }

    /// Every file currently indexed by any unit.
    pub fn all_files(&self) -> BTreeSet<PathBuf> {
        self.units
            .read()
            .iter()
            .flat_map(|unit| unit.files())
            .collect()
    }

    /// Snapshot of the active units.
    pub fn units(&self) -> Vec<Arc<WatchUnit>> {
        self.units.read().clone()
    }

    /// Close every unit and forget all roots.
    pub async fn close(&self) {
        let _ops = self.ops.lock().await;
        let units = std::mem::take(&mut *self.units.write());
        for unit in units {
            unit.close().await;
        }
        crate::debug_event!("registry", "closed");
    }
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("units", &self.units.read().len())
            .finish_non_exhaustive()
    }
}
