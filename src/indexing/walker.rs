//! Concurrency-limited recursive directory traversal.
//!
//! Each directory listing runs as its own task; a semaphore caps how many
//! listings are open at once so very large trees do not exhaust file
//! descriptors. Visitors are invoked from many tasks concurrently and in no
//! particular order.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{IndexerError, IndexerResult};
use crate::pool::WorkerPool;

/// Default number of concurrent directory listings.
pub const DEFAULT_WALK_PERMITS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

/// An entry discovered during a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Walks directory trees with bounded concurrency.
///
/// Symlinks are not followed. A failed directory listing aborts the walk and
/// is returned to the caller; it is not retried.
#[derive(Clone)]
pub struct BoundedWalker {
    permits: Arc<Semaphore>,
    runtime: Handle,
}

impl BoundedWalker {
    pub fn new(pool: &WorkerPool, permits: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(permits.max(1))),
            runtime: pool.runtime().clone(),
        }
    }

    /// Visit every regular file under `root`.
    ///
    /// Returns once every sub-walk has completed.
    pub async fn walk<F, Fut>(&self, root: &Path, visit: F) -> IndexerResult<()>
    where
        F: Fn(PathBuf) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.walk_entries(root, move |entry| {
            let pending = (entry.kind == EntryKind::File).then(|| visit(entry.path));
            async move {
                if let Some(visit) = pending {
                    visit.await;
                }
            }
        })
        .await
    }

    /// Visit every regular file and every directory under `root`, excluding `root` itself.
    pub async fn walk_entries<F, Fut>(&self, root: &Path, visit: F) -> IndexerResult<()>
    where
        F: Fn(WalkEntry) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let visit = Arc::new(visit);
        let mut tasks = JoinSet::new();
        tasks.spawn_on(
            list_directory(root.to_path_buf(), Arc::clone(&self.permits), Arc::clone(&visit)),
            &self.runtime,
        );

        // Dropping `tasks` on an early return aborts the remaining listings.
        while let Some(joined) = tasks.join_next().await {
            let subdirs = match joined {
                Ok(result) => result?,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => continue,
            };
            for dir in subdirs {
                tasks.spawn_on(
                    list_directory(dir, Arc::clone(&self.permits), Arc::clone(&visit)),
                    &self.runtime,
                );
            }
        }

        crate::debug_event!("walker", "finished", "{}", root.display());
        Ok(())
    }
}

/// List one directory, visit its entries, and return its subdirectories.
async fn list_directory<F, Fut>(
    dir: PathBuf,
    permits: Arc<Semaphore>,
    visit: Arc<F>,
) -> IndexerResult<Vec<PathBuf>>
where
    F: Fn(WalkEntry) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    // The semaphore is never closed
    let Ok(_permit) = permits.acquire().await else {
        return Ok(Vec::new());
    };

    let walk_error = |source| IndexerError::Walk {
        path: dir.clone(),
        source,
    };

    let mut entries = tokio::fs::read_dir(&dir).await.map_err(walk_error)?;
    let mut subdirs = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(walk_error)? {
        let file_type = entry.file_type().await.map_err(walk_error)?;
        let path = entry.path();
        if file_type.is_dir() {
            visit(WalkEntry {
                path: path.clone(),
                kind: EntryKind::Directory,
            })
            .await;
            subdirs.push(path);
        } else if file_type.is_file() {
            visit(WalkEntry {
                path,
                kind: EntryKind::File,
            })
            .await;
        }
    }
    Ok(subdirs)
}
