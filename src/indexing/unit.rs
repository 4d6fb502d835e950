//! One watch root (or root group) and the token index for the files it covers.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::walker::{BoundedWalker, EntryKind};
use crate::error::{IndexerError, IndexerResult};
use crate::hooks::Hooks;
use crate::paths;
use crate::pool::WorkerPool;
use crate::types::FileIndex;
use crate::watcher::{ChangeEvent, ChangeHandler, ChangeNotifier, EventType, WatchTarget};

/// Index state shared between a [`WatchUnit`] and its notifier's pump.
struct UnitState {
    directory: PathBuf,
    is_watching_files: bool,
    /// Entries are replaced whole, never mutated, so readers never see a
    /// half-built index.
    index: DashMap<PathBuf, Arc<FileIndex>>,
    hooks: Hooks,
}

impl UnitState {
    /// The root an error for `path` is reported under.
    fn root_for<'a>(&'a self, path: &'a Path) -> &'a Path {
        if self.is_watching_files {
            path
        } else {
            &self.directory
        }
    }

    /// Read `path` and replace its index entry.
    async fn index_file(&self, path: PathBuf) {
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::OutOfMemory => {
                self.index.clear();
                tracing::error!(
                    "[unit] out of memory reading {}, cleared index for {}",
                    path.display(),
                    self.directory.display()
                );
                self.hooks.on_error(
                    &IndexerError::ResourceExhausted {
                        path: path.clone(),
                    },
                    self.root_for(&path),
                );
                return;
            }
            Err(source) => {
                if source.kind() == io::ErrorKind::NotFound {
                    self.index.remove(&path);
                }
                let error = IndexerError::Read {
                    path: path.clone(),
                    source,
                };
                self.hooks.on_error(&error, self.root_for(&path));
                return;
            }
        };

        let content = String::from_utf8_lossy(&bytes);
        let file_index = FileIndex::from_tokens(self.hooks.split(&content));
        crate::debug_event!(
            "unit",
            "indexed",
            "{} ({} distinct tokens)",
            path.display(),
            file_index.len()
        );
        self.index.insert(path, Arc::new(file_index));
    }

    async fn apply(&self, event: ChangeEvent) {
        match (event.event_type, event.is_directory) {
            (EventType::Create | EventType::Modify, false) => {
                self.index_file(event.path.clone()).await;
            }
            // Children arrive as their own events
            (EventType::Create | EventType::Modify, true) => {}
            (EventType::Delete, true) => {
                self.index
                    .retain(|path, _| !paths::is_within(path, &event.path));
            }
            (EventType::Delete, false) => {
                self.index.remove(&event.path);
            }
            (EventType::Overflow, _) => {
                let error = IndexerError::Overflow {
                    path: event.path.clone(),
                };
                self.hooks.on_error(&error, &self.directory);
            }
        }
        self.hooks.on_change(&event);
    }
}

#[async_trait]
impl ChangeHandler for UnitState {
    async fn on_change(&self, event: ChangeEvent) {
        self.apply(event).await;
    }

    fn on_error(&self, error: IndexerError) {
        self.hooks.on_error(&error, &self.directory);
    }
}

/// Owns one [`ChangeNotifier`] and the index of the files it covers.
///
/// A unit watches either a single directory subtree, or a set of regular
/// files that share a parent directory.
pub struct WatchUnit {
    state: Arc<UnitState>,
    notifier: ChangeNotifier,
    walker: BoundedWalker,
}

impl WatchUnit {
    /// Validate `paths` and build an idle unit. See [`WatchTarget::resolve`].
    pub fn new(
        paths: impl IntoIterator<Item = PathBuf>,
        hooks: Hooks,
        pool: &WorkerPool,
        walker: BoundedWalker,
    ) -> IndexerResult<Self> {
        let target = WatchTarget::resolve(paths)?;
        let state = Arc::new(UnitState {
            directory: target.directory.clone(),
            is_watching_files: target.is_watching_files,
            index: DashMap::new(),
            hooks,
        });
        let handler: Arc<dyn ChangeHandler> = state.clone();
        let notifier = ChangeNotifier::new(target, handler, pool, walker.clone());
        Ok(Self {
            state,
            notifier,
            walker,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.state.directory
    }

    pub fn is_watching_files(&self) -> bool {
        self.state.is_watching_files
    }

    pub fn root_paths(&self) -> Vec<PathBuf> {
        self.notifier.paths()
    }

    pub fn has_root(&self, path: &Path) -> bool {
        self.notifier.contains_path(path)
    }

    /// Whether `path` is one of this unit's roots or lies beneath its directory watch.
    pub fn covers(&self, path: &Path) -> bool {
        if self.is_watching_files() {
            self.has_root(path)
        } else {
            paths::is_within(path, self.directory())
        }
    }

    /// Paths currently in the index.
    pub fn files(&self) -> Vec<PathBuf> {
        self.state.index.iter().map(|e| e.key().clone()).collect()
    }

    pub fn file_index(&self, path: &Path) -> Option<Arc<FileIndex>> {
        self.state.index.get(path).map(|e| Arc::clone(e.value()))
    }

    /// Point-in-time copy of the index entries.
    pub fn entries(&self) -> Vec<(PathBuf, Arc<FileIndex>)> {
        self.state
            .index
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.index.is_empty()
    }

    /// Populate the index, then start consuming live events.
    ///
    /// Read failures for single files are reported through the hooks and do
    /// not fail the start. A failed directory listing does.
    pub async fn start(&self) -> IndexerResult<()> {
        if self.is_watching_files() {
            for path in self.root_paths() {
                self.state.index_file(path).await;
            }
        } else {
            let state = Arc::clone(&self.state);
            let known = self.notifier.known_entries();
            self.walker
                .walk_entries(self.directory(), move |entry| {
                    let state = Arc::clone(&state);
                    known.track(&entry);
                    async move {
                        if entry.kind == EntryKind::File {
                            state.index_file(entry.path).await;
                        }
                    }
                })
                .await?;
        }

        self.notifier.watch()?;
        crate::log_event!(
            "unit",
            "started",
            "{} ({} files)",
            self.directory().display(),
            self.len()
        );
        Ok(())
    }

    /// Add a file to a file-set unit and index it.
    pub async fn add_file(&self, path: PathBuf) -> IndexerResult<()> {
        self.notifier.add_path(path.clone())?;
        self.state.index_file(path).await;
        Ok(())
    }

    /// Remove a file from a file-set unit. Returns `false` if it was not a root.
    pub fn remove_file(&self, path: &Path) -> bool {
        let removed = self.notifier.remove_path(path);
        if removed {
            self.state.index.remove(path);
        }
        removed
    }

    /// Apply one change to the index, then notify the listener.
    pub async fn apply(&self, event: ChangeEvent) {
        self.state.apply(event).await;
    }

    /// Stop watching. Event handling has stopped once this returns.
    pub async fn close(&self) {
        self.notifier.close().await;
        crate::debug_event!("unit", "closed", "{}", self.directory().display());
    }
}

impl std::fmt::Debug for WatchUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchUnit")
            .field("directory", &self.state.directory)
            .field("is_watching_files", &self.state.is_watching_files)
            .field("files", &self.state.index.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::FnListener;
    use crate::indexing::walker::DEFAULT_WALK_PERMITS;
    use crate::tokenizer::WhitespaceTokenizer;
    use parking_lot::Mutex;
    use std::fs;
    use tempfile::TempDir;

    type Log = Arc<Mutex<Vec<String>>>;

    fn unit_for(paths: Vec<PathBuf>, log: Log) -> IndexerResult<WatchUnit> {
        let pool = WorkerPool::current(1).unwrap();
        let walker = BoundedWalker::new(&pool, DEFAULT_WALK_PERMITS);
        let changes = Arc::clone(&log);
        let listener = FnListener::new(
            move |event: &ChangeEvent| changes.lock().push(event.to_string()),
            move |error: &IndexerError, _root: &Path| log.lock().push(format!("error {error}")),
        );
        let hooks = Hooks::new(Arc::new(WhitespaceTokenizer), Arc::new(listener));
        WatchUnit::new(paths, hooks, &pool, walker)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_indexes_existing_tree() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("sub")).unwrap();
        fs::write(temp_dir.path().join("a"), "foo bar").unwrap();
        fs::write(temp_dir.path().join("sub/b"), "baz").unwrap();

        let unit = unit_for(vec![temp_dir.path().to_path_buf()], Log::default()).unwrap();
        unit.start().await.unwrap();

        assert_eq!(unit.len(), 2);
        let index = unit.file_index(&temp_dir.path().join("a")).unwrap();
        assert!(index.contains("foo"));
        assert!(index.contains("bar"));
        unit.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_repeated_modify_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("f");
        fs::write(&file, "foo bar baz foo").unwrap();

        let unit = unit_for(vec![temp_dir.path().to_path_buf()], Log::default()).unwrap();
        let event = ChangeEvent::new(EventType::Modify, file.clone(), false);
        unit.apply(event.clone()).await;
        let once = unit.file_index(&file).unwrap();
        unit.apply(event).await;
        let twice = unit.file_index(&file).unwrap();

        assert_eq!(*once, *twice);
        assert_eq!(unit.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_directory_delete_removes_nested_entries() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("dir");
        fs::create_dir_all(dir.join("deep")).unwrap();
        fs::write(dir.join("a"), "x").unwrap();
        fs::write(dir.join("deep/b"), "y").unwrap();
        fs::write(temp_dir.path().join("dir2"), "z").unwrap();

        let unit = unit_for(vec![temp_dir.path().to_path_buf()], Log::default()).unwrap();
        unit.start().await.unwrap();
        assert_eq!(unit.len(), 3);

        unit.apply(ChangeEvent::new(EventType::Delete, dir, true))
            .await;
        // A sibling sharing the name prefix survives
        assert_eq!(unit.files(), vec![temp_dir.path().join("dir2")]);
        unit.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_listener_called_after_index_update() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("f");
        fs::write(&file, "hello").unwrap();

        let log = Log::default();
        let unit = unit_for(vec![file.clone()], Arc::clone(&log)).unwrap();
        assert!(unit.is_watching_files());
        unit.apply(ChangeEvent::new(EventType::Create, file.clone(), false))
            .await;

        assert!(unit.file_index(&file).is_some());
        assert_eq!(log.lock().as_slice(), &[format!("create {}", file.display())]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_file_reports_error() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("f");
        fs::write(&file, "hello").unwrap();

        let log = Log::default();
        let unit = unit_for(vec![file.clone()], Arc::clone(&log)).unwrap();
        fs::remove_file(&file).unwrap();
        unit.start().await.unwrap();

        assert!(unit.is_empty());
        assert!(log.lock()[0].starts_with("error Failed to index"));
        unit.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_overflow_reports_error_and_keeps_index() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("f"), "hello").unwrap();

        let log = Log::default();
        let unit = unit_for(vec![temp_dir.path().to_path_buf()], Arc::clone(&log)).unwrap();
        unit.start().await.unwrap();
        unit.apply(ChangeEvent::new(
            EventType::Overflow,
            temp_dir.path().to_path_buf(),
            true,
        ))
        .await;

        assert_eq!(unit.len(), 1);
        assert!(log.lock()[0].starts_with("error change notification queue overflowed"));
        unit.close().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_file_set_add_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a");
        let b = temp_dir.path().join("b");
        fs::write(&a, "one").unwrap();
        fs::write(&b, "two").unwrap();

        let unit = unit_for(vec![a.clone()], Log::default()).unwrap();
        unit.add_file(b.clone()).await.unwrap();
        assert_eq!(unit.root_paths(), vec![a.clone(), b.clone()]);
        assert!(unit.file_index(&b).is_some());

        assert!(unit.remove_file(&a));
        assert!(!unit.remove_file(&a));
        assert_eq!(unit.files(), vec![b]);
    }
}
