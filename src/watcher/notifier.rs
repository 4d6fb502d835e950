//! Hardened wrapper over the native change-notification backend.
//!
//! The backend watches at directory granularity and is unreliable in ways the
//! index cannot tolerate:
//!
//! - children of a renamed directory may get Delete events under the old name
//!   but no Create events under the new one;
//! - a Delete carries no reliable file type, since the path is already gone;
//! - renames arrive as from/to halves, sometimes also as a paired event.
//!
//! [`ChangeNotifier`] normalizes this into a [`ChangeEvent`] stream:
//!
//! - a Create for a directory is followed by a Create for every file found by
//!   walking it, which over-approximates (duplicates are possible, misses are not);
//! - a snapshot of known entries gives Delete events their file type and
//!   expands a deleted directory into Delete events for its known descendants;
//! - Deletes for unknown paths are dropped as duplicates, and a directory
//!   already known is not reported again, though it is still walked.
//!
//! Raw events are handed from the backend thread to a per-notifier pump task
//! over a channel, so the backend is never blocked by indexing.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::event::{ChangeEvent, EventType, RawChange, classify};
use crate::error::{IndexerError, IndexerResult};
use crate::indexing::walker::{BoundedWalker, EntryKind, WalkEntry};
use crate::paths;
use crate::pool::WorkerPool;

/// Receives normalized events from a [`ChangeNotifier`].
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn on_change(&self, event: ChangeEvent);

    fn on_error(&self, error: IndexerError);
}

/// Entries known to exist under a directory watch.
#[derive(Debug, Clone, Default)]
pub struct KnownEntries(Arc<DashMap<PathBuf, EntryKind>>);

impl KnownEntries {
    pub fn track(&self, entry: &WalkEntry) {
        self.0.insert(entry.path.clone(), entry.kind);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Record a directory; returns `false` if it was already known as one.
    fn insert_directory(&self, path: PathBuf) -> bool {
        self.0.insert(path, EntryKind::Directory) != Some(EntryKind::Directory)
    }

    fn insert_file(&self, path: PathBuf) {
        self.0.insert(path, EntryKind::File);
    }

    fn remove(&self, path: &Path) -> Option<EntryKind> {
        self.0.remove(path).map(|(_, kind)| kind)
    }

    /// Remove and return every entry strictly beneath `dir`.
    fn remove_descendants(&self, dir: &Path) -> Vec<(PathBuf, EntryKind)> {
        let nested: Vec<PathBuf> = self
            .0
            .iter()
            .filter(|entry| paths::is_nested(entry.key(), dir))
            .map(|entry| entry.key().clone())
            .collect();
        let mut removed: Vec<(PathBuf, EntryKind)> = nested
            .into_iter()
            .filter_map(|path| self.0.remove(&path))
            .collect();
        removed.sort();
        removed
    }

    fn clear(&self) {
        self.0.clear();
    }
}

struct NotifierShared {
    directory: PathBuf,
    is_watching_files: bool,
    /// The paths callers asked for. In file-set mode events are filtered to these.
    paths: RwLock<BTreeSet<PathBuf>>,
    known: KnownEntries,
    walker: BoundedWalker,
    handler: Arc<dyn ChangeHandler>,
}

/// Watches one directory subtree, or a set of files sharing a parent directory.
pub struct ChangeNotifier {
    shared: Arc<NotifierShared>,
    pool: WorkerPool,
    watcher: Mutex<Option<RecommendedWatcher>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

/// What a notifier watches, validated from the paths a caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub paths: BTreeSet<PathBuf>,
    pub directory: PathBuf,
    pub is_watching_files: bool,
}

impl WatchTarget {
    /// A single directory is watched as a subtree. A single file, or several
    /// files, are watched through their shared parent directory with events
    /// filtered to exactly those files. Several paths that are not all regular
    /// files, or that do not share a parent, are rejected.
    pub fn resolve(paths: impl IntoIterator<Item = PathBuf>) -> IndexerResult<Self> {
        let paths: BTreeSet<PathBuf> = paths.into_iter().map(|p| paths::normalize(&p)).collect();
        let first = paths.iter().next().ok_or(IndexerError::NoPaths)?.clone();

        if paths.len() == 1 {
            let (directory, is_watching_files) = if first.is_dir() {
                (first, false)
            } else {
                (parent_of(&first), true)
            };
            return Ok(Self {
                paths,
                directory,
                is_watching_files,
            });
        }

        let directory = match paths::shared_parent(&paths) {
            Ok(parent) => parent
                .map(Path::to_path_buf)
                .unwrap_or_else(|| parent_of(&first)),
            Err((expected, path)) => {
                return Err(IndexerError::MixedParents {
                    expected: expected.to_path_buf(),
                    path: path.to_path_buf(),
                });
            }
        };
        if let Some(path) = paths.iter().find(|p| !p.is_file()) {
            return Err(IndexerError::NotAFile { path: path.clone() });
        }
        Ok(Self {
            paths,
            directory,
            is_watching_files: true,
        })
    }
}

impl ChangeNotifier {
    /// Create a notifier for `target`. Nothing is watched until [`watch`](Self::watch).
    pub fn new(
        target: WatchTarget,
        handler: Arc<dyn ChangeHandler>,
        pool: &WorkerPool,
        walker: BoundedWalker,
    ) -> Self {
        let WatchTarget {
            paths,
            directory,
            is_watching_files,
        } = target;

        let known = KnownEntries::default();
        if is_watching_files {
            for path in &paths {
                known.insert_file(path.clone());
            }
        }

        Self {
            shared: Arc::new(NotifierShared {
                directory,
                is_watching_files,
                paths: RwLock::new(paths),
                known,
                walker,
                handler,
            }),
            pool: pool.clone(),
            watcher: Mutex::new(None),
            pump: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// The directory subscribed to on the backend.
    pub fn directory(&self) -> &Path {
        &self.shared.directory
    }

    /// `true` when watching individual files rather than a subtree.
    pub fn is_watching_files(&self) -> bool {
        self.shared.is_watching_files
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.shared.paths.read().iter().cloned().collect()
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.shared.paths.read().contains(path)
    }

    /// Add a file to a file-set watch. It must live in [`directory`](Self::directory).
    pub fn add_path(&self, path: PathBuf) -> IndexerResult<()> {
        if !self.shared.is_watching_files || path.parent() != Some(self.directory()) {
            return Err(IndexerError::MixedParents {
                expected: self.shared.directory.clone(),
                path,
            });
        }
        if !path.is_file() {
            return Err(IndexerError::NotAFile { path });
        }
        self.shared.known.insert_file(path.clone());
        self.shared.paths.write().insert(path);
        Ok(())
    }

    pub fn remove_path(&self, path: &Path) -> bool {
        self.shared.known.remove(path);
        self.shared.paths.write().remove(path)
    }

    /// Snapshot of known entries, for seeding from an initial walk.
    pub fn known_entries(&self) -> KnownEntries {
        self.shared.known.clone()
    }

    /// Subscribe to the backend and start delivering events.
    pub fn watch(&self) -> IndexerResult<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // The pump is gone once the notifier is closed
            let _ = tx.send(res);
        })?;

        let mode = if self.shared.is_watching_files {
            RecursiveMode::NonRecursive
        } else {
            RecursiveMode::Recursive
        };
        watcher.watch(&self.shared.directory, mode)?;

        let pump = self.pool.spawn(pump(
            Arc::clone(&self.shared),
            rx,
            self.cancel.clone(),
        ));
        *self.watcher.lock() = Some(watcher);
        *self.pump.lock() = Some(pump);

        crate::log_event!("notifier", "watching", "{}", self.shared.directory.display());
        Ok(())
    }

    /// Unsubscribe and wait for in-flight event handling to stop.
    pub async fn close(&self) {
        drop(self.watcher.lock().take());
        self.cancel.cancel();
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                if e.is_panic() {
                    tracing::error!("[notifier] event pump panicked: {e}");
                }
            }
        }
        crate::debug_event!("notifier", "closed", "{}", self.shared.directory.display());
    }
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn parent_of(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.to_path_buf())
}

async fn pump(
    shared: Arc<NotifierShared>,
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(Ok(event)) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = dispatch(&shared, event) => {}
                    }
                }
                Some(Err(e)) => shared.handler.on_error(IndexerError::Watch(e)),
                None => break,
            },
        }
    }
}

async fn dispatch(shared: &Arc<NotifierShared>, event: Event) {
    for change in classify(event) {
        apply(shared, change).await;
    }
}

async fn apply(shared: &Arc<NotifierShared>, change: RawChange) {
    match change {
        RawChange::Overflow => overflowed(shared).await,
        RawChange::Created { path, is_directory } => created(shared, path, is_directory).await,
        RawChange::Modified { path } => modified(shared, path).await,
        RawChange::Removed { path, is_directory } => removed(shared, path, is_directory).await,
        // Whether the path still exists decides which half of the rename this is
        RawChange::Renamed { path } => {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                created(shared, path, None).await;
            } else {
                removed(shared, path, None).await;
            }
        }
    }
}

async fn overflowed(shared: &Arc<NotifierShared>) {
    tracing::warn!(
        "[notifier] backend queue overflowed for {}",
        shared.directory.display()
    );
    let event = ChangeEvent::new(
        EventType::Overflow,
        shared.directory.clone(),
        !shared.is_watching_files,
    );
    shared.handler.on_change(event).await;
}

async fn created(shared: &Arc<NotifierShared>, path: PathBuf, is_directory: Option<bool>) {
    if !shared.accepts(&path) {
        return;
    }
    let is_directory = match is_directory {
        Some(hint) => hint,
        None => is_dir(&path).await,
    };
    if !is_directory {
        shared.known.insert_file(path.clone());
        shared
            .handler
            .on_change(ChangeEvent::new(EventType::Create, path, false))
            .await;
        return;
    }

    // The directory itself is reported once, but every Create re-walks it
    if shared.known.insert_directory(path.clone()) {
        shared
            .handler
            .on_change(ChangeEvent::new(EventType::Create, path.clone(), true))
            .await;
    } else {
        crate::debug_event!("notifier", "duplicate", "create {}", path.display());
    }
    expand_directory(shared, path).await;
}

async fn modified(shared: &Arc<NotifierShared>, path: PathBuf) {
    if !shared.accepts(&path) {
        return;
    }
    let is_directory = is_dir(&path).await;
    if !is_directory {
        shared.known.insert_file(path.clone());
    }
    shared
        .handler
        .on_change(ChangeEvent::new(EventType::Modify, path, is_directory))
        .await;
}

async fn removed(shared: &Arc<NotifierShared>, path: PathBuf, is_directory: Option<bool>) {
    if shared.is_watching_files {
        if shared.accepts(&path) {
            shared
                .handler
                .on_change(ChangeEvent::new(EventType::Delete, path, false))
                .await;
        }
        return;
    }

    if path == shared.directory {
        shared.known.clear();
        shared
            .handler
            .on_change(ChangeEvent::new(EventType::Delete, path, true))
            .await;
        return;
    }
    if !shared.accepts(&path) {
        return;
    }

    let Some(kind) = shared.known.remove(&path) else {
        crate::debug_event!("notifier", "unknown", "delete {}", path.display());
        return;
    };
    let is_directory = kind == EntryKind::Directory || is_directory == Some(true);
    shared
        .handler
        .on_change(ChangeEvent::new(EventType::Delete, path.clone(), is_directory))
        .await;
    if is_directory {
        for (descendant, kind) in shared.known.remove_descendants(&path) {
            shared
                .handler
                .on_change(ChangeEvent::new(
                    EventType::Delete,
                    descendant,
                    kind == EntryKind::Directory,
                ))
                .await;
        }
    }
}

/// Walk a newly appeared directory and report every file in it as created.
///
/// The backend does not reliably report the children of a directory renamed
/// into the watch, so they are synthesized here even if the backend also
/// delivers them.
async fn expand_directory(shared: &Arc<NotifierShared>, dir: PathBuf) {
    let visitor = Arc::clone(shared);
    let result = shared
        .walker
        .walk_entries(&dir, move |entry| {
            let shared = Arc::clone(&visitor);
            async move {
                shared.known.track(&entry);
                if entry.kind == EntryKind::File {
                    shared
                        .handler
                        .on_change(ChangeEvent::new(EventType::Create, entry.path, false))
                        .await;
                }
            }
        })
        .await;
    if let Err(e) = result {
        // The directory may already be gone again
        crate::debug_event!("notifier", "expand failed", "{}: {e}", dir.display());
        shared.handler.on_error(e);
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

impl NotifierShared {
    fn accepts(&self, path: &Path) -> bool {
        if self.is_watching_files {
            self.paths.read().contains(path)
        } else {
            paths::is_nested(path, &self.directory)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexing::walker::DEFAULT_WALK_PERMITS;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ChangeEvent>>,
    }

    #[async_trait]
    impl ChangeHandler for Recorder {
        async fn on_change(&self, event: ChangeEvent) {
            self.events.lock().push(event);
        }

        fn on_error(&self, error: IndexerError) {
            panic!("unexpected notifier error: {error}");
        }
    }

    fn notifier_for(paths: Vec<PathBuf>) -> (IndexerResult<ChangeNotifier>, Arc<Recorder>) {
        let pool = WorkerPool::current(1).unwrap();
        let walker = BoundedWalker::new(&pool, DEFAULT_WALK_PERMITS);
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn ChangeHandler> = recorder.clone();
        let notifier = WatchTarget::resolve(paths)
            .map(|target| ChangeNotifier::new(target, handler, &pool, walker));
        (notifier, recorder)
    }

    #[tokio::test]
    async fn test_directory_mode() {
        let temp_dir = TempDir::new().unwrap();
        let (notifier, _) = notifier_for(vec![temp_dir.path().to_path_buf()]);
        let notifier = notifier.unwrap();
        assert!(!notifier.is_watching_files());
        assert_eq!(notifier.directory(), temp_dir.path());
    }

    #[tokio::test]
    async fn test_file_set_mode() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a");
        let b = temp_dir.path().join("b");
        fs::write(&a, "").unwrap();
        fs::write(&b, "").unwrap();

        let (notifier, _) = notifier_for(vec![a.clone(), b.clone()]);
        let notifier = notifier.unwrap();
        assert!(notifier.is_watching_files());
        assert_eq!(notifier.directory(), temp_dir.path());
        assert_eq!(notifier.paths(), vec![a, b]);
    }

    #[tokio::test]
    async fn test_rejects_mixed_parents() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("sub")).unwrap();
        let a = temp_dir.path().join("a");
        let b = temp_dir.path().join("sub/b");
        fs::write(&a, "").unwrap();
        fs::write(&b, "").unwrap();

        let (notifier, _) = notifier_for(vec![a, b]);
        let err = notifier.err().unwrap();
        assert!(matches!(err, IndexerError::MixedParents { .. }));
        assert!(err.is_user_error());
    }

    #[tokio::test]
    async fn test_rejects_directory_in_file_set() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a");
        let sub = temp_dir.path().join("sub");
        fs::write(&a, "").unwrap();
        fs::create_dir(&sub).unwrap();

        let (notifier, _) = notifier_for(vec![a, sub.clone()]);
        match notifier {
            Err(IndexerError::NotAFile { path }) => assert_eq!(path, sub),
            Err(other) => panic!("expected NotAFile, got {other}"),
            Ok(_) => panic!("expected NotAFile"),
        }
    }

    #[tokio::test]
    async fn test_rejects_empty() {
        let (notifier, _) = notifier_for(Vec::new());
        assert!(matches!(notifier, Err(IndexerError::NoPaths)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_deleted_directory_expands_to_known_children() {
        let temp_dir = TempDir::new().unwrap();
        let (notifier, recorder) = notifier_for(vec![temp_dir.path().to_path_buf()]);
        let notifier = notifier.unwrap();

        let dir = temp_dir.path().join("dir");
        let file = dir.join("asdf");
        let known = notifier.known_entries();
        known.track(&WalkEntry {
            path: dir.clone(),
            kind: EntryKind::Directory,
        });
        known.track(&WalkEntry {
            path: file.clone(),
            kind: EntryKind::File,
        });

        apply(
            &notifier.shared,
            RawChange::Removed {
                path: dir.clone(),
                is_directory: None,
            },
        )
        .await;
        // A second removal of the same path is a duplicate
        apply(
            &notifier.shared,
            RawChange::Removed {
                path: dir.clone(),
                is_directory: None,
            },
        )
        .await;

        let events = recorder.events.lock().clone();
        assert_eq!(
            events,
            vec![
                ChangeEvent::new(EventType::Delete, dir, true),
                ChangeEvent::new(EventType::Delete, file, false),
            ]
        );
        assert!(known.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_created_directory_synthesizes_children() {
        let temp_dir = TempDir::new().unwrap();
        let (notifier, recorder) = notifier_for(vec![temp_dir.path().to_path_buf()]);
        let notifier = notifier.unwrap();

        let dir = temp_dir.path().join("dir2");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("asdf"), "x").unwrap();
        fs::write(dir.join("nested/deep"), "y").unwrap();

        apply(
            &notifier.shared,
            RawChange::Created {
                path: dir.clone(),
                is_directory: None,
            },
        )
        .await;
        // Paired rename re-announces the same directory
        apply(
            &notifier.shared,
            RawChange::Created {
                path: dir.clone(),
                is_directory: None,
            },
        )
        .await;

        let events = recorder.events.lock().clone();
        let count = |event: ChangeEvent| events.iter().filter(|e| **e == event).count();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], ChangeEvent::new(EventType::Create, dir.clone(), true));
        assert_eq!(count(ChangeEvent::new(EventType::Create, dir.clone(), true)), 1);
        assert_eq!(
            count(ChangeEvent::new(EventType::Create, dir.join("asdf"), false)),
            2
        );
        assert_eq!(
            count(ChangeEvent::new(EventType::Create, dir.join("nested/deep"), false)),
            2
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_undirected_rename_resolves_by_existence() {
        let temp_dir = TempDir::new().unwrap();
        let (notifier, recorder) = notifier_for(vec![temp_dir.path().to_path_buf()]);
        let notifier = notifier.unwrap();

        let gone = temp_dir.path().join("gone");
        let arrived = temp_dir.path().join("arrived");
        fs::write(&arrived, "x").unwrap();
        notifier.known_entries().track(&WalkEntry {
            path: gone.clone(),
            kind: EntryKind::File,
        });

        apply(&notifier.shared, RawChange::Renamed { path: gone.clone() }).await;
        apply(
            &notifier.shared,
            RawChange::Renamed {
                path: arrived.clone(),
            },
        )
        .await;

        let events = recorder.events.lock().clone();
        assert_eq!(
            events,
            vec![
                ChangeEvent::new(EventType::Delete, gone, false),
                ChangeEvent::new(EventType::Create, arrived, false),
            ]
        );
    }

    #[test]
    fn test_removed_descendants_are_ordered() {
        let known = KnownEntries::default();
        for (path, kind) in [
            ("/w/d/z", EntryKind::File),
            ("/w/d/a", EntryKind::Directory),
            ("/w/d/a/b", EntryKind::File),
            ("/w/other", EntryKind::File),
        ] {
            known.track(&WalkEntry {
                path: PathBuf::from(path),
                kind,
            });
        }

        let removed = known.remove_descendants(Path::new("/w/d"));
        assert_eq!(
            removed,
            vec![
                (PathBuf::from("/w/d/a"), EntryKind::Directory),
                (PathBuf::from("/w/d/a/b"), EntryKind::File),
                (PathBuf::from("/w/d/z"), EntryKind::File),
            ]
        );
        assert_eq!(known.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_file_set_filters_other_files() {
        let temp_dir = TempDir::new().unwrap();
        let watched = temp_dir.path().join("watched");
        let other = temp_dir.path().join("other");
        fs::write(&watched, "").unwrap();
        fs::write(&other, "").unwrap();

        let (notifier, recorder) = notifier_for(vec![watched.clone()]);
        let notifier = notifier.unwrap();

        apply(&notifier.shared, RawChange::Modified { path: other }).await;
        apply(
            &notifier.shared,
            RawChange::Modified {
                path: watched.clone(),
            },
        )
        .await;

        let events = recorder.events.lock().clone();
        assert_eq!(events, vec![ChangeEvent::new(EventType::Modify, watched, false)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_stops_pump() {
        let temp_dir = TempDir::new().unwrap();
        let (notifier, recorder) = notifier_for(vec![temp_dir.path().to_path_buf()]);
        let notifier = notifier.unwrap();
        notifier.watch().unwrap();
        notifier.close().await;

        fs::write(temp_dir.path().join("late"), "x").unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(recorder.events.lock().is_empty());
    }
}
