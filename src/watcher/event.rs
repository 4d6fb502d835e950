//! Change events and classification of raw `notify` events.

use std::fmt;
use std::path::PathBuf;

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind};

/// Kind of a normalized change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Create,
    Modify,
    Delete,
    /// The native queue dropped events; the index can no longer be trusted.
    Overflow,
}

/// A normalized filesystem change.
///
/// Delivery is at-least-once: the same change may be reported more than once,
/// most notably a Create for files inside a directory that was renamed or
/// created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeEvent {
    pub event_type: EventType,
    pub path: PathBuf,
    pub is_directory: bool,
}

impl ChangeEvent {
    pub fn new(event_type: EventType, path: PathBuf, is_directory: bool) -> Self {
        Self {
            event_type,
            path,
            is_directory,
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.event_type {
            EventType::Create => "create",
            EventType::Modify => "modify",
            EventType::Delete => "delete",
            EventType::Overflow => "overflow",
        };
        write!(f, "{kind} {}", self.path.display())?;
        if self.is_directory {
            write!(f, " (dir)")?;
        }
        Ok(())
    }
}

/// A backend event reduced to what the notifier acts on.
///
/// `is_directory` is the backend's hint when it gives one; the notifier fills
/// in the rest from its snapshot or by stat-ing the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RawChange {
    Created {
        path: PathBuf,
        is_directory: Option<bool>,
    },
    Modified {
        path: PathBuf,
    },
    Removed {
        path: PathBuf,
        is_directory: Option<bool>,
    },
    /// A rename with no direction; whether the path still exists decides.
    Renamed {
        path: PathBuf,
    },
    Overflow,
}

/// Reduce one raw backend event to zero or more [`RawChange`]s.
///
/// Renames become a removal of the old name and a creation of the new one.
/// Access and metadata-only events are dropped.
pub(crate) fn classify(event: Event) -> Vec<RawChange> {
    if event.need_rescan() {
        return vec![RawChange::Overflow];
    }

    let paths = event.paths;
    match event.kind {
        EventKind::Create(kind) => {
            let is_directory = match kind {
                CreateKind::Folder => Some(true),
                CreateKind::File => Some(false),
                _ => None,
            };
            paths
                .into_iter()
                .map(|path| RawChange::Created { path, is_directory })
                .collect()
        }
        EventKind::Remove(kind) => {
            let is_directory = match kind {
                RemoveKind::Folder => Some(true),
                RemoveKind::File => Some(false),
                _ => None,
            };
            paths
                .into_iter()
                .map(|path| RawChange::Removed { path, is_directory })
                .collect()
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => paths
                .into_iter()
                .map(|path| RawChange::Removed {
                    path,
                    is_directory: None,
                })
                .collect(),
            RenameMode::To => paths
                .into_iter()
                .map(|path| RawChange::Created {
                    path,
                    is_directory: None,
                })
                .collect(),
            RenameMode::Both => {
                let mut paths = paths.into_iter();
                let mut out = Vec::with_capacity(2);
                if let Some(from) = paths.next() {
                    out.push(RawChange::Removed {
                        path: from,
                        is_directory: None,
                    });
                }
                if let Some(to) = paths.next() {
                    out.push(RawChange::Created {
                        path: to,
                        is_directory: None,
                    });
                }
                out
            }
            RenameMode::Any | RenameMode::Other => paths
                .into_iter()
                .map(|path| RawChange::Renamed { path })
                .collect(),
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) | EventKind::Any => paths
            .into_iter()
            .map(|path| RawChange::Modified { path })
            .collect(),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}
