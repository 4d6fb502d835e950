//! Filesystem change notification.
//!
//! # Architecture
//!
//! ```text
//! ChangeNotifier (one per watch unit)
//!   - notify::RecommendedWatcher on one directory
//!   - channel to a pump task (retained, cancelled on close)
//!   - snapshot of known entries
//!         |
//!   ChangeEvent (normalized, at-least-once)
//!         |
//!   ChangeHandler (the watch unit)
//! ```

mod event;
mod notifier;

pub use event::{ChangeEvent, EventType};
pub use notifier::{ChangeHandler, ChangeNotifier, KnownEntries, WatchTarget};
