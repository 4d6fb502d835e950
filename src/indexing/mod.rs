pub mod facade;
pub mod registry;
pub mod unit;
pub mod walker;

pub use facade::{Indexer, IndexerBuilder};
pub use registry::WatchRegistry;
pub use unit::WatchUnit;
pub use walker::{BoundedWalker, DEFAULT_WALK_PERMITS, EntryKind, WalkEntry};
