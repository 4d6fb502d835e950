pub mod config;
pub mod error;
pub mod hooks;
pub mod indexing;
pub mod logging;
pub mod paths;
pub mod pool;
pub mod search;
pub mod tokenizer;
pub mod types;
pub mod watcher;

pub use config::Settings;
pub use error::{ErrorClass, IndexerError, IndexerResult};
pub use hooks::{FnListener, Hooks, IndexListener, LoggingListener};
pub use indexing::{Indexer, IndexerBuilder, WatchRegistry, WatchUnit};
pub use pool::WorkerPool;
pub use search::SearchEngine;
pub use tokenizer::{Tokenizer, TokenizerKind, WhitespaceTokenizer, WordTokenizer};
pub use types::{FileIndex, SearchMode, SearchResults, Token};
pub use watcher::{ChangeEvent, EventType};
