//! Consumer-supplied extension points.
//!
//! The indexer does not subclass or call back into a base type. It is handed a
//! [`Hooks`] value bundling a [`Tokenizer`] with an [`IndexListener`].

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::IndexerError;
use crate::tokenizer::{Tokenizer, WordTokenizer};
use crate::watcher::ChangeEvent;

/// Receives change and error notifications from the indexer.
///
/// Both methods are called from concurrent tasks. `on_change` is always called
/// after the index reflects the event.
pub trait IndexListener: Send + Sync {
    fn on_change(&self, _event: &ChangeEvent) {}

    /// `root` is the watched root path the error occurred under.
    fn on_error(&self, error: &IndexerError, root: &Path);
}

/// Default listener: reports through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl IndexListener for LoggingListener {
    fn on_change(&self, event: &ChangeEvent) {
        crate::debug_event!("indexer", "changed", "{event}");
    }

    fn on_error(&self, error: &IndexerError, root: &Path) {
        tracing::warn!("[indexer] error under {}: {error}", root.display());
    }
}

/// Adapts a pair of closures into an [`IndexListener`].
pub struct FnListener<C, E> {
    on_change: C,
    on_error: E,
}

impl<C, E> FnListener<C, E>
where
    C: Fn(&ChangeEvent) + Send + Sync,
    E: Fn(&IndexerError, &Path) + Send + Sync,
{
    pub fn new(on_change: C, on_error: E) -> Self {
        Self {
            on_change,
            on_error,
        }
    }
}

impl<C, E> IndexListener for FnListener<C, E>
where
    C: Fn(&ChangeEvent) + Send + Sync,
    E: Fn(&IndexerError, &Path) + Send + Sync,
{
    fn on_change(&self, event: &ChangeEvent) {
        (self.on_change)(event)
    }

    fn on_error(&self, error: &IndexerError, root: &Path) {
        (self.on_error)(error, root)
    }
}

/// The capability set `{split, on_change, on_error}` the indexer runs against.
#[derive(Clone)]
pub struct Hooks {
    tokenizer: Arc<dyn Tokenizer>,
    listener: Arc<dyn IndexListener>,
}

impl Hooks {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, listener: Arc<dyn IndexListener>) -> Self {
        Self {
            tokenizer,
            listener,
        }
    }

    pub fn split(&self, content: &str) -> Vec<crate::Token> {
        self.tokenizer.split(content)
    }

    pub fn on_change(&self, event: &ChangeEvent) {
        self.listener.on_change(event)
    }

    pub fn on_error(&self, error: &IndexerError, root: &Path) {
        self.listener.on_error(error, root)
    }
}

impl Default for Hooks {
    fn default() -> Self {
        Self::new(Arc::new(WordTokenizer), Arc::new(LoggingListener))
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}
