//! Indexer - the public surface over the watch registry and search engine.
//!
//! ## Architecture
//!
//! ```text
//! Indexer
//!   ├── WatchRegistry - watch/unwatch, one WatchUnit per root or file group
//!   │     └── WatchUnit - ChangeNotifier + per-file token index
//!   ├── SearchEngine - sharded ALL/ANY queries over every unit's index
//!   └── Hooks - tokenizer + listener supplied by the caller
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let indexer = Indexer::builder().tokenizer(WhitespaceTokenizer).build()?;
//! indexer.watch_path("src").await?;
//! let hits = indexer.search_for_all_tokens(["fn", "main"]);
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::registry::WatchRegistry;
use crate::config::Settings;
use crate::error::IndexerResult;
use crate::hooks::{Hooks, IndexListener, LoggingListener};
use crate::pool::WorkerPool;
use crate::search::SearchEngine;
use crate::tokenizer::Tokenizer;
use crate::types::{SearchMode, SearchResults};

/// A live, in-memory token index over watched files.
pub struct Indexer {
    registry: WatchRegistry,
    search: SearchEngine,
}

impl Indexer {
    pub fn builder() -> IndexerBuilder {
        IndexerBuilder::new()
    }

    /// Watch a directory subtree or a single file.
    ///
    /// Returns `false` if `path` is already covered by a watch, or if its
    /// initial indexing failed (the error goes to the listener).
    pub async fn watch_path(&self, path: impl AsRef<Path>) -> IndexerResult<bool> {
        self.registry.watch_path(path).await
    }

    /// Stop watching a root. Returns `false` if it is not a watched root.
    pub async fn unwatch_path(&self, root: impl AsRef<Path>) -> bool {
        self.registry.unwatch_path(root).await
    }

    pub fn watched_root_paths(&self) -> BTreeSet<PathBuf> {
        self.registry.watched_root_paths()
    }

    pub fn all_files(&self) -> BTreeSet<PathBuf> {
        self.registry.all_files()
    }

    /// Byte positions of `token` in every file containing it.
    ///
    /// Blocks like [`search_tokens`](Self::search_tokens).
    pub fn search_for_token(&self, token: &str) -> HashMap<PathBuf, Vec<usize>> {
        self.search.search_for_token(&self.registry, token)
    }

    /// Files containing every one of `tokens`.
    pub fn search_for_all_tokens<I, S>(&self, tokens: I) -> SearchResults
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_tokens(tokens, SearchMode::All)
    }

    /// Files containing at least one of `tokens`.
    pub fn search_for_any_tokens<I, S>(&self, tokens: I) -> SearchResults
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_tokens(tokens, SearchMode::Any)
    }

    /// Files matching `tokens` under `mode`.
    ///
    /// Searching is synchronous: the calling thread blocks while the shards
    /// run on the search pool. From async code, call it through
    /// `tokio::task::spawn_blocking` (with the indexer in an `Arc`) or
    /// `block_in_place` if the query set is large.
    pub fn search_tokens<I, S>(&self, tokens: I, mode: SearchMode) -> SearchResults
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let query: HashSet<String> = tokens.into_iter().map(Into::into).collect();
        self.search.search(&self.registry, &query, mode)
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    /// Stop every watch. No listener calls are made after this returns.
    pub async fn close(&self) {
        self.registry.close().await;
        crate::log_event!("indexer", "closed");
    }
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("registry", &self.registry)
            .field("search", &self.search)
            .finish()
    }
}

/// Builder for constructing an [`Indexer`].
pub struct IndexerBuilder {
    settings: Settings,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    listener: Option<Arc<dyn IndexListener>>,
    pool: Option<WorkerPool>,
}

impl IndexerBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
            tokenizer: None,
            listener: None,
            pool: None,
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Override the tokenizer named in settings.
    pub fn tokenizer(mut self, tokenizer: impl Tokenizer + 'static) -> Self {
        self.tokenizer = Some(Arc::new(tokenizer));
        self
    }

    /// Set the change and error listener. Defaults to [`LoggingListener`].
    pub fn listener(mut self, listener: impl IndexListener + 'static) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn listener_arc(mut self, listener: Arc<dyn IndexListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Schedule work on `pool` instead of one built from settings.
    pub fn pool(mut self, pool: WorkerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Build the indexer. Without an explicit pool this must run inside a tokio runtime.
    pub fn build(self) -> IndexerResult<Indexer> {
        let indexing = &self.settings.indexing;
        let pool = match self.pool {
            Some(pool) => pool,
            None => WorkerPool::current(indexing.effective_search_threads())?,
        };
        let tokenizer = self
            .tokenizer
            .unwrap_or_else(|| indexing.tokenizer.build());
        let listener = self
            .listener
            .unwrap_or_else(|| Arc::new(LoggingListener));
        let hooks = Hooks::new(tokenizer, listener);

        crate::debug_event!(
            "indexer",
            "built",
            "{} search workers, {} walk permits",
            pool.parallelism(),
            indexing.walk_permits
        );
        Ok(Indexer {
            registry: WatchRegistry::new(hooks, pool.clone(), indexing.walk_permits),
            search: SearchEngine::new(pool),
        })
    }
}

impl Default for IndexerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
