//! Sharded token search across every watch unit's index.
//!
//! The scan reads the live indices without a global snapshot. A concurrent
//! update may or may not be seen, but each file's index is swapped whole so a
//! search never observes a partially rebuilt one.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;

use crate::indexing::WatchRegistry;
use crate::pool::WorkerPool;
use crate::types::{FileIndex, SearchMode, SearchResults};

pub struct SearchEngine {
    pool: WorkerPool,
}

impl SearchEngine {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    /// Find files matching `tokens` under `mode`.
    ///
    /// Each matching file maps to the queried tokens it contains, sorted by
    /// position. Blocks the caller while the shards run on the search pool.
    pub fn search(
        &self,
        registry: &WatchRegistry,
        tokens: &HashSet<String>,
        mode: SearchMode,
    ) -> SearchResults {
        let entries: Vec<(PathBuf, Arc<FileIndex>)> = registry
            .units()
            .iter()
            .flat_map(|unit| unit.entries())
            .collect();
        let total = entries.len();
        let shards = shard(entries, self.pool.parallelism());

        let results = self.pool.install(|| {
            shards
                .into_par_iter()
                .map(|shard| {
                    shard
                        .into_iter()
                        .filter(|(_, index)| index.matches(tokens, mode))
                        .map(|(path, index)| (path, index.matched_tokens(tokens)))
                        .collect::<Vec<_>>()
                })
                .reduce(Vec::new, |mut merged, mut part| {
                    merged.append(&mut part);
                    merged
                })
        });

        crate::debug_event!(
            "search",
            "completed",
            "{mode:?} {} tokens, {} of {total} files matched",
            tokens.len(),
            results.len()
        );
        results.into_iter().collect()
    }

    /// Positions of `token` in every file that contains it.
    pub fn search_for_token(
        &self,
        registry: &WatchRegistry,
        token: &str,
    ) -> HashMap<PathBuf, Vec<usize>> {
        let query = HashSet::from([token.to_string()]);
        self.search(registry, &query, SearchMode::All)
            .into_iter()
            .map(|(path, tokens)| (path, tokens.into_iter().map(|t| t.position).collect()))
            .collect()
    }
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine").field("pool", &self.pool).finish()
    }
}

/// Deal `entries` round-robin into at most `count` non-empty shards.
fn shard<T>(entries: Vec<T>, count: usize) -> Vec<Vec<T>> {
    let count = count.clamp(1, entries.len().max(1));
    let mut shards: Vec<Vec<T>> = (0..count)
        .map(|_| Vec::with_capacity(entries.len() / count + 1))
        .collect();
    for (i, entry) in entries.into_iter().enumerate() {
        shards[i % count].push(entry);
    }
    shards.retain(|s| !s.is_empty());
    shards
}
