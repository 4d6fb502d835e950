//! Core value types shared by the index and search.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Range;
use std::path::PathBuf;

/// A token produced by a [`Tokenizer`](crate::Tokenizer).
///
/// `position` is a byte offset into the file content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub value: String,
    pub position: usize,
}

impl Token {
    pub fn new(value: impl Into<String>, position: usize) -> Self {
        Self {
            value: value.into(),
            position,
        }
    }

    /// Half-open byte range covered by this token.
    pub fn range(&self) -> Range<usize> {
        self.position..self.position + self.value.len()
    }
}

/// Search results: matching file to its matched tokens, ordered by position.
pub type SearchResults = HashMap<PathBuf, Vec<Token>>;

/// How a multi-token query is matched against a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Every queried token must be present.
    All,
    /// At least one queried token must be present.
    Any,
}

/// The tokens of one file, grouped by value.
///
/// Storing positions per distinct value instead of the raw token list keeps
/// repeated tokens from being duplicated in memory. A `FileIndex` is never
/// mutated after construction; updates replace it wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileIndex {
    tokens: HashMap<String, BTreeSet<usize>>,
}

impl FileIndex {
    pub fn from_tokens(tokens: impl IntoIterator<Item = Token>) -> Self {
        let mut grouped: HashMap<String, BTreeSet<usize>> = HashMap::new();
        for token in tokens {
            grouped.entry(token.value).or_default().insert(token.position);
        }
        Self { tokens: grouped }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains_key(token)
    }

    pub fn positions(&self, token: &str) -> Option<&BTreeSet<usize>> {
        self.tokens.get(token)
    }

    /// Number of distinct token values.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Whether this file satisfies `query` under `mode`.
    ///
    /// An empty query matches every file in [`SearchMode::All`] and none in
    /// [`SearchMode::Any`].
    pub fn matches(&self, query: &HashSet<String>, mode: SearchMode) -> bool {
        match mode {
            SearchMode::All => query.iter().all(|token| self.contains(token)),
            SearchMode::Any => query.iter().any(|token| self.contains(token)),
        }
    }

    /// Expand the queried tokens back into [`Token`]s, sorted by position.
    ///
    /// Tokenizers are free to emit tokens in any order, so the sort happens here.
    pub fn matched_tokens(&self, query: &HashSet<String>) -> Vec<Token> {
        let mut matched: Vec<Token> = query
            .iter()
            .filter_map(|value| self.tokens.get_key_value(value.as_str()))
            .flat_map(|(value, positions)| {
                positions
                    .iter()
                    .map(move |&position| Token::new(value.clone(), position))
            })
            .collect();
        matched.sort_by_key(|token| token.position);
        matched
    }
}
