//! Pluggable content splitting.
//!
//! The index is agnostic to how text is split; anything implementing
//! [`Tokenizer`] can be handed to the [`Indexer`](crate::Indexer).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};

use crate::types::Token;

/// Splits file content into tokens.
///
/// Called concurrently from many tasks, so implementations must be `Send + Sync`.
pub trait Tokenizer: Send + Sync {
    fn split(&self, content: &str) -> Vec<Token>;
}

impl<F> Tokenizer for F
where
    F: Fn(&str) -> Vec<Token> + Send + Sync,
{
    fn split(&self, content: &str) -> Vec<Token> {
        self(content)
    }
}

/// Splits on whitespace: every maximal run of non-whitespace is a token.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn split(&self, content: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut start: Option<usize> = None;
        for (offset, ch) in content.char_indices() {
            match (ch.is_whitespace(), start) {
                (true, Some(begin)) => {
                    tokens.push(Token::new(&content[begin..offset], begin));
                    start = None;
                }
                (false, None) => start = Some(offset),
                _ => {}
            }
        }
        if let Some(begin) = start {
            tokens.push(Token::new(&content[begin..], begin));
        }
        tokens
    }
}

/// Splits into runs of word characters (`\w+`).
///
/// Content that looks binary (contains control characters other than
/// whitespace) yields no tokens at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordTokenizer;

static WORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+").expect("word pattern is valid"));

impl Tokenizer for WordTokenizer {
    fn split(&self, content: &str) -> Vec<Token> {
        if is_binary_content(content) {
            return Vec::new();
        }
        WORD_PATTERN
            .find_iter(content)
            .map(|m| Token::new(m.as_str(), m.start()))
            .collect()
    }
}

fn is_binary_content(content: &str) -> bool {
    content
        .chars()
        .any(|c| c < '\u{0009}' || ('\u{000E}'..='\u{001F}').contains(&c) || c == '\u{007F}')
}

/// Built-in tokenizer selection, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    #[default]
    Word,
    Whitespace,
}

impl TokenizerKind {
    pub fn build(self) -> Arc<dyn Tokenizer> {
        match self {
            TokenizerKind::Word => Arc::new(WordTokenizer),
            TokenizerKind::Whitespace => Arc::new(WhitespaceTokenizer),
        }
    }
}
