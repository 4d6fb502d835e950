//! Error types for watching and indexing.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watch registration, indexing and search.
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("all paths given to a single watch must share the parent directory {expected}, but {path} does not")]
    MixedParents { expected: PathBuf, path: PathBuf },

    #[error("all paths given to a single watch must be regular files if more than one is given: {path}")]
    NotAFile { path: PathBuf },

    #[error("no paths given to watch")]
    NoPaths,

    #[error("{path} is not a watched root path")]
    UnknownRoot { path: PathBuf },

    #[error("Failed to index {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list directory {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("change notification queue overflowed while watching {path}, index is incomplete")]
    Overflow { path: PathBuf },

    #[error("ran out of memory while indexing {path}, index for this watch was cleared")]
    ResourceExhausted { path: PathBuf },

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("No tokio runtime to schedule work on: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Broad category of an [`IndexerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed watch request. Registry state is untouched.
    User,
    /// A bug in the registry bookkeeping.
    RegistryInvariant,
    /// A single path failed to read or list. Other paths are unaffected.
    Indexing,
    /// The notifier lost events. The watch must be re-added to resync.
    Overflow,
    /// Memory ran out and the affected index was dropped.
    ResourceExhaustion,
    /// The runtime environment (native watcher, thread pool, config) failed.
    Environment,
}

impl IndexerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            IndexerError::MixedParents { .. }
            | IndexerError::NotAFile { .. }
            | IndexerError::NoPaths => ErrorClass::User,
            IndexerError::UnknownRoot { .. } => ErrorClass::RegistryInvariant,
            IndexerError::Read { .. } | IndexerError::Walk { .. } => ErrorClass::Indexing,
            IndexerError::Overflow { .. } => ErrorClass::Overflow,
            IndexerError::ResourceExhausted { .. } => ErrorClass::ResourceExhaustion,
            IndexerError::Watch(_)
            | IndexerError::Pool(_)
            | IndexerError::Config(_)
            | IndexerError::NoRuntime(_) => ErrorClass::Environment,
        }
    }

    /// Whether the failure was caused by the caller's request rather than the environment.
    pub fn is_user_error(&self) -> bool {
        self.class() == ErrorClass::User
    }
}

pub type IndexerResult<T> = Result<T, IndexerError>;
