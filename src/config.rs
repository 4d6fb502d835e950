//! Layered configuration.
//!
//! Sources, later overriding earlier:
//! - compiled defaults
//! - `.tokindex/settings.toml`, found in the current directory or an ancestor
//! - environment variables
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `TOKINDEX_` and use double
//! underscores to separate nested levels:
//! - `TOKINDEX_INDEXING__WALK_PERMITS=16` sets `indexing.walk_permits`
//! - `TOKINDEX_INDEXING__TOKENIZER=whitespace` sets `indexing.tokenizer`
//! - `TOKINDEX_LOGGING__DEFAULT=debug` sets `logging.default`

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{IndexerError, IndexerResult};
use crate::indexing::walker::DEFAULT_WALK_PERMITS;
use crate::tokenizer::TokenizerKind;

const CONFIG_DIR: &str = ".tokindex";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "TOKINDEX_";

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexingConfig {
    /// Concurrent directory listings during a walk
    #[serde(default = "default_walk_permits")]
    pub walk_permits: usize,

    /// Search worker threads, 0 for one per CPU
    #[serde(default)]
    pub search_threads: usize,

    #[serde(default)]
    pub tokenizer: TokenizerKind,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Level for everything without a module override
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides, e.g. `tokindex::indexing = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_walk_permits() -> usize {
    DEFAULT_WALK_PERMITS
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            walk_permits: default_walk_permits(),
            search_threads: 0,
            tokenizer: TokenizerKind::default(),
        }
    }
}

impl IndexingConfig {
    pub fn effective_search_threads(&self) -> usize {
        if self.search_threads == 0 {
            num_cpus::get()
        } else {
            self.search_threads
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> IndexerResult<Self> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file. A missing file yields defaults.
    pub fn load_from(path: impl AsRef<Path>) -> IndexerResult<Self> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nesting, single underscore stays in field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(|e| IndexerError::Config(Box::new(e)))
    }

    /// Find `.tokindex/settings.toml` in the current directory or an ancestor.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        current
            .ancestors()
            .map(|ancestor| ancestor.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join(CONFIG_FILE))
    }

    /// Save current configuration to file.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }
}
