mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use coderev_index::IndexerConfig;

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error naming the first setting that must be positive but is zero.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.index.top_k == 0 {
            bail!("index.top_k must be greater than 0");
        }
        if self.embedding.chunk_words == 0 {
            bail!("embedding.chunk_words must be greater than 0");
        }
        if self.index.parallelism == 0 {
            bail!("index.parallelism must be greater than 0");
        }
        if self.index.blocking_threads == 0 {
            bail!("index.blocking_threads must be greater than 0");
        }
        Ok(())
    }

    #[must_use]
    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            top_k: self.index.top_k,
            max_dependency_files: self.index.max_dependency_files,
            parallelism: self.index.parallelism,
            clone_retries: self.index.clone_retries,
            remote_base: self.index.remote_base.clone(),
            ..IndexerConfig::default()
        }
    }

    #[must_use]
    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.index.watch_debounce_ms)
    }
}
