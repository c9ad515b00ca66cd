use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Directory holding the config file and the default database.
pub const CONFIG_DIR: &str = ".smelltrail";

/// Top-level smelltrail configuration, matching `.smelltrail/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmelltrailConfig {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub batch: BatchSection,
    #[serde(default)]
    pub ingest: IngestSection,
    /// Repository name → working-copy path.
    #[serde(default)]
    pub repositories: BTreeMap<String, PathBuf>,
}

impl SmelltrailConfig {
    /// Read and validate the config under `root`.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = Self::path_for(root);
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Parse and validate config text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn path_for(root: &Path) -> PathBuf {
        root.join(CONFIG_DIR).join("config.toml")
    }

    /// Database location; relative paths are taken from `root`.
    pub fn db_path(&self, root: &Path) -> PathBuf {
        if self.store.path.is_absolute() {
            self.store.path.clone()
        } else {
            root.join(&self.store.path)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch.max_batch_size must be at least 1".into(),
            ));
        }
        if self.batch.max_concurrent_batches == 0 {
            return Err(ConfigError::Invalid(
                "batch.max_concurrent_batches must be at least 1".into(),
            ));
        }
        if self.batch.max_concurrent_processes == 0 {
            return Err(ConfigError::Invalid(
                "batch.max_concurrent_processes must be at least 1".into(),
            ));
        }
        for (name, path) in &self.repositories {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("repository names must not be empty".into()));
            }
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "repository {name} has an empty path"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from(CONFIG_DIR).join("smelltrail.db"),
        }
    }
}

/// Request-coalescing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSection {
    /// Collection window before a batch is dispatched.
    pub delay_ms: u64,
    /// Keys per bulk call; larger windows are split into sequential batches.
    pub max_batch_size: usize,
    /// Outstanding bulk calls across all access patterns of one operation.
    pub max_concurrent_batches: usize,
    /// Concurrent `git` subprocesses inside one batch.
    pub max_concurrent_processes: usize,
}

impl BatchSection {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            delay_ms: 10,
            max_batch_size: 500,
            max_concurrent_batches: 100,
            max_concurrent_processes: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSection {
    /// Check that each appended occurrence descends from its predecessor's commit.
    pub validate_ancestry: bool,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            validate_ancestry: true,
        }
    }
}
