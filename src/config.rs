//! On-disk configuration.
//!
//! Loaded from `--config <path>` or `$XDG_CONFIG_HOME/genepack/config.toml`.
//! Command-line flags and `GENEPACK_*` environment variables are applied on
//! top by the binary.

use crate::error::{GeneError, Result};
use crate::pack::chunker::DEFAULT_CHUNK_SIZE;
use crate::transfer::poller::PollerConfig;
use crate::transfer::reconciler::{ReconcilerConfig, DEFAULT_PARALLELISM};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub store_dir: PathBuf,
    pub server: Option<String>,
    pub token: Option<String>,
    pub chunk_size: u64,
    pub parallelism: usize,
    pub poll_interval_secs: u64,
    pub availability_timeout_secs: u64,
    pub grant_refresh_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            server: None,
            token: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            parallelism: DEFAULT_PARALLELISM,
            poll_interval_secs: 5,
            availability_timeout_secs: 300,
            grant_refresh_secs: 10,
        }
    }
}

/// `$XDG_DATA_HOME/genepack/genes`, or `.genepack` in the working directory.
pub fn default_store_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("genepack").join("genes"))
        .unwrap_or_else(|| PathBuf::from(".genepack"))
}

/// `$XDG_CONFIG_HOME/genepack/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("genepack").join("config.toml"))
}

impl Config {
    /// Load `path`, or the default location when `None`.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match default_config_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if required {
                return Err(GeneError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&contents)
            .map_err(|e| GeneError::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(contents).map_err(|e| GeneError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(GeneError::InvalidChunkSize(0));
        }
        if self.parallelism == 0 {
            return Err(GeneError::Validation {
                field: "parallelism",
                message: "must be at least 1".to_string(),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(GeneError::Validation {
                field: "poll_interval_secs",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            parallelism: self.parallelism,
            grant_refresh: Duration::from_secs(self.grant_refresh_secs),
            ..ReconcilerConfig::default()
        }
    }

    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            timeout: Duration::from_secs(self.availability_timeout_secs),
        }
    }
}
