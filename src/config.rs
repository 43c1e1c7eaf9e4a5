// src/config.rs
//! Process configuration for ferry
//!
//! A single [`Config`] is built at startup (defaults, then an optional TOML
//! file, then command line overrides) and handed to every component that
//! needs a path or a tunable. Nothing reads configuration from globals.
//!
//! ```toml
//! base_dir = "/var/lib/ferryd"
//! socket_path = "/run/ferryd.sock"
//! jobs = 4
//! poll_interval_ms = 2000
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Database file inside the base directory
pub const DATABASE_FILE: &str = "ferry.db";

/// Pool directory inside the base directory
pub const POOL_DIRECTORY: &str = "pool";

/// Repository tree inside the base directory
pub const REPO_DIRECTORY: &str = "repo";

/// Lock file asserting daemon ownership of the base directory
pub const LOCK_FILE: &str = "ferryd.lock";

/// Daemon log file
pub const LOG_FILE: &str = "ferryd.log";

/// Ferry configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the database, pool and repositories
    pub base_dir: PathBuf,

    /// Control socket path, consumed by the client transport
    pub socket_path: PathBuf,

    /// Background worker count (0 or negative = all available cores)
    pub jobs: i64,

    /// How often idle workers rescan the durable queues
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("/var/lib/ferryd"),
            socket_path: PathBuf::from("/run/ferryd.sock"),
            jobs: -1,
            poll_interval_ms: 2000,
        }
    }
}

impl Config {
    /// Configuration rooted at `base_dir`, everything else default
    pub fn with_base_dir<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Number of background workers to start
    ///
    /// Non-positive values select the host's available parallelism.
    pub fn effective_jobs(&self) -> usize {
        if self.jobs > 0 {
            return self.jobs as usize;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Poll interval as a [`Duration`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn db_path(&self) -> PathBuf {
        self.base_dir.join(DATABASE_FILE)
    }

    pub fn pool_dir(&self) -> PathBuf {
        self.base_dir.join(POOL_DIRECTORY)
    }

    pub fn repo_root(&self) -> PathBuf {
        self.base_dir.join(REPO_DIRECTORY)
    }

    /// Directory of a single repository
    pub fn repo_dir(&self, name: &str) -> PathBuf {
        self.repo_root().join(name)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(LOCK_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.base_dir.join(LOG_FILE)
    }
}
