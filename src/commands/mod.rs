// src/commands/mod.rs
//! Command handlers for the ferry CLI

mod daemon;
mod info;
mod jobs;
mod repo;

pub use daemon::cmd_daemon;
pub use info::cmd_info;
pub use jobs::cmd_jobs;
pub use repo::{
    cmd_cherry_pick, cmd_copy, cmd_create_repo, cmd_delete_repo, cmd_delta, cmd_include,
    cmd_index, cmd_list, cmd_remove_source,
};

use anyhow::{Context, Result};
use ferry::config::Config;
use ferry::daemon::DaemonLock;
use ferry::db::Store;
use ferry::jobs::{Job, JobId, JobStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Configuration file read when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ferryd/ferryd.toml";

/// Build the process configuration
///
/// Defaults, then the configuration file, then command line overrides.
/// An explicit `--config` must exist; the default file is optional.
pub fn load_config(
    config_path: Option<&Path>,
    base_dir: Option<PathBuf>,
    jobs: Option<i64>,
) -> Result<Config> {
    let mut config = match config_path {
        Some(path) => Config::from_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                Config::from_file(default_path)?
            } else {
                Config::default()
            }
        }
    };

    if let Some(base_dir) = base_dir {
        config.base_dir = base_dir;
    }
    if let Some(jobs) = jobs {
        config.jobs = jobs;
    }
    Ok(config)
}

/// Open the database shared with the daemon
fn open_store(config: &Config) -> Result<Arc<Store>> {
    let db_path = config.db_path();
    let store = Store::open(&db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    Ok(Arc::new(store))
}

fn open_jobs(config: &Config) -> Result<JobStore> {
    Ok(JobStore::new(open_store(config)?))
}

/// Queue a job for the daemon and report it
fn enqueue(config: &Config, mut job: Job) -> Result<JobId> {
    let jobs = open_jobs(config)?;
    let id = jobs
        .push_job(&mut job)
        .with_context(|| format!("Failed to queue {}", job.kind))?;

    println!("Queued {}", job);
    if !DaemonLock::is_held(config.lock_path()) {
        warn!("ferryd is not running; the job will run when it starts");
    }
    Ok(id)
}
