// src/commands/daemon.rs
//! Foreground daemon

use anyhow::{Context, Result};
use ferry::config::Config;
use ferry::daemon::{DaemonLock, run_daemon};
use std::fs::{self, OpenOptions};
use std::sync::Mutex;

/// Take ownership of the base directory and serve until interrupted
///
/// Logging goes to `<base>/ferryd.log`, and only starts once the instance
/// lock is held so a second daemon never writes into the first one's log.
pub fn cmd_daemon(mut config: Config) -> Result<()> {
    fs::create_dir_all(&config.base_dir).with_context(|| {
        format!(
            "Failed to create base directory: {}",
            config.base_dir.display()
        )
    })?;
    config.base_dir = fs::canonicalize(&config.base_dir).with_context(|| {
        format!(
            "Failed to resolve base directory: {}",
            config.base_dir.display()
        )
    })?;
    if !config.base_dir.is_dir() {
        anyhow::bail!("{} is not a directory", config.base_dir.display());
    }

    let lock = DaemonLock::acquire(config.lock_path())?;
    init_file_logging(&config)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    rt.block_on(run_daemon(config, lock))?;
    Ok(())
}

fn init_file_logging(config: &Config) -> Result<()> {
    let log_path = config.log_path();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}
