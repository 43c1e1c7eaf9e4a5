// src/daemon/mod.rs

//! ferryd - the repository management daemon
//!
//! The daemon owns a base directory for as long as it runs:
//!
//! ```text
//! ferry daemon
//!   ├─ DaemonLock      <base>/ferryd.lock (+ .pid)
//!   ├─ Store           <base>/ferry.db
//!   ├─ Manager         <base>/pool, <base>/repo/<name>
//!   └─ Processor       1 sequential + N background workers
//! ```
//!
//! Clients submit work by writing durable jobs into the shared database;
//! the workers pick them up when their poll interval elapses. On startup
//! any background job left claimed by a crashed daemon is released so it
//! runs again.
//!
//! # Module Structure
//!
//! - `lock` - exclusive instance lock

pub mod lock;

pub use lock::DaemonLock;

use crate::config::Config;
use crate::db::Store;
use crate::error::Result;
use crate::jobs::{JobStore, Processor};
use crate::manager::Manager;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

/// A daemon that has taken ownership of its base directory
pub struct Daemon {
    config: Config,
    manager: Arc<Manager>,
    jobs: JobStore,
    processor: Arc<Processor>,
    // dropped last, after the processor has stopped
    _lock: DaemonLock,
}

impl Daemon {
    /// Open the state under `config.base_dir`, holding `lock`
    pub fn open(config: Config, lock: DaemonLock) -> Result<Self> {
        info!("Starting ferryd version {}", env!("CARGO_PKG_VERSION"));
        info!("Base directory: {}", config.base_dir.display());
        info!("Control socket: {}", config.socket_path.display());

        let store = Arc::new(Store::open(config.db_path())?);
        let jobs = JobStore::new(Arc::clone(&store));
        jobs.recover_claimed()?;

        let pending = jobs.pending_jobs()?;
        if !pending.is_empty() {
            info!(
                "{} sequential and {} background jobs pending",
                pending.sequential.len(),
                pending.background.len()
            );
        }

        let manager = Arc::new(Manager::new(&config, store));
        let processor = Arc::new(Processor::new(&config, Arc::clone(&manager), jobs.clone()));

        Ok(Self {
            config,
            manager,
            jobs,
            processor,
            _lock: lock,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn processor(&self) -> &Arc<Processor> {
        &self.processor
    }

    /// Run the workers until `shutdown` resolves, then stop them
    ///
    /// Shutdown waits for running jobs; there is no deadline.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.processor.begin();
        info!("Daemon ready");

        shutdown.await;
        info!("Daemon shutting down");

        let processor = Arc::clone(&self.processor);
        if let Err(e) = tokio::task::spawn_blocking(move || processor.close()).await {
            error!("Failed to stop the job processor: {}", e);
        }
        Ok(())
    }
}

/// Run a daemon until interrupted
pub async fn run_daemon(config: Config, lock: DaemonLock) -> Result<()> {
    let daemon = Daemon::open(config, lock)?;
    daemon
        .run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => error!("Failed to wait for shutdown signal: {}", e),
            }
        })
        .await
}
