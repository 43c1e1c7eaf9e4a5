// src/jobs/handlers/delta_package.rs

//! Produce deltas for one package
//!
//! The job comes in two forms:
//!
//! - `[repo, name]` looks up every build of the package and queues one
//!   `[repo, name, release]` job per build; a package that is not in the
//!   repository is nothing to do, not a failure
//! - `[repo, name, release]` asks the delta builder for a delta from that
//!   release to the newest one and reindexes the repository if a delta was
//!   produced
//!
//! Both run on the background lane.

use super::{IndexRepoHandler, JobHandler, JobSink, params, parse_release};
use crate::error::Result;
use crate::jobs::{Job, JobKind};
use crate::manager::Manager;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct DeltaPackageHandler {
    repo: String,
    name: String,
    release: Option<u32>,
}

impl DeltaPackageHandler {
    /// Deltas for every build of a package
    pub fn job(repo: &str, name: &str) -> Job {
        Job::new(
            JobKind::DeltaPackage,
            vec![repo.to_string(), name.to_string()],
        )
    }

    /// Delta from one release to the newest
    pub fn release_job(repo: &str, name: &str, release: u32) -> Job {
        Job::new(
            JobKind::DeltaPackage,
            vec![repo.to_string(), name.to_string(), release.to_string()],
        )
    }

    pub fn from_job(job: &Job) -> Result<Self> {
        let params = params(job, 2, Some(3))?;
        let release = params
            .get(2)
            .map(|r| parse_release(job.kind, r))
            .transpose()?;
        Ok(Self {
            repo: params[0].clone(),
            name: params[1].clone(),
            release,
        })
    }

    fn schedule(&self, sink: &dyn JobSink, manager: &Manager) -> Result<()> {
        let entries = manager.get_packages(&self.repo, &self.name)?;
        if entries.is_empty() {
            warn!("No packages named {} in {}", self.name, self.repo);
            return Ok(());
        }

        for entry in &entries {
            sink.push_job(Self::release_job(
                &self.repo,
                &self.name,
                entry.metadata.release(),
            ))?;
        }
        Ok(())
    }

    fn produce(&self, release: u32, sink: &dyn JobSink, manager: &Manager) -> Result<()> {
        match manager.delta(&self.repo, &self.name, release)? {
            Some(record) => {
                debug!("Delta {} ready, reindexing {}", record.name, self.repo);
                sink.push_job_coalesced(IndexRepoHandler::job(&self.repo))
            }
            None => Ok(()),
        }
    }
}

impl JobHandler for DeltaPackageHandler {
    fn kind(&self) -> JobKind {
        JobKind::DeltaPackage
    }

    fn execute(&self, sink: &dyn JobSink, manager: &Manager) -> Result<()> {
        match self.release {
            Some(release) => self.produce(release, sink, manager),
            None => self.schedule(sink, manager),
        }
    }

    fn describe(&self) -> String {
        match self.release {
            Some(release) => format!(
                "Produce delta from {}-{} in {}",
                self.name, release, self.repo
            ),
            None => format!("Produce deltas for {} in {}", self.name, self.repo),
        }
    }
}
