// src/jobs/handlers/delta_repo.rs

//! Schedule delta production for a whole repository

use super::{DeltaPackageHandler, JobHandler, JobSink, params};
use crate::error::Result;
use crate::jobs::{Job, JobKind};
use crate::manager::Manager;
use tracing::debug;

/// Fan out one background delta job per package name
#[derive(Debug, Clone)]
pub struct DeltaRepoHandler {
    repo: String,
}

impl DeltaRepoHandler {
    pub fn job(repo: &str) -> Job {
        Job::new(JobKind::DeltaRepo, vec![repo.to_string()])
    }

    pub fn from_job(job: &Job) -> Result<Self> {
        let params = params(job, 1, Some(1))?;
        Ok(Self {
            repo: params[0].clone(),
        })
    }
}

impl JobHandler for DeltaRepoHandler {
    fn kind(&self) -> JobKind {
        JobKind::DeltaRepo
    }

    fn execute(&self, sink: &dyn JobSink, manager: &Manager) -> Result<()> {
        let names = manager.package_names(&self.repo)?;
        debug!("Scheduling deltas for {} packages in {}", names.len(), self.repo);
        for name in &names {
            sink.push_job(DeltaPackageHandler::job(&self.repo, name))?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("Produce deltas for repository {}", self.repo)
    }
}
