// src/jobs/handlers/index_repo.rs

//! Rebuild a repository index

use super::{JobHandler, JobSink, params};
use crate::error::Result;
use crate::jobs::{Job, JobKind};
use crate::manager::Manager;

/// Publish a fresh index for one repository
#[derive(Debug, Clone)]
pub struct IndexRepoHandler {
    repo: String,
}

impl IndexRepoHandler {
    pub fn job(repo: &str) -> Job {
        Job::new(JobKind::IndexRepo, vec![repo.to_string()])
    }

    pub fn from_job(job: &Job) -> Result<Self> {
        let params = params(job, 1, Some(1))?;
        Ok(Self {
            repo: params[0].clone(),
        })
    }
}

impl JobHandler for IndexRepoHandler {
    fn kind(&self) -> JobKind {
        JobKind::IndexRepo
    }

    fn execute(&self, _sink: &dyn JobSink, manager: &Manager) -> Result<()> {
        manager.index(&self.repo)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("Index repository {}", self.repo)
    }
}
