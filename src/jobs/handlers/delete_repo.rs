// src/jobs/handlers/delete_repo.rs

//! Delete a repository

use super::{JobHandler, JobSink, params};
use crate::error::Result;
use crate::jobs::{Job, JobKind};
use crate::manager::Manager;

#[derive(Debug, Clone)]
pub struct DeleteRepoHandler {
    repo: String,
}

impl DeleteRepoHandler {
    pub fn job(repo: &str) -> Job {
        Job::new(JobKind::DeleteRepo, vec![repo.to_string()])
    }

    pub fn from_job(job: &Job) -> Result<Self> {
        let params = params(job, 1, Some(1))?;
        Ok(Self {
            repo: params[0].clone(),
        })
    }
}

impl JobHandler for DeleteRepoHandler {
    fn kind(&self) -> JobKind {
        JobKind::DeleteRepo
    }

    fn execute(&self, _sink: &dyn JobSink, manager: &Manager) -> Result<()> {
        manager.delete_repo(&self.repo)
    }

    fn describe(&self) -> String {
        format!("Delete repository {}", self.repo)
    }
}
