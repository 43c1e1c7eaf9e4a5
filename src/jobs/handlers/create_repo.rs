// src/jobs/handlers/create_repo.rs

//! Create a repository

use super::{IndexRepoHandler, JobHandler, JobSink, params};
use crate::error::Result;
use crate::jobs::{Job, JobKind};
use crate::manager::Manager;

#[derive(Debug, Clone)]
pub struct CreateRepoHandler {
    repo: String,
}

impl CreateRepoHandler {
    pub fn job(repo: &str) -> Job {
        Job::new(JobKind::CreateRepo, vec![repo.to_string()])
    }

    pub fn from_job(job: &Job) -> Result<Self> {
        let params = params(job, 1, Some(1))?;
        Ok(Self {
            repo: params[0].clone(),
        })
    }
}

impl JobHandler for CreateRepoHandler {
    fn kind(&self) -> JobKind {
        JobKind::CreateRepo
    }

    fn execute(&self, sink: &dyn JobSink, manager: &Manager) -> Result<()> {
        manager.create_repo(&self.repo)?;
        // publish an empty index right away
        sink.push_job_coalesced(IndexRepoHandler::job(&self.repo))
    }

    fn describe(&self) -> String {
        format!("Create repository {}", self.repo)
    }
}
