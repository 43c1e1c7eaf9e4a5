// src/jobs/handlers/remove_source.rs

//! Remove the packages of a source from a repository

use super::{IndexRepoHandler, JobHandler, JobSink, params, parse_release};
use crate::error::Result;
use crate::jobs::{Job, JobKind};
use crate::manager::Manager;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RemoveSourceHandler {
    repo: String,
    source: String,
    /// Only this release; every release when absent
    release: Option<u32>,
}

impl RemoveSourceHandler {
    pub fn job(repo: &str, source: &str, release: Option<u32>) -> Job {
        let mut params = vec![repo.to_string(), source.to_string()];
        params.extend(release.map(|r| r.to_string()));
        Job::new(JobKind::RemoveSource, params)
    }

    pub fn from_job(job: &Job) -> Result<Self> {
        let params = params(job, 2, Some(3))?;
        let release = params
            .get(2)
            .map(|r| parse_release(job.kind, r))
            .transpose()?;
        Ok(Self {
            repo: params[0].clone(),
            source: params[1].clone(),
            release,
        })
    }
}

impl JobHandler for RemoveSourceHandler {
    fn kind(&self) -> JobKind {
        JobKind::RemoveSource
    }

    fn execute(&self, sink: &dyn JobSink, manager: &Manager) -> Result<()> {
        let removed = manager.remove_source(&self.repo, &self.source, self.release)?;
        if removed.is_empty() {
            warn!("No packages of {} found in {}", self.source, self.repo);
            return Ok(());
        }
        sink.push_job_coalesced(IndexRepoHandler::job(&self.repo))
    }

    fn describe(&self) -> String {
        match self.release {
            Some(release) => format!(
                "Remove release {} of {} from {}",
                release, self.source, self.repo
            ),
            None => format!("Remove {} from {}", self.source, self.repo),
        }
    }
}
