// src/jobs/handlers/copy_source.rs

//! Copy the packages of a source between repositories

use super::{IndexRepoHandler, JobHandler, JobSink, params, parse_release};
use crate::error::Result;
use crate::jobs::{Job, JobKind};
use crate::manager::Manager;
use tracing::info;

#[derive(Debug, Clone)]
pub struct CopySourceHandler {
    from: String,
    to: String,
    source: String,
    /// Newest release in `from` when absent
    release: Option<u32>,
}

impl CopySourceHandler {
    pub fn job(from: &str, to: &str, source: &str, release: Option<u32>) -> Job {
        let mut params = vec![from.to_string(), to.to_string(), source.to_string()];
        params.extend(release.map(|r| r.to_string()));
        Job::new(JobKind::CopySource, params)
    }

    pub fn from_job(job: &Job) -> Result<Self> {
        let params = params(job, 3, Some(4))?;
        let release = params
            .get(3)
            .map(|r| parse_release(job.kind, r))
            .transpose()?;
        Ok(Self {
            from: params[0].clone(),
            to: params[1].clone(),
            source: params[2].clone(),
            release,
        })
    }
}

impl JobHandler for CopySourceHandler {
    fn kind(&self) -> JobKind {
        JobKind::CopySource
    }

    fn execute(&self, sink: &dyn JobSink, manager: &Manager) -> Result<()> {
        let copied = manager.copy_source(&self.from, &self.to, &self.source, self.release)?;
        if copied.is_empty() {
            info!("{} in {} is already up to date", self.source, self.to);
            return Ok(());
        }
        sink.push_job_coalesced(IndexRepoHandler::job(&self.to))
    }

    fn describe(&self) -> String {
        format!("Copy {} from {} to {}", self.source, self.from, self.to)
    }
}
