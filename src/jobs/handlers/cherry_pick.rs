// src/jobs/handlers/cherry_pick.rs

//! Sync a single package from one repository to another

use super::{IndexRepoHandler, JobHandler, JobSink, params};
use crate::error::Result;
use crate::jobs::{Job, JobKind};
use crate::manager::Manager;

/// Replace every build of a package in `to` by the newest build in `from`
#[derive(Debug, Clone)]
pub struct CherryPickHandler {
    from: String,
    to: String,
    package: String,
}

impl CherryPickHandler {
    pub fn job(from: &str, to: &str, package: &str) -> Job {
        Job::new(
            JobKind::CherryPick,
            vec![from.to_string(), to.to_string(), package.to_string()],
        )
    }

    pub fn from_job(job: &Job) -> Result<Self> {
        let params = params(job, 3, Some(3))?;
        Ok(Self {
            from: params[0].clone(),
            to: params[1].clone(),
            package: params[2].clone(),
        })
    }
}

impl JobHandler for CherryPickHandler {
    fn kind(&self) -> JobKind {
        JobKind::CherryPick
    }

    fn execute(&self, sink: &dyn JobSink, manager: &Manager) -> Result<()> {
        manager.cherry_pick(&self.from, &self.to, &self.package)?;
        sink.push_job_coalesced(IndexRepoHandler::job(&self.to))
    }

    fn describe(&self) -> String {
        format!(
            "Cherry-pick {} from {} into {}",
            self.package, self.from, self.to
        )
    }
}
