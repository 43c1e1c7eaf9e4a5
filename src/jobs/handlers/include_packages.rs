// src/jobs/handlers/include_packages.rs

//! Add package archives to a repository
//!
//! Each archive is included on its own; a re-run after an interruption
//! skips the archives that already made it in. Once everything is linked,
//! every touched package gets a delta pass and the repository is reindexed.

use super::{DeltaPackageHandler, IndexRepoHandler, JobHandler, JobSink, params};
use crate::error::Result;
use crate::jobs::{Job, JobKind};
use crate::manager::Manager;
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct IncludePackagesHandler {
    repo: String,
    paths: Vec<PathBuf>,
}

impl IncludePackagesHandler {
    pub fn job<I, P>(repo: &str, paths: I) -> Job
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut params = vec![repo.to_string()];
        params.extend(
            paths
                .into_iter()
                .map(|p| p.into().to_string_lossy().into_owned()),
        );
        Job::new(JobKind::IncludePackages, params)
    }

    pub fn from_job(job: &Job) -> Result<Self> {
        let params = params(job, 2, None)?;
        Ok(Self {
            repo: params[0].clone(),
            paths: params[1..].iter().map(PathBuf::from).collect(),
        })
    }
}

impl JobHandler for IncludePackagesHandler {
    fn kind(&self) -> JobKind {
        JobKind::IncludePackages
    }

    fn execute(&self, sink: &dyn JobSink, manager: &Manager) -> Result<()> {
        let mut names = BTreeSet::new();
        for path in &self.paths {
            let entry = manager.include_package(&self.repo, path)?;
            names.insert(entry.metadata.name);
        }

        for name in &names {
            sink.push_job(DeltaPackageHandler::job(&self.repo, name))?;
        }
        sink.push_job_coalesced(IndexRepoHandler::job(&self.repo))
    }

    fn describe(&self) -> String {
        format!("Include {} packages in {}", self.paths.len(), self.repo)
    }
}
