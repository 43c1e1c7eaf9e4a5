// src/jobs/handlers/mod.rs

//! Job handlers
//!
//! Every [`JobKind`] has one handler type. A handler is built from a stored
//! [`Job`] (validating its parameters), executed against the shared
//! [`Manager`], and may queue follow-up work through a [`JobSink`].
//!
//! | Kind | Parameters | Follow-ups |
//! |------|------------|------------|
//! | CreateRepo | repo | IndexRepo |
//! | DeleteRepo | repo | - |
//! | IncludePackages | repo, path... | DeltaPackage per name, IndexRepo |
//! | RemoveSource | repo, source, [release] | IndexRepo |
//! | CopySource | from, to, source, [release] | IndexRepo(to) |
//! | CherryPick | from, to, package | IndexRepo(to) |
//! | DeltaRepo | repo | DeltaPackage per name |
//! | DeltaPackage | repo, name, [release] | DeltaPackage per release, or IndexRepo |
//! | IndexRepo | repo | - |

pub mod cherry_pick;
pub mod copy_source;
pub mod create_repo;
pub mod delete_repo;
pub mod delta_package;
pub mod delta_repo;
pub mod include_packages;
pub mod index_repo;
pub mod remove_source;

pub use cherry_pick::CherryPickHandler;
pub use copy_source::CopySourceHandler;
pub use create_repo::CreateRepoHandler;
pub use delete_repo::DeleteRepoHandler;
pub use delta_package::DeltaPackageHandler;
pub use delta_repo::DeltaRepoHandler;
pub use include_packages::IncludePackagesHandler;
pub use index_repo::IndexRepoHandler;
pub use remove_source::RemoveSourceHandler;

use super::{Job, JobKind};
use crate::error::{Error, Result};
use crate::manager::Manager;

/// Destination for follow-up jobs queued by a running handler
pub trait JobSink: Send + Sync {
    /// Queue a job
    fn push_job(&self, job: Job) -> Result<()>;

    /// Queue a job unless identical work is already waiting
    fn push_job_coalesced(&self, job: Job) -> Result<()>;
}

/// Capabilities every job kind provides
pub trait JobHandler: Send {
    /// Kind this handler executes
    fn kind(&self) -> JobKind;

    /// Perform the work
    fn execute(&self, sink: &dyn JobSink, manager: &Manager) -> Result<()>;

    /// One-line summary for logs
    fn describe(&self) -> String;
}

/// Build the handler for a job, validating its parameters
pub fn handler_for(job: &Job) -> Result<Box<dyn JobHandler>> {
    let handler: Box<dyn JobHandler> = match job.kind {
        JobKind::CreateRepo => Box::new(CreateRepoHandler::from_job(job)?),
        JobKind::DeleteRepo => Box::new(DeleteRepoHandler::from_job(job)?),
        JobKind::IncludePackages => Box::new(IncludePackagesHandler::from_job(job)?),
        JobKind::RemoveSource => Box::new(RemoveSourceHandler::from_job(job)?),
        JobKind::CopySource => Box::new(CopySourceHandler::from_job(job)?),
        JobKind::CherryPick => Box::new(CherryPickHandler::from_job(job)?),
        JobKind::DeltaRepo => Box::new(DeltaRepoHandler::from_job(job)?),
        JobKind::DeltaPackage => Box::new(DeltaPackageHandler::from_job(job)?),
        JobKind::IndexRepo => Box::new(IndexRepoHandler::from_job(job)?),
    };
    Ok(handler)
}

/// Check the parameter count and that no parameter is blank
fn params(job: &Job, min: usize, max: Option<usize>) -> Result<&[String]> {
    let count = job.params.len();
    let too_many = max.is_some_and(|max| count > max);
    if count < min || too_many {
        let expected = match max {
            Some(max) if max == min => format!("{}", min),
            Some(max) => format!("{} to {}", min, max),
            None => format!("at least {}", min),
        };
        return Err(Error::invalid_params(format!(
            "{} expects {} parameters, got {}",
            job.kind, expected, count
        )));
    }
    if let Some(i) = job.params.iter().position(|p| p.trim().is_empty()) {
        return Err(Error::invalid_params(format!(
            "{} parameter {} is empty",
            job.kind,
            i + 1
        )));
    }
    Ok(&job.params)
}

/// Parse a release number parameter
fn parse_release(kind: JobKind, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| Error::invalid_params(format!("{} release '{}' is not a number", kind, value)))
}
