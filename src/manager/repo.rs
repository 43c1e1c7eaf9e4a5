// src/manager/repo.rs

//! Repository records and on-disk layout
//!
//! ```text
//! Repos                  name -> RepoRecord (JSON)
//! Repo/<name>            archive basename -> package name
//! RepoDeltas/<name>      delta basename -> DeltaRecord (JSON)
//! ```
//!
//! Packages are hard linked into the repository tree using the usual
//! prefix scheme, so `libfoo` lands in `libf/libfoo/` and `nano` in
//! `n/nano/`.

use crate::db::bucket_path;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const BUCKET_REPOS: &str = "Repos";
pub const BUCKET_REPO: &str = "Repo";
pub const BUCKET_REPO_DELTAS: &str = "RepoDeltas";

/// Index file published in each repository directory
pub const INDEX_FILE: &str = "index.json";

/// Checksum sidecar of the index
pub const INDEX_CHECKSUM_FILE: &str = "index.json.sha256sum";

/// Stored repository record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRecord {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A delta produced for a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaRecord {
    /// Package the delta belongs to
    pub package: String,
    pub from_release: u32,
    pub to_release: u32,
    /// Delta file basename
    pub name: String,
    /// Path relative to the repository directory
    pub uri: String,
    pub sha256: String,
    pub size: u64,
}

/// Bucket holding the links of one repository
pub fn links_bucket(repo: &str) -> String {
    bucket_path(&[BUCKET_REPO, repo])
}

/// Bucket holding the deltas of one repository
pub fn deltas_bucket(repo: &str) -> String {
    bucket_path(&[BUCKET_REPO_DELTAS, repo])
}

/// Reject names that cannot be used as a bucket segment or directory
pub fn validate_repo_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'));
    if !valid {
        return Err(Error::invalid_params(format!(
            "invalid repository name '{}'",
            name
        )));
    }
    Ok(())
}

/// Directory prefix for a package name
pub fn package_prefix(name: &str) -> String {
    let lower = name.to_lowercase();
    if lower.starts_with("lib") && lower.chars().count() > 3 {
        lower.chars().take(4).collect()
    } else {
        lower.chars().take(1).collect()
    }
}

/// Location of a package file relative to its repository directory
pub fn package_uri(package: &str, file_name: &str) -> String {
    format!("{}/{}/{}", package_prefix(package), package, file_name)
}

/// Directory holding every build of a package
pub fn package_dir(repo_dir: &Path, package: &str) -> PathBuf {
    repo_dir.join(package_prefix(package)).join(package)
}

/// Absolute location of a linked package file
pub fn package_path(repo_dir: &Path, package: &str, file_name: &str) -> PathBuf {
    package_dir(repo_dir, package).join(file_name)
}
