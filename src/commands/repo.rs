// src/commands/repo.rs
//! Repository commands
//!
//! Mutating commands queue a job for the daemon; `list` reads the shared
//! database directly.

use super::{enqueue, open_store};
use anyhow::{Context, Result, bail};
use ferry::archive::PACKAGE_SUFFIX;
use ferry::config::Config;
use ferry::jobs::handlers::{
    CherryPickHandler, CopySourceHandler, CreateRepoHandler, DeleteRepoHandler,
    DeltaPackageHandler, DeltaRepoHandler, IncludePackagesHandler, IndexRepoHandler,
    RemoveSourceHandler,
};
use ferry::manager::Manager;
use ferry::manager::repo::validate_repo_name;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub fn cmd_create_repo(config: &Config, repo: &str) -> Result<()> {
    validate_repo_name(repo)?;
    enqueue(config, CreateRepoHandler::job(repo))?;
    Ok(())
}

pub fn cmd_delete_repo(config: &Config, repo: &str) -> Result<()> {
    validate_repo_name(repo)?;
    enqueue(config, DeleteRepoHandler::job(repo))?;
    Ok(())
}

/// Queue package files for inclusion
///
/// Directories are scanned (non-recursively) for package files. Paths are
/// made absolute because the daemon runs with its own working directory.
pub fn cmd_include(config: &Config, repo: &str, paths: &[PathBuf]) -> Result<()> {
    validate_repo_name(repo)?;
    let packages = collect_packages(paths)?;
    if packages.is_empty() {
        bail!("No {} files found", PACKAGE_SUFFIX);
    }

    info!("Including {} packages into {}", packages.len(), repo);
    enqueue(config, IncludePackagesHandler::job(repo, packages))?;
    Ok(())
}

pub fn cmd_remove_source(
    config: &Config,
    repo: &str,
    source: &str,
    release: Option<u32>,
) -> Result<()> {
    validate_repo_name(repo)?;
    enqueue(config, RemoveSourceHandler::job(repo, source, release))?;
    Ok(())
}

pub fn cmd_copy(
    config: &Config,
    from: &str,
    to: &str,
    source: &str,
    release: Option<u32>,
) -> Result<()> {
    validate_repo_name(from)?;
    validate_repo_name(to)?;
    enqueue(config, CopySourceHandler::job(from, to, source, release))?;
    Ok(())
}

pub fn cmd_cherry_pick(config: &Config, from: &str, to: &str, package: &str) -> Result<()> {
    validate_repo_name(from)?;
    validate_repo_name(to)?;
    enqueue(config, CherryPickHandler::job(from, to, package))?;
    Ok(())
}

pub fn cmd_delta(config: &Config, repo: &str, package: Option<&str>) -> Result<()> {
    validate_repo_name(repo)?;
    let job = match package {
        Some(name) => DeltaPackageHandler::job(repo, name),
        None => DeltaRepoHandler::job(repo),
    };
    enqueue(config, job)?;
    Ok(())
}

pub fn cmd_index(config: &Config, repo: &str) -> Result<()> {
    validate_repo_name(repo)?;
    enqueue(config, IndexRepoHandler::job(repo))?;
    Ok(())
}

/// List repositories, or the builds held by one repository
pub fn cmd_list(config: &Config, repo: Option<&str>) -> Result<()> {
    let manager = Manager::new(config, open_store(config)?);

    let Some(repo) = repo else {
        let repos = manager.repos()?;
        if repos.is_empty() {
            println!("No repositories");
            return Ok(());
        }
        println!("Repositories:");
        for record in repos {
            let packages = manager.package_names(&record.name)?.len();
            println!(
                "  {} ({} packages, created {})",
                record.name,
                packages,
                record.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        return Ok(());
    };

    let names = manager
        .package_names(repo)
        .with_context(|| format!("Failed to list repository {}", repo))?;
    if names.is_empty() {
        println!("Repository {} is empty", repo);
        return Ok(());
    }

    println!("Packages in {}:", repo);
    for name in names {
        for entry in manager.get_packages(repo, &name)? {
            println!(
                "  {} {}-{} ({})",
                name,
                entry.metadata.version(),
                entry.metadata.release(),
                entry.name
            );
        }
    }
    let deltas = manager.deltas(repo)?;
    if !deltas.is_empty() {
        println!("Deltas: {}", deltas.len());
    }
    Ok(())
}

/// Expand directories into the package files they hold, sorted
fn collect_packages(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut packages = Vec::new();
    for path in paths {
        let path = fs::canonicalize(path)
            .with_context(|| format!("Failed to resolve {}", path.display()))?;
        if !path.is_dir() {
            packages.push(path);
            continue;
        }

        let mut found = Vec::new();
        for entry in fs::read_dir(&path)
            .with_context(|| format!("Failed to read directory {}", path.display()))?
        {
            let entry_path = entry?.path();
            if entry_path.is_file() && is_package_file(&entry_path) {
                found.push(entry_path);
            }
        }
        found.sort();
        packages.extend(found);
    }
    Ok(packages)
}

fn is_package_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(PACKAGE_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::open_jobs;
    use ferry::jobs::JobKind;
    use tempfile::TempDir;

    #[test]
    fn test_collect_packages_scans_directories() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("incoming");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("nano-8.0-95-1-x86_64.eopkg"), b"").unwrap();
        fs::write(dir.join("bash-5.2-12-1-x86_64.eopkg"), b"").unwrap();
        fs::write(dir.join("README"), b"").unwrap();
        let single = temp_dir.path().join("vim-9.1-4-1-x86_64.eopkg");
        fs::write(&single, b"").unwrap();

        let packages = collect_packages(&[dir.clone(), single.clone()]).unwrap();
        let names: Vec<_> = packages
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "bash-5.2-12-1-x86_64.eopkg",
                "nano-8.0-95-1-x86_64.eopkg",
                "vim-9.1-4-1-x86_64.eopkg"
            ]
        );
        assert!(packages.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn test_collect_packages_missing_path() {
        let temp_dir = TempDir::new().unwrap();
        assert!(collect_packages(&[temp_dir.path().join("missing.eopkg")]).is_err());
    }

    #[test]
    fn test_delta_command_picks_lane() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::with_base_dir(temp_dir.path());

        cmd_delta(&config, "unstable", None).unwrap();
        cmd_delta(&config, "unstable", Some("nano")).unwrap();

        let pending = open_jobs(&config).unwrap().pending_jobs().unwrap();
        assert_eq!(pending.sequential.len(), 1);
        assert_eq!(pending.sequential[0].kind, JobKind::DeltaRepo);
        assert_eq!(pending.background.len(), 1);
        assert_eq!(pending.background[0].params, ["unstable", "nano"]);
    }

    #[test]
    fn test_invalid_repo_name_not_queued() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::with_base_dir(temp_dir.path());

        assert!(cmd_create_repo(&config, "../etc").is_err());
        assert!(!config.db_path().exists());
    }
}
