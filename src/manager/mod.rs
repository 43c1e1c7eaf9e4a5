// src/manager/mod.rs

//! Repository manager
//!
//! The [`Manager`] owns the pool and every repository and is shared by all
//! job workers. It does no locking of its own: each operation is a single
//! store transaction, so conflicting mutations serialize in the store.
//! Files that lose their last reference are removed after the transaction
//! commits.
//!
//! # Module Structure
//!
//! - `pool` - reference counted archive storage
//! - `repo` - repository records, buckets and on-disk layout

pub mod pool;
pub mod repo;

pub use pool::{LinkOrCopy, Materializer, PackageSource, Pool, PoolEntry};
pub use repo::{DeltaRecord, RepoRecord};

use crate::config::Config;
use crate::db::{Bucket, Store};
use crate::error::{Error, Result};
use crate::hash;
use chrono::{DateTime, Utc};
use pool::{link_or_copy, remove_if_exists};
use repo::{
    BUCKET_REPOS, INDEX_CHECKSUM_FILE, INDEX_FILE, deltas_bucket, links_bucket, package_dir,
    package_path, package_uri, validate_repo_name,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Produces binary deltas between two builds of a package
pub trait DeltaBuilder: Send + Sync {
    /// Build a delta from `from` to `to`, written into `out_dir`
    ///
    /// Returns the delta file, or `None` when no useful delta exists.
    fn build(&self, from: &PoolEntry, to: &PoolEntry, out_dir: &Path) -> Result<Option<PathBuf>>;
}

/// Builder that never produces a delta
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDeltas;

impl DeltaBuilder for NoDeltas {
    fn build(&self, _from: &PoolEntry, _to: &PoolEntry, _out_dir: &Path) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}

/// Published repository index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoIndex {
    pub repo: String,
    pub generated_at: DateTime<Utc>,
    pub packages: Vec<IndexEntry>,
}

/// Newest build of one package in an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub source: String,
    pub version: String,
    pub release: u32,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    pub runtime_dependencies: Vec<String>,
    /// Path relative to the repository directory
    pub uri: String,
    pub sha256: String,
    pub size: u64,
    pub deltas: Vec<DeltaRecord>,
}

/// Repositories and their shared pool
pub struct Manager {
    store: Arc<Store>,
    pool: Pool,
    repo_root: PathBuf,
    deltas: Arc<dyn DeltaBuilder>,
}

impl Manager {
    /// Manager with hard-link materialization and no delta builder
    pub fn new(config: &Config, store: Arc<Store>) -> Self {
        Self::with_parts(config, store, Arc::new(LinkOrCopy), Arc::new(NoDeltas))
    }

    pub fn with_parts(
        config: &Config,
        store: Arc<Store>,
        materializer: Arc<dyn Materializer>,
        deltas: Arc<dyn DeltaBuilder>,
    ) -> Self {
        let pool = Pool::new(Arc::clone(&store), config.pool_dir(), materializer);
        Self {
            store,
            pool,
            repo_root: config.repo_root(),
            deltas,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Directory of a repository
    pub fn repo_dir(&self, name: &str) -> PathBuf {
        self.repo_root.join(name)
    }

    /// Create an empty repository
    pub fn create_repo(&self, name: &str) -> Result<()> {
        validate_repo_name(name)?;

        self.store.update(|tx| {
            let repos = Bucket::new(tx, BUCKET_REPOS);
            if repos.get(name.as_bytes())?.is_some() {
                return Err(Error::Conflict(format!("repository {} already exists", name)));
            }
            let record = RepoRecord {
                name: name.to_string(),
                created_at: Utc::now(),
            };
            repos.put(name.as_bytes(), &serde_json::to_vec(&record)?)
        })?;

        fs::create_dir_all(self.repo_dir(name))?;
        info!("Created repository {}", name);
        Ok(())
    }

    /// Delete a repository, releasing every pool reference it held
    pub fn delete_repo(&self, name: &str) -> Result<()> {
        let orphans = self.store.update(|tx| {
            self.require_repo(tx, name)?;
            let links = Bucket::new(tx, links_bucket(name));

            let mut orphans = Vec::new();
            for (key, _) in links.entries()? {
                let basename = String::from_utf8_lossy(&key).into_owned();
                orphans.extend(self.pool.unref_package_in(tx, &basename)?);
            }
            links.clear()?;
            Bucket::new(tx, deltas_bucket(name)).clear()?;
            Bucket::new(tx, BUCKET_REPOS).delete(name.as_bytes())?;
            Ok(orphans)
        })?;

        let dir = self.repo_dir(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        self.remove_orphans(&orphans);
        info!("Deleted repository {}", name);
        Ok(())
    }

    /// All repositories, by name
    pub fn repos(&self) -> Result<Vec<RepoRecord>> {
        self.store.view(|tx| {
            Bucket::new(tx, BUCKET_REPOS)
                .entries()?
                .iter()
                .map(|(_, value)| serde_json::from_slice::<RepoRecord>(value).map_err(Error::from))
                .collect()
        })
    }

    /// Add an archive from disk to a repository
    ///
    /// Including the same archive twice is a no-op.
    pub fn include_package(&self, repo: &str, path: &Path) -> Result<PoolEntry> {
        let source = PackageSource::load(path)?;

        let entry = self.store.update(|tx| {
            self.require_repo(tx, repo)?;
            let links = Bucket::new(tx, links_bucket(repo));
            if links.get(source.basename.as_bytes())?.is_some() {
                let entry = self.pool.get_entry_in(tx, &source.basename)?;
                if entry.sha256 != source.sha256 {
                    return Err(Error::Conflict(format!(
                        "{} in {} differs from {}",
                        source.basename,
                        repo,
                        path.display()
                    )));
                }
                debug!("{} is already in {}", source.basename, repo);
                return Ok(entry);
            }

            let entry = self.pool.ref_package_in(tx, &source)?;
            self.link_in(tx, repo, &entry)?;
            Ok(entry)
        })?;

        info!(
            "Included {} ({}-{}) in {}",
            entry.name,
            entry.metadata.version(),
            entry.metadata.release(),
            repo
        );
        Ok(entry)
    }

    /// Remove one archive from a repository; returns whether it was present
    pub fn remove_package(&self, repo: &str, basename: &str) -> Result<bool> {
        let (removed, orphans) = self.store.update(|tx| {
            self.require_repo(tx, repo)?;
            let mut orphans = Vec::new();
            let removed = self.unlink_in(tx, repo, basename, &mut orphans)?;
            Ok((removed, orphans))
        })?;

        self.remove_orphans(&orphans);
        Ok(removed)
    }

    /// Remove the packages built from `source`, optionally one release only
    ///
    /// Returns the removed archive basenames.
    pub fn remove_source(
        &self,
        repo: &str,
        source: &str,
        release: Option<u32>,
    ) -> Result<Vec<String>> {
        let (removed, orphans) = self.store.update(|tx| {
            self.require_repo(tx, repo)?;
            let doomed: Vec<PoolEntry> = self
                .repo_entries_in(tx, repo)?
                .into_iter()
                .filter(|e| e.metadata.source_name == source)
                .filter(|e| release.is_none_or(|r| e.metadata.release() == r))
                .collect();

            let mut orphans = Vec::new();
            let mut removed = Vec::new();
            for entry in &doomed {
                self.unlink_in(tx, repo, &entry.name, &mut orphans)?;
                self.forget_deltas_in(tx, repo, &entry.metadata.name, entry.metadata.release())?;
                removed.push(entry.name.clone());
            }
            Ok((removed, orphans))
        })?;

        self.remove_orphans(&orphans);
        info!("Removed {} packages of {} from {}", removed.len(), source, repo);
        Ok(removed)
    }

    /// Copy the packages of `source` from one repository to another
    ///
    /// Without a release the newest release present in `from` is copied.
    /// Returns the basenames newly linked into `to`.
    pub fn copy_source(
        &self,
        from: &str,
        to: &str,
        source: &str,
        release: Option<u32>,
    ) -> Result<Vec<String>> {
        let copied = self.store.update(|tx| {
            self.require_repo(tx, from)?;
            self.require_repo(tx, to)?;

            let candidates: Vec<PoolEntry> = self
                .repo_entries_in(tx, from)?
                .into_iter()
                .filter(|e| e.metadata.source_name == source)
                .collect();
            let target = match release {
                Some(r) => r,
                None => candidates
                    .iter()
                    .map(|e| e.metadata.release())
                    .max()
                    .ok_or_else(|| Error::not_found(format!("source {} in {}", source, from)))?,
            };

            let selected: Vec<&PoolEntry> = candidates
                .iter()
                .filter(|e| e.metadata.release() == target)
                .collect();
            if selected.is_empty() {
                return Err(Error::not_found(format!(
                    "release {} of source {} in {}",
                    target, source, from
                )));
            }

            let links = Bucket::new(tx, links_bucket(to));
            let mut copied = Vec::new();
            for entry in selected {
                if links.get(entry.name.as_bytes())?.is_some() {
                    continue;
                }
                let entry = self.pool.ref_existing_in(tx, &entry.name)?;
                self.link_in(tx, to, &entry)?;
                copied.push(entry.name);
            }
            Ok(copied)
        })?;

        info!("Copied {} packages of {} from {} to {}", copied.len(), source, from, to);
        Ok(copied)
    }

    /// Make the newest `package` of `from` the only build of it in `to`
    ///
    /// Returns the basename now present in `to`.
    pub fn cherry_pick(&self, from: &str, to: &str, package: &str) -> Result<String> {
        let (picked, orphans) = self.store.update(|tx| {
            self.require_repo(tx, from)?;
            self.require_repo(tx, to)?;

            let newest = self
                .repo_entries_in(tx, from)?
                .into_iter()
                .filter(|e| e.metadata.name == package)
                .max_by_key(|e| e.metadata.release())
                .ok_or_else(|| Error::not_found(format!("package {} in {}", package, from)))?;

            let mut orphans = Vec::new();
            let mut present = false;
            for entry in self.repo_entries_in(tx, to)? {
                if entry.metadata.name != package {
                    continue;
                }
                if entry.name == newest.name {
                    present = true;
                } else {
                    self.unlink_in(tx, to, &entry.name, &mut orphans)?;
                }
            }

            if !present {
                let entry = self.pool.ref_existing_in(tx, &newest.name)?;
                self.link_in(tx, to, &entry)?;
            }
            Ok((newest.name, orphans))
        })?;

        self.remove_orphans(&orphans);
        info!("Cherry-picked {} from {} into {}", picked, from, to);
        Ok(picked)
    }

    /// Every build of `name` in a repository, oldest release first
    ///
    /// An unknown package yields an empty list; an unknown repository is an
    /// error.
    pub fn get_packages(&self, repo: &str, name: &str) -> Result<Vec<PoolEntry>> {
        let mut entries: Vec<PoolEntry> = self.store.view(|tx| {
            self.require_repo(tx, repo)?;
            Ok(self
                .repo_entries_in(tx, repo)?
                .into_iter()
                .filter(|e| e.metadata.name == name)
                .collect())
        })?;
        entries.sort_by_key(|e| e.metadata.release());
        Ok(entries)
    }

    /// Distinct package names in a repository, sorted
    pub fn package_names(&self, repo: &str) -> Result<Vec<String>> {
        self.store.view(|tx| {
            self.require_repo(tx, repo)?;
            let names: BTreeSet<String> = Bucket::new(tx, links_bucket(repo))
                .entries()?
                .into_iter()
                .map(|(_, value)| String::from_utf8_lossy(&value).into_owned())
                .collect();
            Ok(names.into_iter().collect())
        })
    }

    /// Every archive linked into a repository, by basename
    pub fn repo_entries(&self, repo: &str) -> Result<Vec<PoolEntry>> {
        self.store.view(|tx| {
            self.require_repo(tx, repo)?;
            self.repo_entries_in(tx, repo)
        })
    }

    /// Deltas recorded for a repository
    pub fn deltas(&self, repo: &str) -> Result<Vec<DeltaRecord>> {
        self.store.view(|tx| {
            self.require_repo(tx, repo)?;
            deltas_in(tx, repo)
        })
    }

    /// Produce a delta from `release` to the newest build of `name`
    ///
    /// Returns `None` when `release` is the newest build or the builder had
    /// nothing to offer.
    pub fn delta(&self, repo: &str, name: &str, release: u32) -> Result<Option<DeltaRecord>> {
        let packages = self.get_packages(repo, name)?;
        let newest = packages
            .last()
            .ok_or_else(|| Error::not_found(format!("package {} in {}", name, repo)))?;
        if newest.metadata.release() == release {
            return Ok(None);
        }
        let from = packages
            .iter()
            .find(|e| e.metadata.release() == release)
            .ok_or_else(|| {
                Error::not_found(format!("release {} of {} in {}", release, name, repo))
            })?;

        let out_dir = package_dir(&self.repo_dir(repo), name);
        fs::create_dir_all(&out_dir)?;

        let Some(path) = self.deltas.build(from, newest, &out_dir)? else {
            debug!("No delta for {} {} -> {}", name, release, newest.metadata.release());
            return Ok(None);
        };

        let file_name = crate::archive::basename(&path)?;
        let record = DeltaRecord {
            package: name.to_string(),
            from_release: release,
            to_release: newest.metadata.release(),
            uri: package_uri(name, &file_name),
            sha256: hash::sha256_file(&path)?,
            size: fs::metadata(&path)?.len(),
            name: file_name,
        };

        self.store.update(|tx| {
            self.require_repo(tx, repo)?;
            Bucket::new(tx, deltas_bucket(repo))
                .put(record.name.as_bytes(), &serde_json::to_vec(&record)?)
        })?;

        info!("Produced delta {} in {}", record.name, repo);
        Ok(Some(record))
    }

    /// Rebuild and publish the index of a repository
    ///
    /// The index and its checksum sidecar are each replaced atomically.
    pub fn index(&self, repo: &str) -> Result<PathBuf> {
        let (entries, deltas) = self.store.view(|tx| {
            self.require_repo(tx, repo)?;
            Ok((self.repo_entries_in(tx, repo)?, deltas_in(tx, repo)?))
        })?;

        let mut newest: BTreeMap<String, PoolEntry> = BTreeMap::new();
        for entry in entries {
            let replace = newest
                .get(&entry.metadata.name)
                .is_none_or(|current| current.metadata.release() < entry.metadata.release());
            if replace {
                newest.insert(entry.metadata.name.clone(), entry);
            }
        }

        let mut packages = Vec::with_capacity(newest.len());
        for (name, entry) in newest {
            let release = entry.metadata.release();
            packages.push(IndexEntry {
                source: entry.metadata.source_name.clone(),
                version: entry.metadata.version().to_string(),
                release,
                summary: entry.metadata.summary.clone(),
                component: entry.metadata.component.clone(),
                runtime_dependencies: entry.metadata.runtime_dependencies.clone(),
                uri: package_uri(&name, &entry.name),
                size: fs::metadata(&entry.path)?.len(),
                sha256: entry.sha256,
                deltas: deltas
                    .iter()
                    .filter(|d| d.package == name && d.to_release == release)
                    .cloned()
                    .collect(),
                name,
            });
        }

        let index = RepoIndex {
            repo: repo.to_string(),
            generated_at: Utc::now(),
            packages,
        };
        let content = serde_json::to_vec_pretty(&index)?;

        let dir = self.repo_dir(repo);
        fs::create_dir_all(&dir)?;
        let index_path = dir.join(INDEX_FILE);
        write_atomic(&dir, &index_path, &content)?;
        let checksum = format!("{}  {}\n", hash::sha256(&content), INDEX_FILE);
        write_atomic(&dir, &dir.join(INDEX_CHECKSUM_FILE), checksum.as_bytes())?;

        info!("Indexed {} ({} packages)", repo, index.packages.len());
        Ok(index_path)
    }

    fn require_repo(&self, conn: &Connection, name: &str) -> Result<RepoRecord> {
        let value = Bucket::new(conn, BUCKET_REPOS)
            .get(name.as_bytes())?
            .ok_or_else(|| Error::not_found(format!("repository {}", name)))?;
        Ok(serde_json::from_slice(&value)?)
    }

    fn repo_entries_in(&self, conn: &Connection, repo: &str) -> Result<Vec<PoolEntry>> {
        Bucket::new(conn, links_bucket(repo))
            .entries()?
            .iter()
            .map(|(key, _)| self.pool.get_entry_in(conn, &String::from_utf8_lossy(key)))
            .collect()
    }

    /// Record and hard link a pooled archive into a repository
    fn link_in(&self, conn: &Connection, repo: &str, entry: &PoolEntry) -> Result<()> {
        let package = &entry.metadata.name;
        Bucket::new(conn, links_bucket(repo)).put(entry.name.as_bytes(), package.as_bytes())?;
        link_or_copy(
            &entry.path,
            &package_path(&self.repo_dir(repo), package, &entry.name),
        )?;
        Ok(())
    }

    /// Drop a repository link and its pool reference
    fn unlink_in(
        &self,
        conn: &Connection,
        repo: &str,
        basename: &str,
        orphans: &mut Vec<PathBuf>,
    ) -> Result<bool> {
        let links = Bucket::new(conn, links_bucket(repo));
        let Some(package) = links.get(basename.as_bytes())? else {
            return Ok(false);
        };
        let package = String::from_utf8_lossy(&package).into_owned();

        links.delete(basename.as_bytes())?;
        remove_if_exists(&package_path(&self.repo_dir(repo), &package, basename))?;
        orphans.extend(self.pool.unref_package_in(conn, basename)?);
        Ok(true)
    }

    fn forget_deltas_in(
        &self,
        conn: &Connection,
        repo: &str,
        package: &str,
        release: u32,
    ) -> Result<()> {
        let bucket = Bucket::new(conn, deltas_bucket(repo));
        for record in deltas_in(conn, repo)? {
            if record.package == package
                && (record.from_release == release || record.to_release == release)
            {
                bucket.delete(record.name.as_bytes())?;
                remove_if_exists(&self.repo_dir(repo).join(&record.uri))?;
            }
        }
        Ok(())
    }

    /// Delete pool files whose last reference went away
    fn remove_orphans(&self, orphans: &[PathBuf]) {
        if orphans.is_empty() {
            return;
        }
        if let Err(e) = self.pool.remove_orphans(orphans) {
            warn!("Failed to clean up {} pool files: {}", orphans.len(), e);
        }
    }
}

fn deltas_in(conn: &Connection, repo: &str) -> Result<Vec<DeltaRecord>> {
    Bucket::new(conn, deltas_bucket(repo))
        .entries()?
        .iter()
        .map(|(_, value)| serde_json::from_slice::<DeltaRecord>(value).map_err(Error::from))
        .collect()
}

/// Replace `path` with `content` through a temp file in `dir`
fn write_atomic(dir: &Path, path: &Path, content: &[u8]) -> Result<()> {
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::write_package;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        incoming: PathBuf,
        manager: Manager,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::with_base_dir(temp_dir.path().join("base"));
        let store = Arc::new(Store::open_in_memory().unwrap());
        let incoming = temp_dir.path().join("incoming");
        fs::create_dir_all(&incoming).unwrap();
        Fixture {
            manager: Manager::new(&config, store),
            incoming,
            _temp_dir: temp_dir,
        }
    }

    #[test]
    fn test_include_links_and_dedups() {
        let fx = fixture();
        fx.manager.create_repo("unstable").unwrap();
        fx.manager.create_repo("shannon").unwrap();
        let nano = write_package(&fx.incoming, "nano", "4.2", 95);

        let entry = fx.manager.include_package("unstable", &nano).unwrap();
        assert_eq!(entry.ref_count, 1);
        let again = fx.manager.include_package("unstable", &nano).unwrap();
        assert_eq!(again.ref_count, 1);
        fx.manager.include_package("shannon", &nano).unwrap();

        let pooled = fx.manager.pool().get_entry(&entry.name).unwrap();
        assert_eq!(pooled.ref_count, 2);

        let linked = package_path(&fx.manager.repo_dir("unstable"), "nano", &entry.name);
        assert!(linked.exists());
        assert_eq!(fs::read(&linked).unwrap(), fs::read(&pooled.path).unwrap());
    }

    #[test]
    fn test_include_into_missing_repo() {
        let fx = fixture();
        let nano = write_package(&fx.incoming, "nano", "4.2", 95);
        let err = fx.manager.include_package("ghost", &nano).unwrap_err();
        assert!(err.is_not_found());
        assert!(fx.manager.pool().entries().unwrap().is_empty());
    }

    #[test]
    fn test_create_repo_twice_conflicts() {
        let fx = fixture();
        fx.manager.create_repo("unstable").unwrap();
        assert!(matches!(
            fx.manager.create_repo("unstable"),
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            fx.manager.create_repo("../etc"),
            Err(Error::InvalidParams(_))
        ));
        let names: Vec<_> = fx.manager.repos().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["unstable"]);
    }

    #[test]
    fn test_get_packages_sorted_by_release() {
        let fx = fixture();
        fx.manager.create_repo("unstable").unwrap();
        for (version, release) in [("4.3", 96), ("4.1", 94), ("4.2", 95)] {
            let path = write_package(&fx.incoming, "nano", version, release);
            fx.manager.include_package("unstable", &path).unwrap();
        }
        let vim = write_package(&fx.incoming, "vim", "9.0", 3);
        fx.manager.include_package("unstable", &vim).unwrap();

        let releases: Vec<u32> = fx
            .manager
            .get_packages("unstable", "nano")
            .unwrap()
            .iter()
            .map(|e| e.metadata.release())
            .collect();
        assert_eq!(releases, vec![94, 95, 96]);
        assert!(fx.manager.get_packages("unstable", "emacs").unwrap().is_empty());
        assert!(fx.manager.get_packages("ghost", "nano").unwrap_err().is_not_found());
        assert_eq!(fx.manager.package_names("unstable").unwrap(), vec!["nano", "vim"]);
    }

    #[test]
    fn test_copy_source_defaults_to_newest() {
        let fx = fixture();
        fx.manager.create_repo("unstable").unwrap();
        fx.manager.create_repo("shannon").unwrap();
        for (version, release) in [("4.1", 94), ("4.2", 95)] {
            let path = write_package(&fx.incoming, "nano", version, release);
            fx.manager.include_package("unstable", &path).unwrap();
        }

        let copied = fx
            .manager
            .copy_source("unstable", "shannon", "nano", None)
            .unwrap();
        assert_eq!(copied, vec!["nano-4.2-95-1-x86_64.eopkg"]);
        assert!(fx
            .manager
            .copy_source("unstable", "shannon", "nano", None)
            .unwrap()
            .is_empty());

        let older = fx
            .manager
            .copy_source("unstable", "shannon", "nano", Some(94))
            .unwrap();
        assert_eq!(older, vec!["nano-4.1-94-1-x86_64.eopkg"]);

        assert!(fx
            .manager
            .copy_source("unstable", "shannon", "nano", Some(7))
            .unwrap_err()
            .is_not_found());
        assert!(fx
            .manager
            .copy_source("unstable", "shannon", "vim", None)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_cherry_pick_replaces_older_builds() {
        let fx = fixture();
        fx.manager.create_repo("unstable").unwrap();
        fx.manager.create_repo("shannon").unwrap();
        let old = write_package(&fx.incoming, "nano", "4.1", 94);
        let new = write_package(&fx.incoming, "nano", "4.2", 95);
        fx.manager.include_package("shannon", &old).unwrap();
        fx.manager.include_package("unstable", &new).unwrap();

        let picked = fx.manager.cherry_pick("unstable", "shannon", "nano").unwrap();
        assert_eq!(picked, "nano-4.2-95-1-x86_64.eopkg");

        let in_shannon = fx.manager.get_packages("shannon", "nano").unwrap();
        assert_eq!(in_shannon.len(), 1);
        assert_eq!(in_shannon[0].metadata.release(), 95);
        assert_eq!(in_shannon[0].ref_count, 2);

        // the old build lost its only reference
        assert!(fx
            .manager
            .pool()
            .get_entry("nano-4.1-94-1-x86_64.eopkg")
            .unwrap_err()
            .is_not_found());
        assert!(!fx.manager.pool().dir().join("nano-4.1-94-1-x86_64.eopkg").exists());
    }

    #[test]
    fn test_remove_source_by_release() {
        let fx = fixture();
        fx.manager.create_repo("unstable").unwrap();
        for (version, release) in [("4.1", 94), ("4.2", 95)] {
            let path = write_package(&fx.incoming, "nano", version, release);
            fx.manager.include_package("unstable", &path).unwrap();
        }

        let removed = fx.manager.remove_source("unstable", "nano", Some(94)).unwrap();
        assert_eq!(removed, vec!["nano-4.1-94-1-x86_64.eopkg"]);
        assert_eq!(fx.manager.get_packages("unstable", "nano").unwrap().len(), 1);

        let removed = fx.manager.remove_source("unstable", "nano", None).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(fx.manager.pool().entries().unwrap().is_empty());
        assert!(!fx.manager.remove_package("unstable", "nano-4.2-95-1-x86_64.eopkg").unwrap());
    }

    #[test]
    fn test_delete_repo_releases_pool() {
        let fx = fixture();
        fx.manager.create_repo("unstable").unwrap();
        fx.manager.create_repo("shannon").unwrap();
        let nano = write_package(&fx.incoming, "nano", "4.2", 95);
        let entry = fx.manager.include_package("unstable", &nano).unwrap();
        fx.manager.include_package("shannon", &nano).unwrap();

        fx.manager.delete_repo("unstable").unwrap();
        assert!(!fx.manager.repo_dir("unstable").exists());
        assert_eq!(fx.manager.pool().get_entry(&entry.name).unwrap().ref_count, 1);
        assert!(fx.manager.delete_repo("unstable").unwrap_err().is_not_found());

        fx.manager.delete_repo("shannon").unwrap();
        assert!(fx.manager.pool().entries().unwrap().is_empty());
        assert!(!entry.path.exists());
    }

    #[test]
    fn test_index_lists_newest_builds() {
        let fx = fixture();
        fx.manager.create_repo("unstable").unwrap();
        for (name, version, release) in [("nano", "4.1", 94), ("nano", "4.2", 95), ("vim", "9.0", 3)] {
            let path = write_package(&fx.incoming, name, version, release);
            fx.manager.include_package("unstable", &path).unwrap();
        }

        let path = fx.manager.index("unstable").unwrap();
        let content = fs::read(&path).unwrap();
        let index: RepoIndex = serde_json::from_slice(&content).unwrap();
        assert_eq!(index.repo, "unstable");
        assert_eq!(index.packages.len(), 2);
        assert_eq!(index.packages[0].name, "nano");
        assert_eq!(index.packages[0].release, 95);
        assert_eq!(index.packages[0].uri, "n/nano/nano-4.2-95-1-x86_64.eopkg");
        assert_eq!(index.packages[0].source, "nano");
        assert!(index.packages[0].size > 0);
        assert_eq!(index.packages[1].name, "vim");

        let sidecar = fs::read_to_string(path.with_file_name(INDEX_CHECKSUM_FILE)).unwrap();
        assert_eq!(sidecar, format!("{}  index.json\n", hash::sha256(&content)));
    }

    struct FakeDeltas {
        calls: Mutex<Vec<(u32, u32)>>,
    }

    impl DeltaBuilder for FakeDeltas {
        fn build(&self, from: &PoolEntry, to: &PoolEntry, out_dir: &Path) -> Result<Option<PathBuf>> {
            let (a, b) = (from.metadata.release(), to.metadata.release());
            self.calls.lock().unwrap().push((a, b));
            let path = out_dir.join(format!("{}-{}-{}.delta.eopkg", to.metadata.name, a, b));
            fs::write(&path, b"delta")?;
            Ok(Some(path))
        }
    }

    #[test]
    fn test_delta_records_and_indexes() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::with_base_dir(temp_dir.path().join("base"));
        let store = Arc::new(Store::open_in_memory().unwrap());
        let builder = Arc::new(FakeDeltas {
            calls: Mutex::new(Vec::new()),
        });
        let manager = Manager::with_parts(&config, store, Arc::new(LinkOrCopy), builder.clone());

        manager.create_repo("unstable").unwrap();
        for (version, release) in [("4.1", 94), ("4.2", 95)] {
            let path = write_package(temp_dir.path(), "nano", version, release);
            manager.include_package("unstable", &path).unwrap();
        }

        assert!(manager.delta("unstable", "nano", 95).unwrap().is_none());
        let record = manager.delta("unstable", "nano", 94).unwrap().unwrap();
        assert_eq!(record.uri, "n/nano/nano-94-95.delta.eopkg");
        assert_eq!(*builder.calls.lock().unwrap(), vec![(94, 95)]);
        assert!(manager.delta("unstable", "nano", 3).unwrap_err().is_not_found());

        let index: RepoIndex =
            serde_json::from_slice(&fs::read(manager.index("unstable").unwrap()).unwrap()).unwrap();
        assert_eq!(index.packages[0].deltas, vec![record]);

        manager.remove_source("unstable", "nano", Some(94)).unwrap();
        assert!(manager.deltas("unstable").unwrap().is_empty());
    }
}
