// src/manager/pool.rs

//! Deduplicated, reference counted archive storage
//!
//! Every distinct archive basename has exactly one physical file in the pool
//! directory and one [`PoolEntry`] in the `Pool` bucket. Repositories only
//! hold basenames; each repository link adds one reference. The file is
//! materialized when the count goes from 0 to 1 and deleted when it drops
//! back to 0.
//!
//! The `*_in` variants run inside a caller's transaction so the manager can
//! combine pool and repository updates atomically. Files released by a
//! transaction are deleted after it commits through [`Pool::remove_orphans`],
//! which keeps any file whose basename was referenced again in between.

use crate::archive::{Metadata, Package};
use crate::db::{Bucket, Store};
use crate::error::{Error, Result};
use crate::hash;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Bucket holding pool entries, keyed by archive basename
pub const BUCKET_POOL: &str = "Pool";

/// One stored archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    /// Archive basename, the deduplication key
    pub name: String,
    /// Location of the single stored copy
    pub path: PathBuf,
    pub metadata: Metadata,
    /// Number of repository links to this file
    pub ref_count: u64,
    /// SHA-256 of the archive
    pub sha256: String,
}

/// An archive on disk, read and hashed ahead of any transaction
#[derive(Debug, Clone)]
pub struct PackageSource {
    pub path: PathBuf,
    pub basename: String,
    pub metadata: Metadata,
    pub sha256: String,
}

impl PackageSource {
    /// Open the archive at `path` and collect what the pool needs
    pub fn load(path: &Path) -> Result<Self> {
        let mut package = Package::open(path)?;
        let metadata = package.read_metadata()?;
        let basename = package.basename()?;
        drop(package);

        Ok(Self {
            path: path.to_path_buf(),
            basename,
            metadata,
            sha256: hash::sha256_file(path)?,
        })
    }
}

/// Puts a new archive into the pool directory
pub trait Materializer: Send + Sync {
    fn materialize(&self, source: &Path, target: &Path) -> io::Result<()>;
}

/// Hard link the archive, copying when linking is impossible
#[derive(Debug, Default, Clone, Copy)]
pub struct LinkOrCopy;

impl Materializer for LinkOrCopy {
    fn materialize(&self, source: &Path, target: &Path) -> io::Result<()> {
        link_or_copy(source, target)
    }
}

/// Hard link `source` to `target`, falling back to a copy (cross-device)
///
/// An existing `target` is replaced.
pub fn link_or_copy(source: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    remove_if_exists(target)?;

    match fs::hard_link(source, target) {
        Ok(()) => {
            debug!("Hardlinked {} -> {}", source.display(), target.display());
            Ok(())
        }
        Err(e) => {
            debug!(
                "Hardlink failed for {}, falling back to copy: {}",
                source.display(),
                e
            );
            fs::copy(source, target).map(|_| ())
        }
    }
}

/// Remove a file, treating absence as success
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Pool of archives shared by all repositories
#[derive(Clone)]
pub struct Pool {
    store: Arc<Store>,
    dir: PathBuf,
    materializer: Arc<dyn Materializer>,
}

impl Pool {
    pub fn new(store: Arc<Store>, dir: PathBuf, materializer: Arc<dyn Materializer>) -> Self {
        Self {
            store,
            dir,
            materializer,
        }
    }

    /// Directory holding the stored archives
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Look up an entry by basename
    pub fn get_entry(&self, name: &str) -> Result<PoolEntry> {
        self.store.view(|tx| self.get_entry_in(tx, name))
    }

    /// Add a reference to an archive, storing it if it is new
    pub fn ref_package(&self, source: &PackageSource) -> Result<PoolEntry> {
        self.store.update(|tx| self.ref_package_in(tx, source))
    }

    /// Drop a reference; the file is deleted with the last one
    ///
    /// Returns the remaining reference count.
    pub fn unref_package(&self, name: &str) -> Result<u64> {
        let (remaining, orphan) = self.store.update(|tx| {
            let orphan = self.unref_package_in(tx, name)?;
            let remaining = match orphan {
                Some(_) => 0,
                None => self.get_entry_in(tx, name)?.ref_count,
            };
            Ok((remaining, orphan))
        })?;

        if let Some(path) = orphan {
            self.remove_orphans(&[path])?;
        }
        Ok(remaining)
    }

    /// Delete files whose last reference was released by a committed update
    ///
    /// Holds the store lock while deleting, and skips any basename that has
    /// an entry again, so a reference taken after the release keeps its file.
    /// Returns how many files were removed.
    pub fn remove_orphans(&self, orphans: &[PathBuf]) -> Result<usize> {
        self.store.view(|tx| {
            let bucket = Bucket::new(tx, BUCKET_POOL);
            let mut removed = 0;
            for path in orphans {
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if bucket.get(name.as_bytes())?.is_some() {
                    debug!("{} was referenced again, keeping it", name);
                    continue;
                }
                match remove_if_exists(path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove {} from the pool: {}", path.display(), e),
                }
            }
            Ok(removed)
        })
    }

    /// Every entry, ordered by basename
    pub fn entries(&self) -> Result<Vec<PoolEntry>> {
        self.store.view(|tx| {
            Bucket::new(tx, BUCKET_POOL)
                .entries()?
                .iter()
                .map(|(_, value)| serde_json::from_slice::<PoolEntry>(value).map_err(Error::from))
                .collect()
        })
    }

    pub(crate) fn get_entry_in(&self, conn: &Connection, name: &str) -> Result<PoolEntry> {
        let value = Bucket::new(conn, BUCKET_POOL)
            .get(name.as_bytes())?
            .ok_or_else(|| Error::not_found(format!("pool entry {}", name)))?;
        Ok(serde_json::from_slice(&value)?)
    }

    /// Reference an archive from disk, materializing it on first use
    ///
    /// The same basename with a different checksum is a conflict; the pool
    /// never holds two files under one name.
    pub(crate) fn ref_package_in(
        &self,
        conn: &Connection,
        source: &PackageSource,
    ) -> Result<PoolEntry> {
        let bucket = Bucket::new(conn, BUCKET_POOL);
        let existing = match bucket.get(source.basename.as_bytes())? {
            Some(value) => Some(serde_json::from_slice::<PoolEntry>(&value)?),
            None => None,
        };

        let mut entry = match existing {
            Some(entry) if entry.sha256 != source.sha256 => {
                return Err(Error::Conflict(format!(
                    "{} is already pooled with checksum {}",
                    source.basename, entry.sha256
                )));
            }
            Some(entry) => entry,
            None => PoolEntry {
                name: source.basename.clone(),
                path: self.dir.join(&source.basename),
                metadata: source.metadata.clone(),
                ref_count: 0,
                sha256: source.sha256.clone(),
            },
        };

        entry.name = source.basename.clone();
        entry.metadata = source.metadata.clone();
        entry.ref_count += 1;

        if entry.ref_count == 1 {
            self.materializer
                .materialize(&source.path, &entry.path)
                .map_err(|e| {
                    Error::Io(io::Error::new(
                        e.kind(),
                        format!("failed to store {} in the pool: {}", entry.name, e),
                    ))
                })?;
            debug!("Stored {} in the pool", entry.name);
        }

        bucket.put(entry.name.as_bytes(), &serde_json::to_vec(&entry)?)?;
        Ok(entry)
    }

    /// Add a reference to an entry that is already pooled
    pub(crate) fn ref_existing_in(&self, conn: &Connection, name: &str) -> Result<PoolEntry> {
        let mut entry = self.get_entry_in(conn, name)?;
        entry.ref_count += 1;
        Bucket::new(conn, BUCKET_POOL).put(name.as_bytes(), &serde_json::to_vec(&entry)?)?;
        Ok(entry)
    }

    /// Drop a reference inside a transaction
    ///
    /// When the last reference goes the record is deleted and the path of the
    /// now orphaned file is returned; the caller removes it after commit.
    pub(crate) fn unref_package_in(
        &self,
        conn: &Connection,
        name: &str,
    ) -> Result<Option<PathBuf>> {
        let bucket = Bucket::new(conn, BUCKET_POOL);
        let mut entry = self.get_entry_in(conn, name)?;
        entry.ref_count = entry.ref_count.saturating_sub(1);

        if entry.ref_count == 0 {
            bucket.delete(name.as_bytes())?;
            debug!("Released last reference to {}", name);
            return Ok(Some(entry.path));
        }

        bucket.put(name.as_bytes(), &serde_json::to_vec(&entry)?)?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Update;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingMaterializer {
        calls: AtomicUsize,
    }

    impl Materializer for CountingMaterializer {
        fn materialize(&self, source: &Path, target: &Path) -> io::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            link_or_copy(source, target)
        }
    }

    fn metadata(name: &str, release: u32) -> Metadata {
        Metadata {
            name: name.to_string(),
            source_name: name.to_string(),
            summary: String::new(),
            description: String::new(),
            licenses: vec![],
            component: None,
            distribution: None,
            distribution_release: None,
            runtime_dependencies: vec![],
            history: vec![Update {
                release,
                version: "1.0".to_string(),
                date: None,
            }],
        }
    }

    fn source(dir: &Path, basename: &str, content: &[u8]) -> PackageSource {
        let path = dir.join(basename);
        fs::write(&path, content).unwrap();
        PackageSource {
            path,
            basename: basename.to_string(),
            metadata: metadata("nano", 1),
            sha256: hash::sha256(content),
        }
    }

    fn setup(temp_dir: &TempDir) -> (Pool, Arc<CountingMaterializer>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let materializer = Arc::new(CountingMaterializer {
            calls: AtomicUsize::new(0),
        });
        let pool = Pool::new(store, temp_dir.path().join("pool"), materializer.clone());
        (pool, materializer)
    }

    #[test]
    fn test_ref_counts_and_single_materialization() {
        let temp_dir = TempDir::new().unwrap();
        let (pool, materializer) = setup(&temp_dir);
        let nano = source(temp_dir.path(), "nano-1-1-1-x86_64.eopkg", b"nano");

        let first = pool.ref_package(&nano).unwrap();
        assert_eq!(first.ref_count, 1);
        assert_eq!(materializer.calls.load(Ordering::SeqCst), 1);
        assert!(first.path.exists());

        let second = pool.ref_package(&nano).unwrap();
        assert_eq!(second.ref_count, 2);
        assert_eq!(materializer.calls.load(Ordering::SeqCst), 1);

        let stored = pool.get_entry("nano-1-1-1-x86_64.eopkg").unwrap();
        assert_eq!(stored, second);
        assert_eq!(stored.path, temp_dir.path().join("pool/nano-1-1-1-x86_64.eopkg"));
    }

    #[test]
    fn test_get_entry_missing_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let (pool, _) = setup(&temp_dir);
        let err = pool.get_entry("ghost.eopkg").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_unref_deletes_with_last_reference() {
        let temp_dir = TempDir::new().unwrap();
        let (pool, materializer) = setup(&temp_dir);
        let nano = source(temp_dir.path(), "nano.eopkg", b"nano");

        let entry = pool.ref_package(&nano).unwrap();
        pool.ref_package(&nano).unwrap();

        assert_eq!(pool.unref_package("nano.eopkg").unwrap(), 1);
        assert!(entry.path.exists());
        assert_eq!(pool.unref_package("nano.eopkg").unwrap(), 0);
        assert!(!entry.path.exists());
        assert!(pool.get_entry("nano.eopkg").unwrap_err().is_not_found());
        assert!(pool.entries().unwrap().is_empty());

        // a fresh reference stores the file again
        pool.ref_package(&nano).unwrap();
        assert_eq!(materializer.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_orphan_referenced_again_is_kept() {
        let temp_dir = TempDir::new().unwrap();
        let (pool, _) = setup(&temp_dir);
        let nano = source(temp_dir.path(), "nano.eopkg", b"nano");
        let vim = source(temp_dir.path(), "vim.eopkg", b"vim");
        pool.ref_package(&nano).unwrap();
        pool.ref_package(&vim).unwrap();

        // release both, then take nano back before the files are cleaned up
        let orphans: Vec<PathBuf> = pool
            .store
            .update(|tx| {
                Ok([
                    pool.unref_package_in(tx, "nano.eopkg")?,
                    pool.unref_package_in(tx, "vim.eopkg")?,
                ])
            })
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(orphans.len(), 2);
        let again = pool.ref_package(&nano).unwrap();

        assert_eq!(pool.remove_orphans(&orphans).unwrap(), 1);
        assert!(again.path.exists());
        assert_eq!(pool.get_entry("nano.eopkg").unwrap().ref_count, 1);
        assert!(!temp_dir.path().join("pool/vim.eopkg").exists());
    }

    #[test]
    fn test_checksum_conflict() {
        let temp_dir = TempDir::new().unwrap();
        let (pool, _) = setup(&temp_dir);
        pool.ref_package(&source(temp_dir.path(), "nano.eopkg", b"one"))
            .unwrap();

        let other = temp_dir.path().join("other");
        fs::create_dir(&other).unwrap();
        let err = pool
            .ref_package(&source(&other, "nano.eopkg", b"two"))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(pool.get_entry("nano.eopkg").unwrap().ref_count, 1);
    }

    #[test]
    fn test_concurrent_refs_do_not_lose_updates() {
        let temp_dir = TempDir::new().unwrap();
        let (pool, materializer) = setup(&temp_dir);
        let nano = source(temp_dir.path(), "nano.eopkg", b"nano");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let nano = nano.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        pool.ref_package(&nano).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pool.get_entry("nano.eopkg").unwrap().ref_count, 80);
        assert_eq!(materializer.calls.load(Ordering::SeqCst), 1);
    }
}
