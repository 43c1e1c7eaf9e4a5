// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use ferry::config::Config;
use ferry::db::Store;
use ferry::jobs::{JobStore, Processor};
use ferry::manager::{DeltaBuilder, LinkOrCopy, Manager, PoolEntry};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

/// Write a minimal `.eopkg` archive and return its path
pub fn write_package(dir: &Path, name: &str, source: &str, version: &str, release: u32) -> PathBuf {
    let file_name = format!("{}-{}-{}-1-x86_64.eopkg", name, version, release);
    let metadata = format!(
        r#"<?xml version="1.0" ?>
<PISI>
    <Source>
        <Name>{source}</Name>
        <Packager><Name>Packager</Name></Packager>
    </Source>
    <Package>
        <Name>{name}</Name>
        <Summary xml:lang="en">{name} test package</Summary>
        <Description xml:lang="en">Built for the integration tests</Description>
        <PartOf>system.base</PartOf>
        <License>MIT</License>
        <RuntimeDependencies>
            <Dependency>glibc</Dependency>
        </RuntimeDependencies>
        <History>
            <Update release="{release}">
                <Date>2024-01-01</Date>
                <Version>{version}</Version>
            </Update>
        </History>
        <Distribution>Solus</Distribution>
        <DistributionRelease>1</DistributionRelease>
    </Package>
</PISI>
"#
    );

    let path = dir.join(&file_name);
    let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
    writer
        .start_file("metadata.xml", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(metadata.as_bytes()).unwrap();
    writer
        .start_file("install.tar.xz", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(file_name.as_bytes()).unwrap();
    writer.finish().unwrap();
    path
}

/// Delta builder that writes a small marker file for every request
#[derive(Default)]
pub struct MarkerDeltas {
    pub calls: Mutex<Vec<(String, u32, u32)>>,
}

impl DeltaBuilder for MarkerDeltas {
    fn build(
        &self,
        from: &PoolEntry,
        to: &PoolEntry,
        out_dir: &Path,
    ) -> ferry::Result<Option<PathBuf>> {
        let (name, a, b) = (
            to.metadata.name.clone(),
            from.metadata.release(),
            to.metadata.release(),
        );
        let path = out_dir.join(format!("{}-{}-{}-1-x86_64.delta.eopkg", name, a, b));
        fs::write(&path, format!("{} {} -> {}", name, a, b))?;
        self.calls.lock().unwrap().push((name, a, b));
        Ok(Some(path))
    }
}

/// Configuration rooted under a test directory, with fast polling
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::with_base_dir(root.join("base"));
    config.jobs = 2;
    config.poll_interval_ms = 20;
    config
}

/// A running processor over a file-backed database
pub struct TestDaemon {
    pub temp_dir: TempDir,
    pub config: Config,
    pub manager: Arc<Manager>,
    pub jobs: JobStore,
    pub processor: Processor,
    pub deltas: Arc<MarkerDeltas>,
}

impl TestDaemon {
    pub fn start() -> Self {
        Self::start_in(TempDir::new().unwrap())
    }

    /// Start over whatever state `temp_dir` already holds
    ///
    /// Claims left behind by an earlier run are released first, as the
    /// daemon does on startup.
    pub fn start_in(temp_dir: TempDir) -> Self {
        let config = test_config(temp_dir.path());

        let store = Arc::new(Store::open(config.db_path()).unwrap());
        let deltas = Arc::new(MarkerDeltas::default());
        let manager = Arc::new(Manager::with_parts(
            &config,
            Arc::clone(&store),
            Arc::new(LinkOrCopy),
            deltas.clone(),
        ));
        let jobs = JobStore::new(store);
        jobs.recover_claimed().unwrap();
        let processor = Processor::new(&config, Arc::clone(&manager), jobs.clone());
        processor.begin();

        Self {
            temp_dir,
            config,
            manager,
            jobs,
            processor,
            deltas,
        }
    }

    /// Directory for package files that are not part of the base directory
    pub fn incoming(&self) -> PathBuf {
        let dir = self.temp_dir.path().join("incoming");
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Block until both queues are empty
    pub fn wait_idle(&self) {
        let deadline = Instant::now() + Duration::from_secs(30);
        while !self.jobs.pending_jobs().unwrap().is_empty() {
            assert!(Instant::now() < deadline, "job queues never drained");
            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        self.processor.close();
    }
}
