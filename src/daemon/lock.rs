// src/daemon/lock.rs

//! Instance lock for the daemon
//!
//! The daemon holds an exclusive `flock` on `<base>/ferryd.lock` for its
//! whole lifetime, so only one daemon ever works on a base directory. The
//! PID of the holder is written next to it in `ferryd.pid`.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Exclusive lock on a base directory
pub struct DaemonLock {
    /// Kept open to hold the lock
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl DaemonLock {
    /// Take the lock without blocking
    ///
    /// Fails with [`Error::DaemonRunning`] if another process holds it.
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                let lock = Self { file, path };
                lock.write_pid()?;
                info!("Acquired instance lock at {}", lock.path.display());
                Ok(lock)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("Instance lock already held at {}", path.display());
                Err(Error::DaemonRunning(path))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Whether some process holds the lock at `path`
    pub fn is_held<P: AsRef<Path>>(path: P) -> bool {
        let Ok(file) = File::open(path.as_ref()) else {
            return false;
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                false
            }
            Err(_) => true,
        }
    }

    /// PID recorded by the current holder, if any
    pub fn holder_pid<P: AsRef<Path>>(path: P) -> Option<u32> {
        fs::read_to_string(pid_path(path.as_ref()))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_pid(&self) -> Result<()> {
        fs::write(pid_path(&self.path), std::process::id().to_string())?;
        Ok(())
    }
}

fn pid_path(lock_path: &Path) -> PathBuf {
    lock_path.with_extension("pid")
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(pid_path(&self.path));
        // the flock goes away with the file handle
        info!("Released instance lock at {}", self.path.display());
    }
}
