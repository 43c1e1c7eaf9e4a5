// src/archive/mod.rs

//! Binary package archive access
//!
//! A `.eopkg` archive is a zip container. Only two members matter here:
//!
//! ```text
//! metadata.xml    -> package information
//! files.xml       -> record of the installed files
//! install.tar.xz  -> filesystem contents (never unpacked by ferry)
//! ```
//!
//! The XML documents are mapped onto private serde structs and converted
//! into the plain [`Metadata`] and [`FileRecord`] types the rest of the
//! crate (and the pool database) works with.

mod xml;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

/// Archive member holding package metadata
pub const METADATA_MEMBER: &str = "metadata.xml";

/// Archive member holding the file list
pub const FILES_MEMBER: &str = "files.xml";

/// Package file suffix
pub const PACKAGE_SUFFIX: &str = ".eopkg";

/// One entry of a package's version history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub release: u32,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// Package metadata extracted from an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Binary package name
    pub name: String,
    /// Name of the source the package was built from
    pub source_name: String,
    pub summary: String,
    pub description: String,
    pub licenses: Vec<String>,
    /// Component the package belongs to
    pub component: Option<String>,
    pub distribution: Option<String>,
    pub distribution_release: Option<String>,
    /// Names of runtime dependencies
    pub runtime_dependencies: Vec<String>,
    /// Version history, newest first; never empty
    pub history: Vec<Update>,
}

impl Metadata {
    /// Newest history entry
    pub fn latest(&self) -> &Update {
        &self.history[0]
    }

    /// Release number of this build
    pub fn release(&self) -> u32 {
        self.latest().release
    }

    /// Upstream version of this build
    pub fn version(&self) -> &str {
        &self.latest().version
    }
}

/// A file shipped by a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub file_type: Option<String>,
    pub size: Option<u64>,
    pub mode: Option<String>,
    pub hash: Option<String>,
}

/// An open package archive
///
/// The underlying file is closed when the value is dropped.
pub struct Package {
    path: PathBuf,
    archive: ZipArchive<File>,
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package").field("path", &self.path).finish()
    }
}

impl Package {
    /// Open the archive at `path`, checking it is a readable zip container
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let archive = ZipArchive::new(file).map_err(|e| {
            Error::Archive(format!("{} is not a package archive: {}", path.display(), e))
        })?;

        debug!("Opened package archive {}", path.display());
        Ok(Self { path, archive })
    }

    /// Path this archive was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of the archive, the pool's deduplication key
    pub fn basename(&self) -> Result<String> {
        basename(&self.path)
    }

    /// Read and decode `metadata.xml`
    pub fn read_metadata(&mut self) -> Result<Metadata> {
        let content = self.read_member(METADATA_MEMBER)?;
        xml::parse_metadata(&content)
    }

    /// Read and decode `files.xml`
    pub fn read_files(&mut self) -> Result<Vec<FileRecord>> {
        let content = self.read_member(FILES_MEMBER)?;
        xml::parse_files(&content)
    }

    fn read_member(&mut self, name: &str) -> Result<String> {
        let mut member = self.archive.by_name(name).map_err(|e| {
            Error::Archive(format!(
                "{} has no readable {}: {}",
                self.path.display(),
                name,
                e
            ))
        })?;

        let mut content = String::new();
        member.read_to_string(&mut content)?;
        Ok(content)
    }
}

/// Final path component as an owned string
pub fn basename(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Archive(format!("invalid package path: {}", path.display())))
}
