// src/jobs/mod.rs

//! Job model, durable queues and the worker processor
//!
//! A [`Job`] is a typed, parameterized unit of work. Jobs are routed to one
//! of two lanes:
//!
//! - the **sequential** lane: one worker, strictly one job at a time, for
//!   anything that changes repository structure
//! - the **background** lane: N workers, no ordering, for CPU-heavy work
//!   such as delta production
//!
//! ```text
//! submitter ──► JobStore (durable) ──┐
//!                                    ├─► Processor ─► handler ─► Manager
//! submitter ──► Processor::push_job ─┘        ▲            │
//!                                             └─ follow-up ┘
//! ```
//!
//! # Module Structure
//!
//! - `store` - durable queues on top of the bucket store
//! - `processor` - lane workers, hand-off and shutdown
//! - `handlers` - one handler per [`JobKind`]

pub mod handlers;
pub mod processor;
pub mod store;

pub use handlers::{JobHandler, JobSink, handler_for};
pub use processor::Processor;
pub use store::{JobStore, PendingJobs};

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version byte at the start of every encoded job record
const RECORD_VERSION: u8 = 1;

const FLAG_SEQUENTIAL: u8 = 0b01;
const FLAG_CLAIMED: u8 = 0b10;

/// Queue identifier assigned by the store, unique within its bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Big-endian key so byte order equals numeric order
    pub fn to_key(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_key(key: &[u8]) -> Result<Self> {
        let bytes: [u8; 8] = key
            .try_into()
            .map_err(|_| Error::Corrupt(format!("job key has {} bytes, expected 8", key.len())))?;
        Ok(Self(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of job; selects the handler and the lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Create an empty repository
    CreateRepo,
    /// Remove a repository and release its pool references
    DeleteRepo,
    /// Add package archives from disk to a repository
    IncludePackages,
    /// Remove every package of a source from a repository
    RemoveSource,
    /// Copy packages of a source between repositories
    CopySource,
    /// Replace a package in one repository by the newest from another
    CherryPick,
    /// Schedule delta production for every package of a repository
    DeltaRepo,
    /// Produce deltas for one package, or one release of it
    DeltaPackage,
    /// Rebuild a repository index
    IndexRepo,
}

impl JobKind {
    pub const ALL: [JobKind; 9] = [
        JobKind::CreateRepo,
        JobKind::DeleteRepo,
        JobKind::IncludePackages,
        JobKind::RemoveSource,
        JobKind::CopySource,
        JobKind::CherryPick,
        JobKind::DeltaRepo,
        JobKind::DeltaPackage,
        JobKind::IndexRepo,
    ];

    /// Whether jobs of this kind run on the sequential lane
    pub const fn is_sequential(&self) -> bool {
        !matches!(self, JobKind::DeltaPackage)
    }

    /// Persisted tag byte
    pub const fn tag(&self) -> u8 {
        match self {
            JobKind::CreateRepo => 1,
            JobKind::DeleteRepo => 2,
            JobKind::IncludePackages => 3,
            JobKind::RemoveSource => 4,
            JobKind::CopySource => 5,
            JobKind::CherryPick => 6,
            JobKind::DeltaRepo => 7,
            JobKind::DeltaPackage => 8,
            JobKind::IndexRepo => 9,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.tag() == tag)
            .ok_or_else(|| Error::Corrupt(format!("unknown job kind tag {}", tag)))
    }

    pub const fn name(&self) -> &'static str {
        match self {
            JobKind::CreateRepo => "CreateRepo",
            JobKind::DeleteRepo => "DeleteRepo",
            JobKind::IncludePackages => "IncludePackages",
            JobKind::RemoveSource => "RemoveSource",
            JobKind::CopySource => "CopySource",
            JobKind::CherryPick => "CherryPick",
            JobKind::DeltaRepo => "DeltaRepo",
            JobKind::DeltaPackage => "DeltaPackage",
            JobKind::IndexRepo => "IndexRepo",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Execution lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Sequential,
    Background,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Sequential => write!(f, "sequential"),
            Lane::Background => write!(f, "background"),
        }
    }
}

/// A queued unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub kind: JobKind,
    /// Positional arguments, meaning depends on `kind`
    pub params: Vec<String>,
    /// A worker has taken ownership
    pub claimed: bool,
    id: Option<JobId>,
}

impl Job {
    /// New unclaimed job routed by its kind's lane
    pub fn new(kind: JobKind, params: Vec<String>) -> Self {
        Self {
            kind,
            params,
            claimed: false,
            id: None,
        }
    }

    /// Queue id, once the job has been stored
    pub fn id(&self) -> Option<JobId> {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: JobId) {
        self.id = Some(id);
    }

    /// Runs on the sequential lane; fixed by the kind
    pub fn is_sequential(&self) -> bool {
        self.kind.is_sequential()
    }

    pub fn lane(&self) -> Lane {
        if self.is_sequential() {
            Lane::Sequential
        } else {
            Lane::Background
        }
    }

    /// Same kind and parameters, ignoring queue state
    pub fn same_work(&self, other: &Job) -> bool {
        self.kind == other.kind && self.params == other.params
    }

    /// Encode as a length-prefixed record
    ///
    /// Layout: version, kind tag, flags, u32 param count, then per param a
    /// u32 length and the UTF-8 bytes. Integers are big-endian. The queue id
    /// is the record key and is not encoded.
    pub fn serialize(&self) -> Vec<u8> {
        let len = 7 + self.params.iter().map(|p| 4 + p.len()).sum::<usize>();
        let mut out = Vec::with_capacity(len);

        let mut flags = 0;
        if self.is_sequential() {
            flags |= FLAG_SEQUENTIAL;
        }
        if self.claimed {
            flags |= FLAG_CLAIMED;
        }

        out.push(RECORD_VERSION);
        out.push(self.kind.tag());
        out.push(flags);
        out.extend_from_slice(&(self.params.len() as u32).to_be_bytes());
        for param in &self.params {
            out.extend_from_slice(&(param.len() as u32).to_be_bytes());
            out.extend_from_slice(param.as_bytes());
        }
        out
    }

    /// Decode a record produced by [`Job::serialize`]
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut reader = RecordReader { bytes, pos: 0 };

        let version = reader.u8()?;
        if version != RECORD_VERSION {
            return Err(Error::Corrupt(format!(
                "unsupported job record version {}",
                version
            )));
        }

        let kind = JobKind::from_tag(reader.u8()?)?;
        let flags = reader.u8()?;
        if flags & !(FLAG_SEQUENTIAL | FLAG_CLAIMED) != 0 {
            return Err(Error::Corrupt(format!("unknown job flags {:#04x}", flags)));
        }
        if (flags & FLAG_SEQUENTIAL != 0) != kind.is_sequential() {
            return Err(Error::Corrupt(format!(
                "{} record has the wrong lane flag",
                kind
            )));
        }

        let count = reader.u32()? as usize;
        let mut params = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let len = reader.u32()? as usize;
            let raw = reader.take(len)?;
            let param = std::str::from_utf8(raw)
                .map_err(|e| Error::Corrupt(format!("job parameter is not UTF-8: {}", e)))?;
            params.push(param.to_string());
        }

        if reader.pos != bytes.len() {
            return Err(Error::Corrupt(format!(
                "{} trailing bytes after job record",
                bytes.len() - reader.pos
            )));
        }

        Ok(Self {
            kind,
            params,
            claimed: flags & FLAG_CLAIMED != 0,
            id: None,
        })
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(id) = self.id {
            write!(f, "#{}", id)?;
        }
        write!(f, " [{}]", self.params.join(", "))
    }
}

struct RecordReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| Error::Corrupt("truncated job record".to_string()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}

/// A job whose handler failed, kept for inspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    /// Id the job had in its queue
    pub queue_id: JobId,
    pub kind: JobKind,
    pub params: Vec<String>,
    pub lane: Lane,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}
