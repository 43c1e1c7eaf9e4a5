// src/error.rs

//! Error types for ferry

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the store, the job system and the repository manager
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying SQLite failure (transaction, I/O inside the database)
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Requested resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Job parameters are malformed for the job kind
    #[error("job has invalid parameters: {0}")]
    InvalidParams(String),

    /// A persisted record could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Operation would break an invariant of existing state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Package archive could not be read
    #[error("archive error: {0}")]
    Archive(String),

    /// The processor has been closed and accepts no more work
    #[error("job processor is closed")]
    ProcessorClosed,

    /// The processor has not been started yet
    #[error("job processor is not running")]
    ProcessorNotRunning,

    /// Another daemon instance owns the base directory
    #[error("another ferryd instance holds {0}")]
    DaemonRunning(PathBuf),
}

impl Error {
    /// Shorthand for a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Shorthand for an invalid-parameters error
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }

    /// True for the not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
