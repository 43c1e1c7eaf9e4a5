// src/db/mod.rs

//! Embedded transactional store
//!
//! ferry keeps all durable state in one SQLite database, used as an ordered
//! key/value store with named buckets (see [`Bucket`]). Access goes through
//! two transaction scopes:
//!
//! - [`Store::update`]: read-write, `BEGIN IMMEDIATE`, committed only when the
//!   closure returns `Ok`, rolled back otherwise
//! - [`Store::view`]: read-only snapshot
//!
//! One `Store` handle is shared by every worker of a process; the handle
//! serializes its own transactions. Separate processes (the CLI and the
//! daemon) coordinate through SQLite's file locking and the busy timeout.

pub mod bucket;
pub mod schema;

pub use bucket::{Bucket, bucket_path};

use crate::error::Result;
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// How long a writer waits for another process to release the database
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared handle to the database
pub struct Store {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (creating if needed) the database at `path` and migrate it
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;")?;
        schema::migrate(&conn)?;

        debug!("Opened store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// Private in-memory store, used by tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Database file, if the store is file backed
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` inside a read-write transaction
    ///
    /// All writes made by `f` commit atomically, or none do.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` inside a read-only transaction
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let value = f(&tx)?;
        tx.rollback()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use tempfile::TempDir;

    #[test]
    fn test_update_commits_on_ok() {
        let store = Store::open_in_memory().unwrap();
        store
            .update(|tx| Bucket::new(tx, "Test").put(b"key", b"value"))
            .unwrap();

        let value = store.view(|tx| Bucket::new(tx, "Test").get(b"key")).unwrap();
        assert_eq!(value.unwrap(), b"value");
    }

    #[test]
    fn test_update_rolls_back_on_err() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<()> = store.update(|tx| {
            let bucket = Bucket::new(tx, "Test");
            bucket.put(b"key", b"value")?;
            bucket.next_sequence()?;
            Err(Error::not_found("forced"))
        });
        assert!(result.is_err());

        let (value, seq) = store
            .update(|tx| {
                let bucket = Bucket::new(tx, "Test");
                Ok((bucket.get(b"key")?, bucket.next_sequence()?))
            })
            .unwrap();
        assert!(value.is_none());
        assert_eq!(seq, 1);
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/ferry.db");

        {
            let store = Store::open(&db_path).unwrap();
            assert_eq!(store.path().unwrap(), db_path.as_path());
            store
                .update(|tx| Bucket::new(tx, "Test").put(b"key", b"durable"))
                .unwrap();
        }

        let store = Store::open(&db_path).unwrap();
        let value = store.view(|tx| Bucket::new(tx, "Test").get(b"key")).unwrap();
        assert_eq!(value.unwrap(), b"durable");
    }
}
