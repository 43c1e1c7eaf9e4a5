// src/db/bucket.rs

//! Named buckets of ordered key/value records
//!
//! A bucket is addressed by a slash separated path (`"JobRoot/Async"`), which
//! is how nesting is expressed. Keys are compared as raw bytes, so numeric
//! keys must be big-endian encoded to iterate in numeric order.
//!
//! A `Bucket` borrows the connection of an open transaction; it never starts
//! or commits transactions itself.

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, params};

/// Join bucket path segments
pub fn bucket_path(segments: &[&str]) -> String {
    segments.join("/")
}

/// View of one bucket inside a transaction
pub struct Bucket<'conn> {
    conn: &'conn Connection,
    path: String,
}

impl<'conn> Bucket<'conn> {
    pub fn new(conn: &'conn Connection, path: impl Into<String>) -> Self {
        Self {
            conn,
            path: path.into(),
        }
    }

    /// Bucket path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Fetch the value stored under `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv WHERE bucket = ?1 AND key = ?2",
                params![&self.path, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Store `value` under `key`, replacing any previous value
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.conn.execute(
            "INSERT INTO kv (bucket, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (bucket, key) DO UPDATE SET value = excluded.value",
            params![&self.path, key, value],
        )?;
        Ok(())
    }

    /// Delete `key`; returns whether a record was removed
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM kv WHERE bucket = ?1 AND key = ?2",
            params![&self.path, key],
        )?;
        Ok(rows > 0)
    }

    /// First record in key order
    pub fn first(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let entry = self
            .conn
            .query_row(
                "SELECT key, value FROM kv WHERE bucket = ?1 ORDER BY key ASC LIMIT 1",
                [&self.path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(entry)
    }

    /// Walk records in key order until `f` returns `Some`
    ///
    /// Rows are read lazily, so stopping early does not load the rest of
    /// the bucket.
    pub fn find_map<T, F>(&self, mut f: F) -> Result<Option<T>>
    where
        F: FnMut(&[u8], &[u8]) -> Result<Option<T>>,
    {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM kv WHERE bucket = ?1 ORDER BY key ASC")?;
        let mut rows = stmt.query([&self.path])?;

        while let Some(row) = rows.next()? {
            let key: Vec<u8> = row.get(0)?;
            let value: Vec<u8> = row.get(1)?;
            if let Some(found) = f(&key, &value)? {
                return Ok(Some(found));
            }
        }

        Ok(None)
    }

    /// All records in key order
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM kv WHERE bucket = ?1 ORDER BY key ASC")?;
        let entries = stmt
            .query_map([&self.path], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Number of records
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM kv WHERE bucket = ?1",
            [&self.path],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every record in the bucket; returns the number removed
    pub fn clear(&self) -> Result<usize> {
        let rows = self
            .conn
            .execute("DELETE FROM kv WHERE bucket = ?1", [&self.path])?;
        Ok(rows)
    }

    /// Next value of this bucket's sequence, starting at 1
    ///
    /// Like every write, the increment only becomes durable when the
    /// surrounding transaction commits.
    pub fn next_sequence(&self) -> Result<u64> {
        self.conn.execute(
            "INSERT INTO sequences (bucket, value) VALUES (?1, 1)
             ON CONFLICT (bucket) DO UPDATE SET value = value + 1",
            [&self.path],
        )?;
        let value: i64 = self.conn.query_row(
            "SELECT value FROM sequences WHERE bucket = ?1",
            [&self.path],
            |row| row.get(0),
        )?;
        Ok(value as u64)
    }
}
