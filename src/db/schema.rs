// src/db/schema.rs

//! Database schema definitions and migrations for ferry
//!
//! The schema is deliberately tiny: a key/value table partitioned by bucket
//! path and a table of per-bucket sequence counters. Everything else (jobs,
//! pool entries, repository links) lives in buckets.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version > SCHEMA_VERSION {
        return Err(Error::Corrupt(format!(
            "database schema version {} is newer than supported version {}",
            current_version, SCHEMA_VERSION
        )));
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => Err(Error::Corrupt(format!("unknown migration version: {}", version))),
    }
}

/// Initial schema - Version 1
///
/// - kv: bucket-partitioned records, keys compared bytewise
/// - sequences: monotonically increasing counter per bucket
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE kv (
            bucket TEXT NOT NULL,
            key BLOB NOT NULL,
            value BLOB NOT NULL,
            PRIMARY KEY (bucket, key)
        ) WITHOUT ROWID;

        CREATE TABLE sequences (
            bucket TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );
        ",
    )?;

    Ok(())
}
