// src/cli.rs
//! CLI definitions for ferry
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.
//!
//! Every command that changes a repository only queues a durable job; the
//! daemon picks it up on its next poll. `jobs`, `list` and `info` read
//! state directly and work whether or not the daemon is running.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ferry")]
#[command(author = "Ferry Contributors")]
#[command(version)]
#[command(about = "Package repository management daemon", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Base directory holding the database, pool and repositories
    #[arg(short, long, global = true, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,

    /// Background worker count (0 = all cores)
    #[arg(short, long, global = true, allow_negative_numbers = true)]
    pub jobs: Option<i64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon in the foreground until interrupted
    Daemon,

    /// Create an empty repository
    CreateRepo {
        /// Repository name
        repo: String,
    },

    /// Delete a repository and drop its pool references
    DeleteRepo {
        /// Repository name
        repo: String,
    },

    /// Include package archives into a repository
    Include {
        /// Repository name
        repo: String,

        /// Package files, or directories to scan for packages
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Remove every package built from a source
    RemoveSource {
        /// Repository name
        repo: String,

        /// Source name
        source: String,

        /// Only remove this release
        #[arg(short, long)]
        release: Option<u32>,
    },

    /// Copy the packages of a source into another repository
    Copy {
        /// Repository to copy from
        from: String,

        /// Repository to copy into
        to: String,

        /// Source name
        source: String,

        /// Release to copy (default: newest)
        #[arg(short, long)]
        release: Option<u32>,
    },

    /// Replace a package in the target with the newest build from another repository
    CherryPick {
        /// Repository to pick from
        from: String,

        /// Repository to pick into
        to: String,

        /// Package name
        package: String,
    },

    /// Produce deltas for a repository
    Delta {
        /// Repository name
        repo: String,

        /// Only this package
        #[arg(short, long)]
        package: Option<String>,
    },

    /// Rebuild a repository index
    Index {
        /// Repository name
        repo: String,
    },

    /// Show pending and failed jobs
    Jobs {
        /// Forget all failed jobs
        #[arg(long)]
        clear_failed: bool,
    },

    /// List repositories, or the packages of one repository
    List {
        /// Repository name
        repo: Option<String>,
    },

    /// Show the metadata of a package file
    Info {
        /// Package file
        path: PathBuf,

        /// Also list the files shipped by the package
        #[arg(short, long)]
        files: bool,
    },
}
