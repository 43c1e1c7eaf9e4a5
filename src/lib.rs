// src/lib.rs

//! Ferry - package repository management
//!
//! Ferry keeps a content-addressed pool of package archives and publishes
//! named repositories that reference pool entries. All mutations run as
//! durable jobs so that a daemon restart never loses queued work.
//!
//! # Architecture
//!
//! - Database-first: jobs, pool entries and repository links live in one
//!   transactional store
//! - Two lanes: structural changes run strictly in order, delta
//!   production runs in parallel
//! - Reference counting: a pool file is deleted once no repository links it
//! - Atomic indexes: repository indexes are replaced in a single rename

pub mod archive;
pub mod config;
pub mod daemon;
pub mod db;
mod error;
pub mod hash;
pub mod jobs;
pub mod manager;

pub use error::{Error, Result};
