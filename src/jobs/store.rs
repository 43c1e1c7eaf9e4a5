// src/jobs/store.rs

//! Durable job queues
//!
//! Two queues live under the `JobRoot` bucket:
//!
//! - `JobRoot/Sync` - sequential jobs, consumed by exactly one worker, so the
//!   head is taken without touching the claim flag
//! - `JobRoot/Async` - background jobs, consumed by competing workers; a
//!   claim flips the persisted flag in the same transaction that reads it
//!
//! Jobs whose handler failed are moved to `JobRoot/Failed` as JSON records
//! and never retried automatically. Records that no longer decode are
//! deleted and logged by the first scan that meets them, so one bad record
//! never blocks the jobs queued behind it.

use super::{FailedJob, Job, JobId, Lane};
use crate::db::{Bucket, Store, bucket_path};
use crate::error::{Error, Result};
use chrono::Utc;
use rusqlite::Connection;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const BUCKET_ROOT_JOBS: &str = "JobRoot";
pub const BUCKET_ASYNC_JOBS: &str = "Async";
pub const BUCKET_SEQUENTIAL_JOBS: &str = "Sync";
pub const BUCKET_FAILED_JOBS: &str = "Failed";

/// Snapshot of both queues, in id order
#[derive(Debug, Clone, Default)]
pub struct PendingJobs {
    pub sequential: Vec<Job>,
    pub background: Vec<Job>,
}

impl PendingJobs {
    pub fn is_empty(&self) -> bool {
        self.sequential.is_empty() && self.background.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sequential.len() + self.background.len()
    }
}

/// Persistent job queues on top of the shared [`Store`]
#[derive(Clone)]
pub struct JobStore {
    store: Arc<Store>,
}

fn lane_bucket(lane: Lane) -> String {
    let name = match lane {
        Lane::Sequential => BUCKET_SEQUENTIAL_JOBS,
        Lane::Background => BUCKET_ASYNC_JOBS,
    };
    bucket_path(&[BUCKET_ROOT_JOBS, name])
}

fn failed_bucket() -> String {
    bucket_path(&[BUCKET_ROOT_JOBS, BUCKET_FAILED_JOBS])
}

fn decode(key: &[u8], value: &[u8]) -> Result<Job> {
    let mut job = Job::deserialize(value)?;
    job.set_id(JobId::from_key(key)?);
    Ok(job)
}

fn stored_id(job: &Job) -> Result<JobId> {
    job.id()
        .ok_or_else(|| Error::invalid_params(format!("{} was never stored", job)))
}

/// First job of `lane` that `accept` takes, in id order
///
/// Undecodable records met on the way are deleted inside the same
/// transaction.
fn scan_in(
    conn: &Connection,
    lane: Lane,
    mut accept: impl FnMut(&Job) -> bool,
) -> Result<Option<Job>> {
    let bucket = Bucket::new(conn, lane_bucket(lane));
    let mut unreadable = Vec::new();
    let found = bucket.find_map(|key, value| match decode(key, value) {
        Ok(job) => Ok(accept(&job).then_some(job)),
        Err(Error::Corrupt(reason)) => {
            unreadable.push((key.to_vec(), reason));
            Ok(None)
        }
        Err(e) => Err(e),
    })?;
    drop_unreadable(&bucket, unreadable)?;
    Ok(found)
}

fn drop_unreadable(bucket: &Bucket<'_>, unreadable: Vec<(Vec<u8>, String)>) -> Result<()> {
    for (key, reason) in unreadable {
        bucket.delete(&key)?;
        error!(
            bucket = bucket.path(),
            key = %hex::encode(&key),
            "Dropped unreadable job record: {}",
            reason
        );
    }
    Ok(())
}

/// Append `job` to the bucket of `lane` inside an open transaction
fn push_in(conn: &Connection, lane: Lane, job: &mut Job) -> Result<JobId> {
    let bucket = Bucket::new(conn, lane_bucket(lane));
    let id = JobId::new(bucket.next_sequence()?);
    job.claimed = false;
    job.set_id(id);
    bucket.put(&id.to_key(), &job.serialize())?;
    Ok(id)
}

impl JobStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Queue a job on the sequential lane
    pub fn push_sequential_job(&self, job: &mut Job) -> Result<JobId> {
        let id = self
            .store
            .update(|tx| push_in(tx, Lane::Sequential, job))?;
        debug!("Queued sequential job {}", job);
        Ok(id)
    }

    /// Queue a job on the background lane
    pub fn push_async_job(&self, job: &mut Job) -> Result<JobId> {
        let id = self
            .store
            .update(|tx| push_in(tx, Lane::Background, job))?;
        debug!("Queued background job {}", job);
        Ok(id)
    }

    /// Queue a job on the lane its kind selects
    pub fn push_job(&self, job: &mut Job) -> Result<JobId> {
        match job.lane() {
            Lane::Sequential => self.push_sequential_job(job),
            Lane::Background => self.push_async_job(job),
        }
    }

    /// Queue a job unless identical work is still waiting to start
    ///
    /// Claimed background jobs and the head of the sequential queue may
    /// already be running, so they never absorb a new job. Returns `None`
    /// when an existing job absorbed this one.
    pub fn push_coalesced(&self, job: &mut Job) -> Result<Option<JobId>> {
        let lane = job.lane();
        let pushed = self.store.update(|tx| {
            let mut head = lane == Lane::Sequential;
            let existing = scan_in(tx, lane, |queued| {
                if std::mem::take(&mut head) {
                    return false;
                }
                !queued.claimed && queued.same_work(&*job)
            })?;
            if existing.is_some() {
                return Ok(None);
            }
            push_in(tx, lane, job).map(Some)
        })?;

        match pushed {
            Some(_) => debug!("Queued {} job {}", lane, job),
            None => debug!("Coalesced {} with a queued job", job),
        }
        Ok(pushed)
    }

    /// Claim the oldest unclaimed background job
    ///
    /// The claim is persisted before the job is returned, so no two callers
    /// can ever receive the same job.
    pub fn claim_async_job(&self) -> Result<Option<Job>> {
        self.store.update(|tx| {
            let Some(mut job) = scan_in(tx, Lane::Background, |job| !job.claimed)? else {
                return Ok(None);
            };
            job.claimed = true;
            Bucket::new(tx, lane_bucket(Lane::Background))
                .put(&stored_id(&job)?.to_key(), &job.serialize())?;
            Ok(Some(job))
        })
    }

    /// Head of the sequential queue
    ///
    /// The single sequential worker owns the whole queue, so the head is
    /// returned as is and stays queued until retired.
    pub fn claim_sequential_job(&self) -> Result<Option<Job>> {
        self.store
            .update(|tx| scan_in(tx, Lane::Sequential, |_| true))
    }

    /// Delete a finished background job; a missing record is not an error
    pub fn retire_async_job(&self, job: &Job) -> Result<()> {
        self.retire(Lane::Background, job)
    }

    /// Delete a finished sequential job; a missing record is not an error
    pub fn retire_sequential_job(&self, job: &Job) -> Result<()> {
        self.retire(Lane::Sequential, job)
    }

    fn retire(&self, lane: Lane, job: &Job) -> Result<()> {
        check_lane(lane, job)?;
        let id = stored_id(job)?;
        let removed = self
            .store
            .update(|tx| Bucket::new(tx, lane_bucket(lane)).delete(&id.to_key()))?;
        if !removed {
            debug!("{} job {} was already retired", lane, id);
        }
        Ok(())
    }

    /// Move a failed background job to the failed bucket
    pub fn bury_async_job(&self, job: &Job, error: &str) -> Result<()> {
        self.bury(Lane::Background, job, error)
    }

    /// Move a failed sequential job to the failed bucket
    pub fn bury_sequential_job(&self, job: &Job, error: &str) -> Result<()> {
        self.bury(Lane::Sequential, job, error)
    }

    fn bury(&self, lane: Lane, job: &Job, error: &str) -> Result<()> {
        check_lane(lane, job)?;
        let id = stored_id(job)?;
        let record = FailedJob {
            queue_id: id,
            kind: job.kind,
            params: job.params.clone(),
            lane,
            error: error.to_string(),
            failed_at: Utc::now(),
        };
        let encoded = serde_json::to_vec(&record)?;

        self.store.update(|tx| {
            Bucket::new(tx, lane_bucket(lane)).delete(&id.to_key())?;
            let failed = Bucket::new(tx, failed_bucket());
            let seq = failed.next_sequence()?;
            failed.put(&seq.to_be_bytes(), &encoded)
        })?;

        warn!(kind = %job.kind, id = %id, "Moved failed job to {}", failed_bucket());
        Ok(())
    }

    /// Release every background claim left behind by a previous process
    ///
    /// Must only run while no worker is active. Returns the number of jobs
    /// made claimable again.
    pub fn recover_claimed(&self) -> Result<usize> {
        let recovered = self.store.update(|tx| {
            let bucket = Bucket::new(tx, lane_bucket(Lane::Background));
            let mut count = 0;
            let mut unreadable = Vec::new();
            for (key, value) in bucket.entries()? {
                let mut job = match decode(&key, &value) {
                    Ok(job) => job,
                    Err(Error::Corrupt(reason)) => {
                        unreadable.push((key, reason));
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if job.claimed {
                    job.claimed = false;
                    bucket.put(&key, &job.serialize())?;
                    count += 1;
                }
            }
            drop_unreadable(&bucket, unreadable)?;
            Ok(count)
        })?;

        if recovered > 0 {
            info!("Recovered {} interrupted background jobs", recovered);
        }
        Ok(recovered)
    }

    /// Everything still queued, oldest first
    ///
    /// Unreadable records are left out; the next claim on their lane
    /// removes them.
    pub fn pending_jobs(&self) -> Result<PendingJobs> {
        self.store.view(|tx| {
            let list = |lane| -> Result<Vec<Job>> {
                Ok(Bucket::new(tx, lane_bucket(lane))
                    .entries()?
                    .iter()
                    .filter_map(|(key, value)| decode(key, value).ok())
                    .collect())
            };
            Ok(PendingJobs {
                sequential: list(Lane::Sequential)?,
                background: list(Lane::Background)?,
            })
        })
    }

    /// Failed jobs, oldest first
    pub fn failed_jobs(&self) -> Result<Vec<FailedJob>> {
        self.store.view(|tx| {
            Bucket::new(tx, failed_bucket())
                .entries()?
                .iter()
                .map(|(_, value)| serde_json::from_slice::<FailedJob>(value).map_err(Error::from))
                .collect()
        })
    }

    /// Forget all failed jobs; returns how many were removed
    pub fn clear_failed(&self) -> Result<usize> {
        self.store
            .update(|tx| Bucket::new(tx, failed_bucket()).clear())
    }
}

/// Ids are only unique per bucket; never touch another lane's record
fn check_lane(lane: Lane, job: &Job) -> Result<()> {
    if job.lane() != lane {
        return Err(Error::invalid_params(format!(
            "{} belongs to the {} queue, not the {} queue",
            job,
            job.lane(),
            lane
        )));
    }
    Ok(())
}
