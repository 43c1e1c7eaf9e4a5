// src/jobs/processor.rs

//! Job processor
//!
//! One sequential worker and N background workers share a [`Manager`] and a
//! [`JobStore`]. Work reaches them two ways:
//!
//! - [`Processor::push_job`] hands a job to a waiting worker over a zero
//!   capacity channel, blocking the caller until a worker takes it
//! - durable jobs in the store are claimed by the workers in id order
//!   whenever they are woken or their poll interval elapses
//!
//! Handlers queue follow-ups through a [`JobSink`] that persists the job
//! and wakes the target lane without blocking, so a handler can never wait
//! on its own lane.
//!
//! A failing (or panicking) handler only fails its job. Durable jobs that
//! fail are buried in the failed bucket; nothing is retried automatically.

use super::handlers::{JobSink, handler_for};
use super::store::JobStore;
use super::{Job, JobId, Lane};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::manager::Manager;
use flume::{Receiver, Selector, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// State shared by every worker
struct Shared {
    manager: Arc<Manager>,
    jobs: JobStore,
    sink: Dispatch,
    quit: AtomicBool,
    poll_interval: Duration,
}

/// Persists follow-up jobs and nudges the lane that will run them
struct Dispatch {
    jobs: JobStore,
    sequential_wake: Sender<()>,
    background_wake: Sender<()>,
}

impl Dispatch {
    fn wake(&self, lane: Lane) {
        let wake = match lane {
            Lane::Sequential => &self.sequential_wake,
            Lane::Background => &self.background_wake,
        };
        // a full channel already holds a pending wake-up
        let _ = wake.try_send(());
    }
}

impl JobSink for Dispatch {
    fn push_job(&self, mut job: Job) -> Result<()> {
        self.jobs.push_job(&mut job)?;
        self.wake(job.lane());
        Ok(())
    }

    fn push_job_coalesced(&self, mut job: Job) -> Result<()> {
        if self.jobs.push_coalesced(&mut job)?.is_some() {
            self.wake(job.lane());
        }
        Ok(())
    }
}

/// Receiving ends, held until the workers start
struct Receivers {
    sequential: Receiver<Job>,
    background: Receiver<Job>,
    quit: Receiver<()>,
    sequential_wake: Receiver<()>,
    background_wake: Receiver<()>,
}

struct Inner {
    closed: bool,
    started: bool,
    sequential_tx: Option<Sender<Job>>,
    background_tx: Option<Sender<Job>>,
    quit_tx: Sender<()>,
    receivers: Option<Receivers>,
    handles: Vec<JoinHandle<()>>,
}

/// The job scheduler
pub struct Processor {
    inner: Mutex<Inner>,
    shared: Arc<Shared>,
    njobs: usize,
}

enum Event {
    Job(Job),
    Wake,
    Quit,
}

impl Processor {
    /// Create a processor; no worker runs until [`Processor::begin`]
    pub fn new(config: &Config, manager: Arc<Manager>, jobs: JobStore) -> Self {
        let njobs = config.effective_jobs();

        let (sequential_tx, sequential_rx) = flume::bounded(0);
        let (background_tx, background_rx) = flume::bounded(0);
        let (quit_tx, quit_rx) = flume::bounded(njobs + 1);
        let (sequential_wake_tx, sequential_wake_rx) = flume::bounded(1);
        let (background_wake_tx, background_wake_rx) = flume::bounded(njobs);

        let shared = Arc::new(Shared {
            manager,
            sink: Dispatch {
                jobs: jobs.clone(),
                sequential_wake: sequential_wake_tx,
                background_wake: background_wake_tx,
            },
            jobs,
            quit: AtomicBool::new(false),
            poll_interval: config.poll_interval(),
        });

        Self {
            inner: Mutex::new(Inner {
                closed: false,
                started: false,
                sequential_tx: Some(sequential_tx),
                background_tx: Some(background_tx),
                quit_tx,
                receivers: Some(Receivers {
                    sequential: sequential_rx,
                    background: background_rx,
                    quit: quit_rx,
                    sequential_wake: sequential_wake_rx,
                    background_wake: background_wake_rx,
                }),
                handles: Vec::new(),
            }),
            shared,
            njobs,
        }
    }

    /// Number of background workers
    pub fn background_workers(&self) -> usize {
        self.njobs
    }

    /// Start the sequential worker and the background workers
    ///
    /// Does nothing when already started or closed.
    pub fn begin(&self) {
        let mut inner = self.inner.lock();
        if inner.closed || inner.started {
            return;
        }
        let Some(rx) = inner.receivers.take() else {
            return;
        };
        inner.started = true;

        let mut handles = Vec::with_capacity(self.njobs + 1);
        handles.push(self.spawn_worker(
            Lane::Sequential,
            0,
            rx.sequential.clone(),
            rx.quit.clone(),
            rx.sequential_wake.clone(),
        ));
        for id in 0..self.njobs {
            handles.push(self.spawn_worker(
                Lane::Background,
                id,
                rx.background.clone(),
                rx.quit.clone(),
                rx.background_wake.clone(),
            ));
        }
        inner.handles = handles;

        info!(
            "Job processor started with {} background workers",
            self.njobs
        );
    }

    fn spawn_worker(
        &self,
        lane: Lane,
        id: usize,
        jobs: Receiver<Job>,
        quit: Receiver<()>,
        wake: Receiver<()>,
    ) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        thread::spawn(move || {
            let worker = Worker {
                lane,
                id,
                shared,
                jobs,
                quit,
                wake,
            };
            worker.run();
        })
    }

    /// Hand a job to a worker of its lane
    ///
    /// Blocks until a worker accepts the job. Jobs pushed this way are not
    /// persisted; use [`Processor::submit`] for durable work.
    pub fn push_job(&self, job: Job) -> Result<()> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(Error::ProcessorClosed);
        }
        if !inner.started {
            return Err(Error::ProcessorNotRunning);
        }

        let tx = match job.lane() {
            Lane::Sequential => inner.sequential_tx.as_ref(),
            Lane::Background => inner.background_tx.as_ref(),
        }
        .ok_or(Error::ProcessorClosed)?;

        // the lock is held across the hand-off so close() cannot race it
        tx.send(job).map_err(|_| Error::ProcessorClosed)
    }

    /// Persist a job and wake its lane
    pub fn submit(&self, mut job: Job) -> Result<JobId> {
        if self.inner.lock().closed {
            return Err(Error::ProcessorClosed);
        }
        let id = self.shared.jobs.push_job(&mut job)?;
        self.shared.sink.wake(job.lane());
        Ok(id)
    }

    /// Stop accepting work and wait for every worker to exit
    ///
    /// Jobs already running are allowed to finish; jobs still in the store
    /// stay there for the next start. Calling this again does nothing.
    pub fn close(&self) {
        let handles = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            self.shared.quit.store(true, Ordering::SeqCst);

            inner.sequential_tx = None;
            inner.background_tx = None;
            for _ in 0..=self.njobs {
                let _ = inner.quit_tx.try_send(());
            }
            std::mem::take(&mut inner.handles)
        };

        for handle in handles {
            if handle.join().is_err() {
                error!("Job worker exited abnormally");
            }
        }
        info!("Job processor stopped");
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        self.close();
    }
}

struct Worker {
    lane: Lane,
    id: usize,
    shared: Arc<Shared>,
    jobs: Receiver<Job>,
    quit: Receiver<()>,
    wake: Receiver<()>,
}

impl Worker {
    fn run(&self) {
        debug!(lane = %self.lane, worker = self.id, "Worker started");

        while !self.shared.quit.load(Ordering::SeqCst) {
            match self.run_stored() {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    error!(lane = %self.lane, error = %e, "Failed to access the job store");
                }
            }

            let event = Selector::new()
                .recv(&self.jobs, |r| r.map_or(Event::Quit, Event::Job))
                .recv(&self.quit, |_| Event::Quit)
                .recv(&self.wake, |r| r.map_or(Event::Quit, |_| Event::Wake))
                .wait_timeout(self.shared.poll_interval);

            match event {
                Ok(Event::Job(job)) => {
                    if let Err(e) = self.execute(&job) {
                        error!(kind = %job.kind, error = %e, "Job failed with error");
                    }
                }
                Ok(Event::Quit) => break,
                Ok(Event::Wake) | Err(_) => {}
            }
        }

        debug!(lane = %self.lane, worker = self.id, "Worker exited");
    }

    /// Claim and run one durable job; returns whether there was one
    fn run_stored(&self) -> Result<bool> {
        let jobs = &self.shared.jobs;
        let claimed = match self.lane {
            Lane::Sequential => jobs.claim_sequential_job()?,
            Lane::Background => jobs.claim_async_job()?,
        };
        let Some(job) = claimed else {
            return Ok(false);
        };

        match self.execute(&job) {
            Ok(()) => match self.lane {
                Lane::Sequential => jobs.retire_sequential_job(&job)?,
                Lane::Background => jobs.retire_async_job(&job)?,
            },
            Err(e) => {
                error!(kind = %job.kind, error = %e, "Job failed with error");
                match self.lane {
                    Lane::Sequential => jobs.bury_sequential_job(&job, &e)?,
                    Lane::Background => jobs.bury_async_job(&job, &e)?,
                }
            }
        }
        Ok(true)
    }

    /// Run the handler for `job`, turning errors and panics into a message
    fn execute(&self, job: &Job) -> std::result::Result<(), String> {
        let handler = handler_for(job).map_err(|e| e.to_string())?;
        debug!(lane = %self.lane, worker = self.id, "{}", handler.describe());

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.execute(&self.shared.sink, &self.shared.manager)
        }));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => {
                warn!(kind = %job.kind, "Job handler panicked");
                Err(format!("handler panicked: {}", panic_message(payload.as_ref())))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::write_package;
    use crate::db::{Bucket, Store, bucket_path};
    use crate::jobs::store::{BUCKET_ASYNC_JOBS, BUCKET_ROOT_JOBS, BUCKET_SEQUENTIAL_JOBS};
    use crate::jobs::JobKind;
    use crate::jobs::handlers::{
        CreateRepoHandler, DeleteRepoHandler, DeltaPackageHandler, IncludePackagesHandler,
        IndexRepoHandler,
    };
    use crate::manager::{DeltaBuilder, LinkOrCopy, PoolEntry};
    use std::path::{Path, PathBuf};
    use std::time::Instant;
    use tempfile::TempDir;

    struct Harness {
        temp_dir: TempDir,
        store: Arc<Store>,
        manager: Arc<Manager>,
        jobs: JobStore,
        processor: Processor,
    }

    fn harness_with(builder: Option<Arc<dyn DeltaBuilder>>) -> Harness {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::with_base_dir(temp_dir.path().join("base"));
        config.jobs = 3;
        config.poll_interval_ms = 20;

        let store = Arc::new(Store::open_in_memory().unwrap());
        let manager = Arc::new(match builder {
            Some(builder) => {
                Manager::with_parts(&config, Arc::clone(&store), Arc::new(LinkOrCopy), builder)
            }
            None => Manager::new(&config, Arc::clone(&store)),
        });
        let jobs = JobStore::new(Arc::clone(&store));
        let processor = Processor::new(&config, Arc::clone(&manager), jobs.clone());
        Harness {
            temp_dir,
            store,
            manager,
            jobs,
            processor,
        }
    }

    fn harness() -> Harness {
        harness_with(None)
    }

    fn wait_until_drained(jobs: &JobStore) {
        let deadline = Instant::now() + Duration::from_secs(20);
        while !jobs.pending_jobs().unwrap().is_empty() {
            assert!(Instant::now() < deadline, "job queues never drained");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_push_requires_running_processor() {
        let h = harness();
        assert!(matches!(
            h.processor.push_job(IndexRepoHandler::job("unstable")),
            Err(Error::ProcessorNotRunning)
        ));

        h.processor.begin();
        h.processor.begin();
        h.processor.close();
        h.processor.close();

        assert!(matches!(
            h.processor.push_job(IndexRepoHandler::job("unstable")),
            Err(Error::ProcessorClosed)
        ));
        assert!(matches!(
            h.processor.submit(IndexRepoHandler::job("unstable")),
            Err(Error::ProcessorClosed)
        ));

        // begin after close stays closed
        h.processor.begin();
        assert!(h.processor.push_job(IndexRepoHandler::job("x")).is_err());
    }

    #[test]
    fn test_close_after_pushes() {
        let h = harness();
        h.manager.create_repo("unstable").unwrap();
        h.processor.begin();

        for i in 0..10 {
            h.processor
                .push_job(CreateRepoHandler::job(&format!("repo{}", i)))
                .unwrap();
            h.processor
                .push_job(DeltaPackageHandler::job("unstable", "nano"))
                .unwrap();
        }
        h.processor.close();

        // every pushed job reached a worker, and workers finish what they take
        assert_eq!(h.manager.repos().unwrap().len(), 11);
    }

    #[test]
    fn test_sequential_lane_keeps_push_order() {
        let h = harness();
        h.processor.begin();

        for i in 0..20 {
            let name = format!("repo{}", i);
            h.processor.push_job(CreateRepoHandler::job(&name)).unwrap();
            h.processor.push_job(DeleteRepoHandler::job(&name)).unwrap();
        }
        h.processor.push_job(CreateRepoHandler::job("last")).unwrap();
        h.processor.close();

        let names: Vec<_> = h.manager.repos().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["last"]);
    }

    #[test]
    fn test_runs_stored_jobs_in_order() {
        let h = harness();
        h.jobs
            .push_sequential_job(&mut CreateRepoHandler::job("unstable"))
            .unwrap();
        h.jobs
            .push_sequential_job(&mut IndexRepoHandler::job("unstable"))
            .unwrap();

        h.processor.begin();
        wait_until_drained(&h.jobs);
        h.processor.close();

        assert!(h.manager.repo_dir("unstable").join("index.json").exists());
        assert!(h.jobs.failed_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_failed_job_is_buried_and_lane_continues() {
        let h = harness();
        h.jobs
            .push_sequential_job(&mut IndexRepoHandler::job("ghost"))
            .unwrap();
        h.jobs
            .push_sequential_job(&mut Job::new(JobKind::CherryPick, vec!["a".to_string()]))
            .unwrap();
        h.jobs
            .push_sequential_job(&mut CreateRepoHandler::job("real"))
            .unwrap();

        h.processor.begin();
        wait_until_drained(&h.jobs);
        h.processor.close();

        let failed = h.jobs.failed_jobs().unwrap();
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].kind, JobKind::IndexRepo);
        assert!(failed[0].error.contains("ghost"));
        assert_eq!(failed[1].kind, JobKind::CherryPick);
        assert_eq!(h.manager.repos().unwrap()[0].name, "real");
    }

    #[test]
    fn test_unreadable_records_do_not_stall_lanes() {
        let h = harness();
        h.manager.create_repo("unstable").unwrap();
        h.store
            .update(|tx| {
                for name in [BUCKET_SEQUENTIAL_JOBS, BUCKET_ASYNC_JOBS] {
                    let bucket = Bucket::new(tx, bucket_path(&[BUCKET_ROOT_JOBS, name]));
                    let id = bucket.next_sequence()?;
                    bucket.put(&id.to_be_bytes(), &[0xff, 0x00])?;
                }
                Ok(())
            })
            .unwrap();
        h.jobs
            .push_sequential_job(&mut CreateRepoHandler::job("real"))
            .unwrap();
        h.jobs
            .push_async_job(&mut DeltaPackageHandler::job("unstable", "nano"))
            .unwrap();

        h.processor.begin();
        wait_until_drained(&h.jobs);
        h.processor.close();

        let names: Vec<_> = h.manager.repos().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["real", "unstable"]);
        assert!(h.jobs.failed_jobs().unwrap().is_empty());
        let left = h
            .store
            .view(|tx| {
                Bucket::new(tx, bucket_path(&[BUCKET_ROOT_JOBS, BUCKET_SEQUENTIAL_JOBS])).len()
            })
            .unwrap();
        assert_eq!(left, 0);
    }

    #[test]
    fn test_follow_ups_reach_both_lanes() {
        let h = harness();
        h.manager.create_repo("unstable").unwrap();
        let paths = vec![
            write_package(h.temp_dir.path(), "nano", "4.1", 94),
            write_package(h.temp_dir.path(), "nano", "4.2", 95),
        ];

        h.processor.begin();
        h.processor
            .submit(IncludePackagesHandler::job("unstable", paths))
            .unwrap();
        // let the include land before waiting on the follow-ups
        let deadline = Instant::now() + Duration::from_secs(20);
        while h.manager.repo_entries("unstable").unwrap().len() < 2 {
            assert!(Instant::now() < deadline, "include never ran");
            thread::sleep(Duration::from_millis(10));
        }
        wait_until_drained(&h.jobs);
        h.processor.close();

        assert!(h.manager.repo_dir("unstable").join("index.json").exists());
        assert!(h.jobs.failed_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_recovered_claims_run_again() {
        let h = harness();
        h.manager.create_repo("unstable").unwrap();
        h.jobs
            .push_async_job(&mut DeltaPackageHandler::job("unstable", "nano"))
            .unwrap();
        // a previous process died holding the claim
        h.jobs.claim_async_job().unwrap().unwrap();
        assert!(h.jobs.claim_async_job().unwrap().is_none());

        assert_eq!(h.jobs.recover_claimed().unwrap(), 1);
        h.processor.begin();
        wait_until_drained(&h.jobs);
        h.processor.close();
        assert!(h.jobs.failed_jobs().unwrap().is_empty());
    }

    struct PanickingDeltas;

    impl DeltaBuilder for PanickingDeltas {
        fn build(&self, _from: &PoolEntry, _to: &PoolEntry, _out: &Path) -> Result<Option<PathBuf>> {
            panic!("delta tool crashed");
        }
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let h = harness_with(Some(Arc::new(PanickingDeltas)));
        h.manager.create_repo("unstable").unwrap();
        for (version, release) in [("4.1", 94), ("4.2", 95)] {
            let path = write_package(h.temp_dir.path(), "nano", version, release);
            h.manager.include_package("unstable", &path).unwrap();
        }
        h.jobs
            .push_async_job(&mut DeltaPackageHandler::release_job("unstable", "nano", 94))
            .unwrap();
        h.jobs
            .push_sequential_job(&mut IndexRepoHandler::job("unstable"))
            .unwrap();

        h.processor.begin();
        wait_until_drained(&h.jobs);
        h.processor.close();

        let failed = h.jobs.failed_jobs().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].lane, Lane::Background);
        assert!(failed[0].error.contains("delta tool crashed"));
        assert!(h.manager.repo_dir("unstable").join("index.json").exists());
    }
}
