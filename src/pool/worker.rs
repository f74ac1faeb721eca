//! Worker thread implementation

use crate::core::{BoxedJob, PoolError, Result, StopFlag};
use crate::queue::{WorkChannel, WorkItem};
use crate::shutdown::fault::{Fault, FaultSink};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, TryRecvError};
use log::{debug, error, warn};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Lifecycle of a worker: `Idle -> Running -> Stopped`, never backwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum WorkerState {
    /// Constructed, thread not yet running
    Idle = 0,
    /// Inside its pull-execute loop
    Running = 1,
    /// Left the loop; the thread is finished or about to be
    Stopped = 2,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => WorkerState::Idle,
            1 => WorkerState::Running,
            _ => WorkerState::Stopped,
        }
    }
}

/// Statistics for a worker thread
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Total number of jobs that completed successfully
    pub jobs_processed: AtomicU64,
    /// Total number of jobs that returned an error
    pub jobs_failed: AtomicU64,
    /// Total number of jobs that panicked
    pub jobs_panicked: AtomicU64,
    /// Jobs dequeued after a stop and handed back via `on_cancelled`
    pub jobs_cancelled: AtomicU64,
    /// Stop requests delivered to this worker
    pub stop_requests: AtomicU64,
    /// Total time spent processing jobs (microseconds)
    pub total_processing_time_us: AtomicU64,
}

impl WorkerStats {
    /// Get total jobs processed
    pub fn get_jobs_processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::Relaxed)
    }

    /// Get total jobs failed
    pub fn get_jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    /// Get total jobs panicked
    pub fn get_jobs_panicked(&self) -> u64 {
        self.jobs_panicked.load(Ordering::Relaxed)
    }

    /// Get total jobs cancelled
    pub fn get_jobs_cancelled(&self) -> u64 {
        self.jobs_cancelled.load(Ordering::Relaxed)
    }

    /// Get the number of stop requests delivered
    pub fn get_stop_requests(&self) -> u64 {
        self.stop_requests.load(Ordering::Relaxed)
    }

    /// Get average processing time per job in microseconds
    pub fn get_average_processing_time_us(&self) -> f64 {
        let total = self.total_processing_time_us.load(Ordering::Relaxed);
        let count = self.get_jobs_processed() + self.get_jobs_failed();
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }
}

/// Point-in-time copy of one worker's state and counters
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorkerStatSnapshot {
    /// Worker ID
    pub id: usize,
    /// Lifecycle state at the time of the snapshot
    pub state: WorkerState,
    /// Jobs completed successfully
    pub jobs_processed: u64,
    /// Jobs that returned an error
    pub jobs_failed: u64,
    /// Jobs that panicked
    pub jobs_panicked: u64,
    /// Jobs dequeued after stop and not executed
    pub jobs_cancelled: u64,
    /// Stop requests delivered
    pub stop_requests: u64,
}

/// Everything a worker thread needs from its pool
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) channel: WorkChannel,
    pub(crate) stop_flag: Arc<StopFlag>,
    pub(crate) poll_interval: Duration,
    pub(crate) faults: Option<Arc<dyn FaultSink>>,
}

/// One member of the pool.
///
/// The state is written only by the worker's own thread. Other threads may
/// read it and may deliver an advisory stop request, which the loop observes
/// at its next iteration boundary; a job already executing is never interrupted.
#[derive(Debug)]
pub struct Worker {
    id: usize,
    name: String,
    state: AtomicU8,
    stop_requested: AtomicBool,
    stats: WorkerStats,
}

impl Worker {
    pub(crate) fn new(id: usize, name: String) -> Self {
        Self {
            id,
            name,
            state: AtomicU8::new(WorkerState::Idle as u8),
            stop_requested: AtomicBool::new(false),
            stats: WorkerStats::default(),
        }
    }

    /// Get worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Thread name of this worker
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` while the worker is inside its loop
    pub fn is_alive(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Get worker statistics
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Snapshot of state and counters
    pub fn snapshot(&self) -> WorkerStatSnapshot {
        WorkerStatSnapshot {
            id: self.id,
            state: self.state(),
            jobs_processed: self.stats.get_jobs_processed(),
            jobs_failed: self.stats.get_jobs_failed(),
            jobs_panicked: self.stats.get_jobs_panicked(),
            jobs_cancelled: self.stats.get_jobs_cancelled(),
            stop_requests: self.stats.get_stop_requests(),
        }
    }

    /// Ask a running worker to leave its loop at the next boundary.
    ///
    /// Returns `true` if this call delivered the request. Workers that are not
    /// running, or were already asked, are left untouched.
    pub fn request_stop(&self) -> bool {
        if !self.is_alive() {
            return false;
        }
        if self.stop_requested.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.stats.stop_requests.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn should_stop(&self, stop_flag: &StopFlag) -> bool {
        stop_flag.is_set() || self.stop_requested.load(Ordering::Acquire)
    }

    /// Spawn the worker's thread
    pub(crate) fn spawn(self: &Arc<Self>, context: WorkerContext) -> Result<WorkerThread> {
        let worker = Arc::clone(self);
        // Nothing is ever sent; the receiver disconnects once the thread is done.
        let (exit_tx, exit_rx) = channel::bounded::<()>(0);

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let _exit = exit_tx;
                worker.run(&context);
            })
            .map_err(|e| PoolError::spawn_with_source(self.id, "Cannot create thread", e))?;

        Ok(WorkerThread {
            id: self.id,
            handle: Some(handle),
            exited: exit_rx,
        })
    }

    /// Main worker loop
    fn run(&self, context: &WorkerContext) {
        let _state = StoppedOnExit(&self.state);
        self.state
            .store(WorkerState::Running as u8, Ordering::Release);
        debug!("{} started", self.name);

        loop {
            if self.should_stop(&context.stop_flag) {
                debug!("{} observed stop request", self.name);
                break;
            }

            let item = match context.channel.get_timeout(context.poll_interval) {
                Some(item) => item,
                None => continue,
            };

            match item {
                WorkItem::Sentinel => {
                    debug!("{} received sentinel", self.name);
                    break;
                }
                WorkItem::Job(job) if self.should_stop(&context.stop_flag) => {
                    self.cancel_job(job);
                    break;
                }
                WorkItem::Job(mut job) => {
                    if !self.execute_job(&mut job, context) {
                        break;
                    }
                }
            }
        }

        debug!(
            "{} exiting ({} processed, {} failed)",
            self.name,
            self.stats.get_jobs_processed(),
            self.stats.get_jobs_failed()
        );
    }

    fn cancel_job(&self, mut job: BoxedJob) {
        warn!(
            "{} dequeued {:?} after stop was requested; not executing it",
            self.name, job
        );
        job.on_cancelled();
        self.stats.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Execute a single job with panic protection.
    ///
    /// Returns `false` if the job panicked; a panic ends this worker's loop.
    fn execute_job(&self, job: &mut BoxedJob, context: &WorkerContext) -> bool {
        let start = Instant::now();
        let panic_result = catch_unwind(AssertUnwindSafe(|| job.execute()));
        let elapsed_us = start.elapsed().as_micros() as u64;
        self.stats
            .total_processing_time_us
            .fetch_add(elapsed_us, Ordering::Relaxed);

        match panic_result {
            Ok(Ok(())) => {
                self.stats.jobs_processed.fetch_add(1, Ordering::Relaxed);
                true
            }
            Ok(Err(e)) => {
                warn!("{}: {:?} failed: {}", self.name, job, e);
                self.stats.jobs_failed.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(payload) => {
                self.stats.jobs_panicked.fetch_add(1, Ordering::Relaxed);
                let fault = Fault::from_panic_payload(payload.as_ref());
                error!("{}: {:?} panicked: {}", self.name, job, fault.message);
                match &context.faults {
                    Some(sink) => sink.report(&fault),
                    None => error!("{} stopping after unhandled fault", self.name),
                }
                false
            }
        }
    }
}

struct StoppedOnExit<'a>(&'a AtomicU8);

impl Drop for StoppedOnExit<'_> {
    fn drop(&mut self) {
        self.0.store(WorkerState::Stopped as u8, Ordering::Release);
    }
}

/// Join handle of a spawned worker, waitable with a timeout
#[derive(Debug)]
pub(crate) struct WorkerThread {
    id: usize,
    handle: Option<thread::JoinHandle<()>>,
    exited: Receiver<()>,
}

impl WorkerThread {
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Returns `true` once the thread has been joined
    pub(crate) fn is_reaped(&self) -> bool {
        self.handle.is_none()
    }

    /// Returns `true` once the thread has left its loop, joined or not
    pub(crate) fn is_finished(&self) -> bool {
        self.is_reaped() || matches!(self.exited.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Wait up to `timeout` for the thread to finish, joining it if it did.
    pub(crate) fn wait(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };

        match self.exited.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                self.handle = Some(handle);
                false
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    error!("Worker {} panicked outside of job execution", self.id);
                }
                true
            }
        }
    }
}
