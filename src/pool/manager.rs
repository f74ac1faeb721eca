//! Pool manager: submission, drain handshake and cooperative stop

use crate::core::{BoxedJob, ClosureJob, Job, PoolError, Result, StopFlag};
use crate::pool::config::PoolConfig;
use crate::pool::worker::{Worker, WorkerContext, WorkerStatSnapshot, WorkerState, WorkerThread};
use crate::queue::{WorkChannel, WorkItem};
use crate::shutdown::fault::{FaultSink, PanicHookSink};
use crate::shutdown::signal::{SignalRegistry, StopSignal};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// How long `Drop` waits for each worker of a pool that was never drained
const DROP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What triggered a stop
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// `stop()` was called directly
    Requested,
    /// A bound OS signal was delivered
    Signal(StopSignal),
    /// An uncaught fault was escalated
    Fault,
}

/// Diagnostics recorded by the call that performed the stop transition
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StopReport {
    /// When the stop happened
    pub requested_at: DateTime<Utc>,
    /// What triggered it
    pub reason: StopReason,
    /// Items still queued at that moment
    pub outstanding_jobs: usize,
    /// Running workers that received a stop request
    pub workers_signalled: usize,
}

/// Outcome of [`PoolManager::drain`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Sentinels pushed onto the channel by this drain
    pub sentinels_pushed: usize,
    /// Workers whose threads finished and were joined
    pub stopped: Vec<usize>,
    /// Workers still running when their timeout elapsed
    pub timed_out: Vec<usize>,
}

impl DrainReport {
    /// Returns `true` if every worker stopped in time
    pub fn is_complete(&self) -> bool {
        self.timed_out.is_empty()
    }
}

/// Point-in-time view of the whole pool
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PoolStats {
    /// Number of workers
    pub worker_count: usize,
    /// Channel capacity
    pub capacity: usize,
    /// Items currently queued
    pub queued: usize,
    /// Jobs accepted onto the channel
    pub jobs_submitted: u64,
    /// Jobs discarded because a stop had been requested
    pub jobs_dropped: u64,
    /// Sentinels pushed over the pool's lifetime
    pub sentinels_pushed: usize,
    /// Whether the stop flag is set
    pub stopped: bool,
    /// Per-worker snapshots
    pub workers: Vec<WorkerStatSnapshot>,
}

/// State shared between the manager, stop handles and worker threads
struct PoolShared {
    name: String,
    channel: WorkChannel,
    stop_flag: Arc<StopFlag>,
    workers: Vec<Arc<Worker>>,
    poll_interval: Duration,
    stop_report: Mutex<Option<StopReport>>,
    jobs_submitted: AtomicU64,
    jobs_dropped: AtomicU64,
    sentinels_pushed: AtomicUsize,
}

impl PoolShared {
    fn stop(&self, reason: StopReason) -> bool {
        // Held across the transition so the flag is never visible without its report
        let mut stop_report = self.stop_report.lock();
        if !self.stop_flag.trigger() {
            return false;
        }

        let outstanding_jobs = self.channel.len();
        info!(
            "Stopping '{}' with {} jobs outstanding ({:?})",
            self.name, outstanding_jobs, reason
        );

        let mut workers_signalled = 0;
        for worker in self.workers.iter().filter(|w| w.is_alive()) {
            debug!("Requesting stop of {}", worker.name());
            if worker.request_stop() {
                workers_signalled += 1;
            }
        }

        *stop_report = Some(StopReport {
            requested_at: Utc::now(),
            reason,
            outstanding_jobs,
            workers_signalled,
        });
        true
    }

    /// Enqueue `item`, blocking for space but giving up once a stop is requested.
    fn put_unless_stopped(&self, item: WorkItem) -> bool {
        self.put_until(item, || false)
    }

    /// Like [`put_unless_stopped`](Self::put_unless_stopped), but also gives
    /// up as soon as `abandon` returns `true`.
    fn put_until(&self, item: WorkItem, abandon: impl Fn() -> bool) -> bool {
        let mut item = item;
        loop {
            if self.stop_flag.is_set() || abandon() {
                return false;
            }
            match self.channel.put_timeout(item, self.poll_interval) {
                Ok(()) => return true,
                Err(returned) => item = returned,
            }
        }
    }
}

/// A cloneable handle to a pool's stop operation.
///
/// Handles do not keep the pool alive; once it is dropped, stopping through a
/// handle does nothing.
#[derive(Clone)]
pub struct StopHandle {
    shared: Weak<PoolShared>,
}

impl StopHandle {
    /// Stop the pool as if [`PoolManager::stop`] had been called.
    pub fn stop(&self) -> bool {
        self.stop_with(StopReason::Requested)
    }

    /// Stop the pool, recording `reason`. Returns `true` only for the call
    /// that performed the transition.
    pub fn stop_with(&self, reason: StopReason) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.stop(reason),
            None => false,
        }
    }

    /// Returns `true` once the pool behind this handle has been dropped
    pub fn is_detached(&self) -> bool {
        self.shared.strong_count() == 0
    }

    /// Returns `true` if the pool is stopped or gone
    pub fn is_stopped(&self) -> bool {
        self.shared
            .upgrade()
            .map_or(true, |shared| shared.stop_flag.is_set())
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pool = self.shared.upgrade().map(|shared| shared.name.clone());
        f.debug_struct("StopHandle").field("pool", &pool).finish()
    }
}

/// Builder that injects the process-level collaborators into a pool
///
/// # Example
///
/// ```rust
/// use rust_worker_pool::prelude::*;
/// use std::sync::Arc;
///
/// # fn main() -> Result<()> {
/// let signals = Arc::new(ManualSignalRegistry::new());
/// let faults = Arc::new(CapturingFaultSink::new());
///
/// let pool = PoolManager::builder(PoolConfig::new(2))
///     .signal_registry(signals.clone())
///     .fault_sink(faults.clone())
///     .build()?;
///
/// assert!(signals.is_bound(StopSignal::Terminate));
/// assert!(faults.is_installed());
/// # drop(pool);
/// # Ok(())
/// # }
/// ```
pub struct PoolManagerBuilder {
    config: PoolConfig,
    signal_registry: Option<Arc<dyn SignalRegistry>>,
    fault_sink: Option<Arc<dyn FaultSink>>,
}

impl PoolManagerBuilder {
    /// Bind the configured stop signals through `registry`
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn signal_registry(mut self, registry: Arc<dyn SignalRegistry>) -> Self {
        self.signal_registry = Some(registry);
        self
    }

    /// Escalate faults through `sink` instead of the process-wide panic hook
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn fault_sink(mut self, sink: Arc<dyn FaultSink>) -> Self {
        self.fault_sink = Some(sink);
        self
    }

    /// Validate the configuration, create the channel and workers, and wire up
    /// signals and fault escalation. Workers are not spawned until
    /// [`PoolManager::start`].
    pub fn build(self) -> Result<PoolManager> {
        let config = self.config;
        config.validate()?;

        let workers = (0..config.worker_count)
            .map(|id| {
                Arc::new(Worker::new(
                    id,
                    format!("{}-{}", config.thread_name_prefix, id),
                ))
            })
            .collect();

        let shared = Arc::new(PoolShared {
            name: config.thread_name_prefix.clone(),
            channel: WorkChannel::new(config.capacity()),
            stop_flag: Arc::new(StopFlag::new()),
            workers,
            poll_interval: config.poll_interval,
            stop_report: Mutex::new(None),
            jobs_submitted: AtomicU64::new(0),
            jobs_dropped: AtomicU64::new(0),
            sentinels_pushed: AtomicUsize::new(0),
        });
        let stop = StopHandle {
            shared: Arc::downgrade(&shared),
        };

        match &self.signal_registry {
            Some(registry) => registry.register(&config.stop_signals, stop.clone())?,
            None => debug!(
                "No signal registry; {} stop signals left unbound",
                config.stop_signals.len()
            ),
        }

        let fault_sink = if config.enable_fault_escalation {
            let sink: Arc<dyn FaultSink> = match self.fault_sink {
                Some(sink) => sink,
                None => Arc::new(PanicHookSink::new()),
            };
            sink.install(stop);
            Some(sink)
        } else {
            None
        };

        Ok(PoolManager {
            config,
            shared,
            threads: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            fault_sink,
        })
    }
}

/// A fixed set of workers consuming a bounded channel.
///
/// # Lifecycle
///
/// 1. [`start`](Self::start) spawns one thread per worker.
/// 2. [`submit`](Self::submit) enqueues jobs, blocking while the channel is full.
/// 3. [`drain`](Self::drain) announces that no more work is coming and waits
///    for the workers to finish.
///
/// [`stop`](Self::stop) may be called at any point, from any thread, any number
/// of times; only the first call has an effect. Bound OS signals and escalated
/// faults call it too.
///
/// # Example
///
/// ```rust
/// use rust_worker_pool::prelude::*;
/// use std::time::Duration;
///
/// # fn main() -> Result<()> {
/// let config = PoolConfig::new(3).with_fault_escalation(false);
/// let pool = PoolManager::with_config(config)?;
/// pool.start()?;
///
/// for i in 0..20 {
///     pool.execute(move || {
///         let _ = i * 2;
///         Ok(())
///     });
/// }
///
/// let report = pool.drain(Duration::from_secs(5))?;
/// assert!(report.is_complete());
/// assert_eq!(pool.total_jobs_processed(), 20);
/// # Ok(())
/// # }
/// ```
pub struct PoolManager {
    config: PoolConfig,
    shared: Arc<PoolShared>,
    threads: Mutex<Vec<WorkerThread>>,
    started: AtomicBool,
    fault_sink: Option<Arc<dyn FaultSink>>,
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("config", &self.config)
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("stopped", &self.is_stopped())
            .field("channel", &self.shared.channel)
            .finish()
    }
}

impl PoolManager {
    /// Start building a pool with injected signal registry and fault sink
    pub fn builder(config: PoolConfig) -> PoolManagerBuilder {
        PoolManagerBuilder {
            config,
            signal_registry: None,
            fault_sink: None,
        }
    }

    /// Create a pool with no signal registry. If fault escalation is enabled,
    /// the pool is armed with the process-wide [`PanicHookSink`]; the hook
    /// itself is installed once and drops its route when the pool is dropped.
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Spawn one thread per worker.
    ///
    /// # Errors
    ///
    /// - `PoolError::AlreadyStarted` on a second call
    /// - `PoolError::SpawnError` if a thread cannot be created; workers spawned
    ///   before the failure are asked to stop
    pub fn start(&self) -> Result<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PoolError::already_started(&self.shared.name));
        }

        let context = WorkerContext {
            channel: self.shared.channel.clone(),
            stop_flag: Arc::clone(&self.shared.stop_flag),
            poll_interval: self.config.poll_interval,
            faults: self.fault_sink.clone(),
        };

        let mut threads = self.threads.lock();
        for worker in &self.shared.workers {
            match worker.spawn(context.clone()) {
                Ok(thread) => threads.push(thread),
                Err(e) => {
                    self.shared.stop(StopReason::Requested);
                    return Err(e);
                }
            }
        }
        debug!(
            "Started {} workers for '{}'",
            threads.len(),
            self.shared.name
        );
        Ok(())
    }

    /// Submit a job.
    ///
    /// Blocks while the channel is full. Once a stop has been requested the job
    /// is dropped without notice, including a job whose submission was
    /// blocked when the stop arrived; callers needing delivery confirmation
    /// must track it themselves.
    pub fn submit<J: Job + 'static>(&self, job: J) {
        self.submit_boxed(Box::new(job));
    }

    /// Submit an already boxed job
    pub fn submit_boxed(&self, job: BoxedJob) {
        if self.shared.stop_flag.is_set() {
            debug!("Dropping {:?}: stop requested", job);
            self.shared.jobs_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        debug!("Submitting {:?}", job);
        if self.shared.put_unless_stopped(WorkItem::Job(job)) {
            self.shared.jobs_submitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.shared.jobs_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Submit a closure as a job
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.submit(ClosureJob::new(f))
    }

    /// Announce that all work has been submitted and wait for the workers.
    ///
    /// Pushes one sentinel per worker, then waits up to `per_worker_timeout`
    /// for each worker thread in turn. A worker that does not finish in time
    /// is reported in [`DrainReport::timed_out`] and left running.
    ///
    /// If a stop has already been requested no sentinels are pushed; the
    /// workers leave on the stop flag instead. Workers whose threads already
    /// ended (a job panicked) are owed no sentinel, and pushing stops once
    /// no worker thread is left to consume one.
    ///
    /// # Errors
    ///
    /// `PoolError::NotStarted` if called before [`start`](Self::start).
    pub fn drain(&self, per_worker_timeout: Duration) -> Result<DrainReport> {
        if !self.started.load(Ordering::Acquire) {
            return Err(PoolError::not_started(&self.shared.name));
        }

        let mut threads = self.threads.lock();
        let mut report = DrainReport::default();

        // At most one sentinel per worker over the pool's lifetime
        let live = threads.iter().filter(|t| !t.is_finished()).count();
        let owed = threads
            .len()
            .saturating_sub(self.shared.sentinels_pushed.load(Ordering::Acquire))
            .min(live);
        let all_finished = || threads.iter().all(|t| t.is_finished());
        for _ in 0..owed {
            if !self.shared.put_until(WorkItem::Sentinel, all_finished) {
                debug!("Stop requested or no workers left; skipping remaining sentinels");
                break;
            }
            report.sentinels_pushed += 1;
        }
        self.shared
            .sentinels_pushed
            .fetch_add(report.sentinels_pushed, Ordering::AcqRel);
        debug!(
            "All jobs submitted ({} outstanding)",
            self.shared.channel.len()
        );

        for thread in threads.iter_mut() {
            if thread.wait(per_worker_timeout) {
                report.stopped.push(thread.id());
            } else {
                warn!(
                    "Worker {} did not stop within {:?}",
                    thread.id(),
                    per_worker_timeout
                );
                report.timed_out.push(thread.id());
            }
        }

        Ok(report)
    }

    /// Request a cooperative stop.
    ///
    /// Sets the stop flag, records the queue depth, and asks every running
    /// worker to leave its loop at the next iteration boundary. In-flight jobs
    /// run to completion; queued jobs are never executed. Returns `true` only
    /// for the call that performed the transition; later calls are no-ops.
    pub fn stop(&self) -> bool {
        self.shared.stop(StopReason::Requested)
    }

    /// A handle that can stop this pool from elsewhere
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Check if a stop has been requested
    pub fn is_stopped(&self) -> bool {
        self.shared.stop_flag.is_set()
    }

    /// Diagnostics from the stop transition, if one happened
    pub fn stop_report(&self) -> Option<StopReport> {
        self.shared.stop_report.lock().clone()
    }

    /// Get the number of workers
    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    /// Capacity of the work channel
    pub fn capacity(&self) -> usize {
        self.shared.channel.capacity()
    }

    /// Items currently queued (approximate under concurrency)
    pub fn queue_len(&self) -> usize {
        self.shared.channel.len()
    }

    /// State of every worker, by worker ID
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.shared.workers.iter().map(|w| w.state()).collect()
    }

    /// The workers, by worker ID
    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.shared.workers
    }

    /// Total sentinels pushed over the pool's lifetime
    pub fn sentinels_pushed(&self) -> usize {
        self.shared.sentinels_pushed.load(Ordering::Relaxed)
    }

    /// Get total number of jobs accepted onto the channel
    pub fn total_jobs_submitted(&self) -> u64 {
        self.shared.jobs_submitted.load(Ordering::Relaxed)
    }

    /// Get total number of jobs dropped because of a stop
    pub fn total_jobs_dropped(&self) -> u64 {
        self.shared.jobs_dropped.load(Ordering::Relaxed)
    }

    /// Get total jobs processed across all workers
    pub fn total_jobs_processed(&self) -> u64 {
        self.shared
            .workers
            .iter()
            .map(|w| w.stats().get_jobs_processed())
            .sum()
    }

    /// Get total jobs cancelled across all workers
    pub fn total_jobs_cancelled(&self) -> u64 {
        self.shared
            .workers
            .iter()
            .map(|w| w.stats().get_jobs_cancelled())
            .sum()
    }

    /// Snapshot of pool and worker counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            worker_count: self.worker_count(),
            capacity: self.capacity(),
            queued: self.queue_len(),
            jobs_submitted: self.total_jobs_submitted(),
            jobs_dropped: self.total_jobs_dropped(),
            sentinels_pushed: self.sentinels_pushed(),
            stopped: self.is_stopped(),
            workers: self.shared.workers.iter().map(|w| w.snapshot()).collect(),
        }
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        let threads = self.threads.get_mut();
        if threads.iter().all(|t| t.is_reaped()) {
            return;
        }

        // Never drained: stop instead of waiting for work that may not come.
        self.shared.stop(StopReason::Requested);
        for thread in threads.iter_mut() {
            if !thread.wait(DROP_JOIN_TIMEOUT) {
                warn!(
                    "Worker {} did not finish within {:?} during drop; detaching it",
                    thread.id(),
                    DROP_JOIN_TIMEOUT
                );
            }
        }
    }
}
