//! End-to-end scenarios for submission, drain and stop

use crossbeam::channel;
use rust_worker_pool::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn quiet_config(workers: usize) -> PoolConfig {
    PoolConfig::new(workers)
        .with_fault_escalation(false)
        .with_poll_interval(Duration::from_millis(10))
}

fn counters(n: usize) -> Arc<Vec<AtomicUsize>> {
    Arc::new((0..n).map(|_| AtomicUsize::new(0)).collect())
}

fn wait_until_running(pool: &PoolManager) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while pool.worker_states().iter().any(|s| *s != WorkerState::Running) {
        assert!(Instant::now() < deadline, "workers never started");
        thread::yield_now();
    }
}

/// Park every worker inside a job until the returned sender is dropped
fn occupy_workers(pool: &PoolManager) -> channel::Sender<()> {
    let (started_tx, started_rx) = channel::unbounded::<()>();
    let (release_tx, release_rx) = channel::unbounded::<()>();
    for _ in 0..pool.worker_count() {
        let started_tx = started_tx.clone();
        let release_rx = release_rx.clone();
        pool.execute(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
            Ok(())
        });
    }
    for _ in 0..pool.worker_count() {
        started_rx.recv().expect("gated job never started");
    }
    release_tx
}

#[test]
fn test_twenty_jobs_three_workers() {
    let pool = PoolManager::with_config(quiet_config(3)).expect("Failed to create pool");
    assert_eq!(pool.capacity(), 9);
    pool.start().expect("Failed to start pool");

    let runs = counters(20);
    for i in 0..20 {
        let runs = Arc::clone(&runs);
        pool.execute(move || {
            runs[i].fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2));
            Ok(())
        });
    }

    let report = pool
        .drain(Duration::from_secs(5))
        .expect("Failed to drain pool");

    assert!(report.is_complete());
    assert_eq!(report.sentinels_pushed, 3);
    assert_eq!(report.stopped, vec![0, 1, 2]);
    assert!(runs.iter().all(|r| r.load(Ordering::SeqCst) == 1));
    assert_eq!(pool.total_jobs_processed(), 20);
    assert!(pool
        .worker_states()
        .iter()
        .all(|s| *s == WorkerState::Stopped));
    assert!(!pool.is_stopped());
}

#[test]
fn test_producer_blocks_at_capacity() {
    let pool = Arc::new(PoolManager::with_config(quiet_config(1)).expect("Failed to create pool"));
    let (release_tx, release_rx) = channel::bounded::<()>(0);
    let submitted = Arc::new(AtomicUsize::new(0));

    pool.start().expect("Failed to start pool");
    wait_until_running(&pool);

    let producer = {
        let pool = Arc::clone(&pool);
        let submitted = Arc::clone(&submitted);
        thread::spawn(move || {
            for _ in 0..10 {
                let release_rx = release_rx.clone();
                pool.execute(move || {
                    let _ = release_rx.recv();
                    Ok(())
                });
                submitted.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    // One job in flight plus a full channel of three
    thread::sleep(Duration::from_millis(100));
    assert_eq!(submitted.load(Ordering::SeqCst), 4);
    assert_eq!(pool.queue_len(), 3);

    for _ in 0..10 {
        release_tx.send(()).expect("worker gone");
    }
    producer.join().expect("producer panicked");

    let report = pool.drain(Duration::from_secs(5)).expect("Failed to drain pool");
    assert!(report.is_complete());
    assert_eq!(pool.total_jobs_processed(), 10);
}

#[test]
fn test_stop_leaves_queued_jobs_unexecuted() {
    let pool = PoolManager::with_config(quiet_config(2)).expect("Failed to create pool");
    pool.start().expect("Failed to start pool");

    let (started_tx, started_rx) = channel::unbounded::<()>();
    let (release_tx, release_rx) = channel::unbounded::<()>();
    for _ in 0..2 {
        let started_tx = started_tx.clone();
        let release_rx = release_rx.clone();
        pool.execute(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
            Ok(())
        });
    }
    started_rx.recv().expect("first job never started");
    started_rx.recv().expect("second job never started");

    let queued_runs = counters(5);
    for i in 0..5 {
        let queued_runs = Arc::clone(&queued_runs);
        pool.execute(move || {
            queued_runs[i].fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    assert_eq!(pool.queue_len(), 5);

    assert!(pool.stop());
    let stop = pool.stop_report().expect("stop report missing");
    assert_eq!(stop.outstanding_jobs, 5);
    assert_eq!(stop.workers_signalled, 2);

    release_tx.send(()).unwrap();
    release_tx.send(()).unwrap();

    let report = pool.drain(Duration::from_secs(5)).expect("Failed to drain pool");
    assert_eq!(report.sentinels_pushed, 0);
    assert!(report.is_complete());
    assert!(pool
        .worker_states()
        .iter()
        .all(|s| *s == WorkerState::Stopped));

    assert!(queued_runs.iter().all(|r| r.load(Ordering::SeqCst) == 0));
    assert_eq!(pool.total_jobs_processed(), 2);
    assert_eq!(pool.queue_len(), 5);
}

#[test]
fn test_submit_after_stop_neither_blocks_nor_enqueues() {
    let pool = PoolManager::with_config(quiet_config(1)).expect("Failed to create pool");
    // Fill the channel with no consumer so any real enqueue would block
    for _ in 0..pool.capacity() {
        pool.execute(|| Ok(()));
    }
    pool.stop();

    let start = Instant::now();
    for _ in 0..100 {
        pool.execute(|| Ok(()));
    }
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(pool.queue_len(), 3);
    assert_eq!(pool.total_jobs_dropped(), 100);
}

#[test]
fn test_double_stop_delivers_one_request_per_worker() {
    let pool = PoolManager::with_config(quiet_config(3)).expect("Failed to create pool");
    pool.start().expect("Failed to start pool");
    let release = occupy_workers(&pool);

    assert!(pool.stop());
    assert!(!pool.stop());
    assert!(pool.is_stopped());
    drop(release);

    let requests: Vec<u64> = pool
        .workers()
        .iter()
        .map(|w| w.stats().get_stop_requests())
        .collect();
    assert_eq!(requests, vec![1, 1, 1]);

    let report = pool.drain(Duration::from_secs(5)).expect("Failed to drain pool");
    assert_eq!(report.stopped.len(), 3);
}

#[test]
fn test_signal_matches_direct_stop() {
    let signals = Arc::new(ManualSignalRegistry::new());
    let pool = PoolManager::builder(quiet_config(2))
        .signal_registry(signals.clone())
        .build()
        .expect("Failed to create pool");
    pool.start().expect("Failed to start pool");
    let release = occupy_workers(&pool);

    let deliverer = {
        let signals = Arc::clone(&signals);
        thread::spawn(move || signals.deliver(StopSignal::Terminate))
    };
    let direct = pool.stop();
    let delivered = deliverer.join().expect("deliverer panicked");
    drop(release);

    // Exactly one of the two performed the transition
    assert!(direct ^ delivered);
    assert!(pool.is_stopped());
    for worker in pool.workers() {
        assert_eq!(worker.stats().get_stop_requests(), 1);
    }

    let reason = pool.stop_report().expect("stop report missing").reason;
    if delivered {
        assert_eq!(reason, StopReason::Signal(StopSignal::Terminate));
    } else {
        assert_eq!(reason, StopReason::Requested);
    }

    let report = pool.drain(Duration::from_secs(5)).expect("Failed to drain pool");
    assert!(report.is_complete());
}

#[test]
fn test_each_default_signal_is_bound() {
    for signal in [
        StopSignal::Interrupt,
        StopSignal::Terminate,
        StopSignal::BrokenPipe,
    ] {
        let signals = Arc::new(ManualSignalRegistry::new());
        let pool = PoolManager::builder(quiet_config(1))
            .signal_registry(signals.clone())
            .build()
            .expect("Failed to create pool");

        assert!(signals.deliver(signal));
        assert!(pool.is_stopped());
        assert!(!signals.deliver(signal));
    }
}

#[test]
fn test_overlapping_signals_last_registration_wins() {
    let signals = Arc::new(ManualSignalRegistry::new());
    let first = PoolManager::builder(quiet_config(1))
        .signal_registry(signals.clone())
        .build()
        .expect("Failed to create pool");
    let second = PoolManager::builder(quiet_config(1).with_stop_signals([StopSignal::Interrupt]))
        .signal_registry(signals.clone())
        .build()
        .expect("Failed to create pool");

    assert!(signals.deliver(StopSignal::Interrupt));
    assert!(second.is_stopped());
    assert!(!first.is_stopped());

    // Signals only the first pool registered still reach it
    assert!(signals.deliver(StopSignal::Terminate));
    assert!(first.is_stopped());
}

#[test]
fn test_job_panic_escalates_to_stop() {
    let faults = Arc::new(CapturingFaultSink::new());
    let pool = PoolManager::builder(quiet_config(2).with_fault_escalation(true))
        .fault_sink(faults.clone())
        .build()
        .expect("Failed to create pool");
    pool.start().expect("Failed to start pool");

    let (release_tx, release_rx) = channel::bounded::<()>(0);
    let (started_tx, started_rx) = channel::bounded::<()>(1);
    pool.execute(move || {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
        Ok(())
    });
    started_rx.recv().expect("blocking job never started");

    let later_runs = counters(3);
    pool.execute(|| panic!("checksum mismatch"));
    for i in 0..3 {
        let later_runs = Arc::clone(&later_runs);
        pool.execute(move || {
            later_runs[i].fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while !pool.is_stopped() {
        assert!(Instant::now() < deadline, "fault never escalated");
        thread::sleep(Duration::from_millis(5));
    }
    let _ = release_tx.send(());

    let report = pool.drain(Duration::from_secs(5)).expect("Failed to drain pool");
    assert!(report.is_complete());

    let captured = faults.faults();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].message, "checksum mismatch");
    assert_eq!(
        pool.stop_report().expect("stop report missing").reason,
        StopReason::Fault
    );
    assert!(later_runs.iter().all(|r| r.load(Ordering::SeqCst) == 0));
}

#[test]
fn test_job_panic_without_escalation_only_ends_that_worker() {
    let pool = PoolManager::with_config(quiet_config(2)).expect("Failed to create pool");
    pool.start().expect("Failed to start pool");

    let runs = counters(6);
    pool.execute(|| panic!("bad object key"));
    for i in 0..6 {
        let runs = Arc::clone(&runs);
        pool.execute(move || {
            runs[i].fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let report = pool.drain(Duration::from_secs(5)).expect("Failed to drain pool");
    assert!(report.is_complete());
    assert!(!pool.is_stopped());
    assert!(runs.iter().all(|r| r.load(Ordering::SeqCst) == 1));

    let panicked: u64 = pool
        .workers()
        .iter()
        .map(|w| w.stats().get_jobs_panicked())
        .sum();
    assert_eq!(panicked, 1);
}
