//! Simulated object transfers through a worker pool
//!
//! Uploads a batch of fake objects with a small pool, then drains it. Press
//! Ctrl-C while it runs to see a signal-driven stop: transfers in flight
//! finish, queued ones are abandoned.
//!
//! Run with: RUST_LOG=debug cargo run --example transfer_pool

use rand::Rng;
use rust_worker_pool::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct Transfer {
    key: String,
    bytes: u64,
    transferred: Arc<AtomicU64>,
}

impl Job for Transfer {
    fn execute(&mut self) -> Result<()> {
        let millis = rand::thread_rng().gen_range(20..120);
        thread::sleep(Duration::from_millis(millis));

        // Roughly one in twenty objects is rejected by the remote side
        if rand::thread_rng().gen_ratio(1, 20) {
            return Err(PoolError::execution(
                self.job_type(),
                format!("remote rejected {}", self.key),
            ));
        }

        self.transferred.fetch_add(self.bytes, Ordering::Relaxed);
        println!("  {} ({} bytes) in {}ms", self.key, self.bytes, millis);
        Ok(())
    }

    fn job_type(&self) -> &str {
        "Transfer"
    }

    fn on_cancelled(&mut self) {
        println!("  {} abandoned", self.key);
    }
}

fn main() -> Result<()> {
    env_logger::init();

    println!("=== Worker Pool - Transfer Example ===\n");

    let signals = Arc::new(OsSignalRegistry::new());
    let pool = PoolManager::builder(
        PoolConfig::new(4)
            .with_thread_name_prefix("transfer")
            .with_poll_interval(Duration::from_millis(50)),
    )
    .signal_registry(signals.clone())
    .fault_sink(Arc::new(PanicHookSink::new()))
    .build()?;

    println!(
        "1. Starting {} workers (channel holds {} items)",
        pool.worker_count(),
        pool.capacity()
    );
    pool.start()?;

    println!("\n2. Submitting 40 transfers:");
    let transferred = Arc::new(AtomicU64::new(0));
    let mut rng = rand::thread_rng();
    for i in 0..40 {
        pool.submit(Transfer {
            key: format!("backups/2024-06/{:04}.tar", i),
            bytes: rng.gen_range(1_024..1_048_576),
            transferred: Arc::clone(&transferred),
        });
    }

    println!("\n3. Draining:");
    let report = pool.drain(Duration::from_secs(10))?;
    println!(
        "   {} sentinels, {} workers stopped, {} timed out",
        report.sentinels_pushed,
        report.stopped.len(),
        report.timed_out.len()
    );

    if let Some(stop) = pool.stop_report() {
        println!(
            "   Stopped early ({:?}) with {} transfers still queued",
            stop.reason, stop.outstanding_jobs
        );
    }

    println!("\n4. Statistics:");
    println!(
        "   {} bytes transferred by {} successful jobs",
        transferred.load(Ordering::Relaxed),
        pool.total_jobs_processed()
    );
    for worker in pool.workers() {
        let stats = worker.stats();
        println!(
            "   {}: {} ok, {} failed, {} cancelled, avg {:.0}μs",
            worker.name(),
            stats.get_jobs_processed(),
            stats.get_jobs_failed(),
            stats.get_jobs_cancelled(),
            stats.get_average_processing_time_us()
        );
    }

    match serde_json::to_string_pretty(&pool.stats()) {
        Ok(json) => println!("\n5. Pool stats as JSON:\n{}", json),
        Err(e) => eprintln!("Failed to serialize stats: {}", e),
    }

    Ok(())
}
