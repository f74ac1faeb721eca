//! # Rust Worker Pool
//!
//! A fixed-size pool of worker threads consuming jobs from a bounded queue,
//! with a drain handshake for orderly completion and a cooperative stop that
//! can be triggered by the caller, an OS signal, or an uncaught panic.
//!
//! ## Features
//!
//! - **Backpressure**: the work channel holds three items per worker; `submit` blocks when it is full
//! - **Drain**: one sentinel per worker, then a bounded wait on exactly the pool's own threads
//! - **Cooperative stop**: a monotonic flag checked at every loop boundary; running jobs are never interrupted
//! - **Signal bridge**: configured OS signals routed to the pool's stop through an injectable registry
//! - **Fault escalation**: panics anywhere in the process stop the pool after the default report
//!
//! ## Quick Start
//!
//! ```rust
//! use rust_worker_pool::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> Result<()> {
//! let pool = PoolManager::with_config(PoolConfig::new(4).with_fault_escalation(false))?;
//! pool.start()?;
//!
//! for i in 0..10 {
//!     pool.execute(move || {
//!         println!("Transfer {} done", i);
//!         Ok(())
//!     });
//! }
//!
//! let report = pool.drain(Duration::from_secs(5))?;
//! assert!(report.is_complete());
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Jobs
//!
//! ```rust
//! use rust_worker_pool::prelude::*;
//! use std::time::Duration;
//!
//! struct Upload {
//!     key: String,
//! }
//!
//! impl Job for Upload {
//!     fn execute(&mut self) -> Result<()> {
//!         println!("Uploading {}", self.key);
//!         Ok(())
//!     }
//!
//!     fn job_type(&self) -> &str {
//!         "Upload"
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! # let pool = PoolManager::with_config(PoolConfig::new(2).with_fault_escalation(false))?;
//! # pool.start()?;
//! pool.submit(Upload {
//!     key: "reports/2024.csv".to_string(),
//! });
//! # pool.drain(Duration::from_secs(5))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Stopping from outside
//!
//! The entry point owns the signal registry and hands it to each pool:
//!
//! ```rust,no_run
//! use rust_worker_pool::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let signals = Arc::new(OsSignalRegistry::new());
//! let pool = PoolManager::builder(PoolConfig::new(8))
//!     .signal_registry(signals.clone())
//!     .build()?;
//! pool.start()?;
//! // Ctrl-C now behaves exactly like pool.stop()
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod core;
pub mod pool;
pub mod prelude;
pub mod queue;
pub mod shutdown;

pub use crate::core::{BoxedJob, ClosureJob, Job, PoolError, Result};
pub use crate::pool::{DrainReport, PoolConfig, PoolManager, StopHandle, StopReason, StopReport};
