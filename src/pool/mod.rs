//! Pool manager, worker and configuration

pub mod config;
pub mod manager;
pub mod worker;

pub use config::{PoolConfig, CAPACITY_PER_WORKER, MAX_WORKERS};
pub use manager::{
    DrainReport, PoolManager, PoolManagerBuilder, PoolStats, StopHandle, StopReason, StopReport,
};
pub use worker::{Worker, WorkerStatSnapshot, WorkerState, WorkerStats};
