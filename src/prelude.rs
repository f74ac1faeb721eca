//! Convenient re-exports for common types and traits

pub use crate::core::{BoxedJob, ClosureJob, Job, PoolError, Result};
pub use crate::pool::{
    DrainReport, PoolConfig, PoolManager, StopHandle, StopReason, StopReport, WorkerState,
};
#[cfg(unix)]
pub use crate::shutdown::OsSignalRegistry;
pub use crate::shutdown::{
    CapturingFaultSink, FaultSink, ManualSignalRegistry, PanicHookSink, SignalRegistry, StopSignal,
};
