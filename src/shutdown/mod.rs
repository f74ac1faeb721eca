//! External events that stop a pool: OS signals and uncaught faults

pub mod fault;
pub mod signal;

pub use fault::{CapturingFaultSink, Fault, FaultSink, PanicHookSink};
#[cfg(unix)]
pub use signal::OsSignalRegistry;
pub use signal::{ManualSignalRegistry, SignalRegistry, StopSignal, DEFAULT_STOP_SIGNALS};
