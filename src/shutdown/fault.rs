//! Fault escalation: turning uncaught panics into a pool stop.
//!
//! A [`FaultSink`] is armed once when the pool is built with fault escalation
//! enabled. Workers hand it every panic they catch from a job; the production
//! [`PanicHookSink`] additionally hooks panics on every other thread of the
//! process.

use crate::pool::{StopHandle, StopReason};
use log::{debug, error};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::Once;
use std::thread;

/// An uncaught panic, reduced to what is worth logging
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Fault {
    /// Name of the thread that panicked, if it had one
    pub thread: Option<String>,
    /// Panic message
    pub message: String,
    /// `file:line:column` of the panic, when known
    pub location: Option<String>,
}

impl Fault {
    /// A fault raised on the current thread
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            thread: thread::current().name().map(str::to_string),
            message: message.into(),
            location: None,
        }
    }

    /// Build a fault from a payload returned by `catch_unwind`
    pub fn from_panic_payload(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        Self::new(message)
    }

    /// Attach a source location
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "thread '{}' panicked",
            self.thread.as_deref().unwrap_or("<unnamed>")
        )?;
        if let Some(location) = &self.location {
            write!(f, " at {}", location)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Destination for faults that should bring the pool down.
pub trait FaultSink: Send + Sync {
    /// Arm the sink for the pool behind `stop`. Called once, at pool construction.
    fn install(&self, stop: StopHandle);

    /// A worker caught `fault` while executing a job.
    fn report(&self, fault: &Fault);
}

/// Pools armed through [`PanicHookSink`]. Entries for dropped pools are
/// pruned whenever another pool is armed.
static ARMED_POOLS: Mutex<Vec<StopHandle>> = parking_lot::const_mutex(Vec::new());
static HOOK_INSTALLED: Once = Once::new();

fn install_process_hook() {
    HOOK_INSTALLED.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            previous(info);

            let mut fault = Fault::from_panic_payload(info.payload());
            if let Some(location) = info.location() {
                fault = fault.with_location(location.to_string());
            }
            let pools = ARMED_POOLS.lock().clone();
            for stop in pools {
                if stop.stop_with(StopReason::Fault) {
                    error!("Stopping pool after {}", fault);
                }
            }
        }));
        debug!("Panic hook installed");
    });
}

/// Process-wide panic hook that forwards to the previously installed hook and
/// then stops every live pool armed with this sink.
///
/// The hook is installed once per process, on the first `install`, and is
/// never removed. Each armed pool adds a route to it; routes of pools that
/// have been dropped are discarded the next time a pool is armed.
#[derive(Debug, Default)]
pub struct PanicHookSink {
    stop: Mutex<Option<StopHandle>>,
}

impl PanicHookSink {
    /// Create an unarmed sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pools the process hook currently routes to
    pub fn armed_pools() -> usize {
        ARMED_POOLS.lock().len()
    }
}

impl FaultSink for PanicHookSink {
    fn install(&self, stop: StopHandle) {
        *self.stop.lock() = Some(stop.clone());

        {
            let mut pools = ARMED_POOLS.lock();
            pools.retain(|armed| !armed.is_detached());
            pools.push(stop);
        }
        install_process_hook();
    }

    fn report(&self, fault: &Fault) {
        // The hook already forwarded this panic; just make sure the pool stops.
        debug!("Escalating {}", fault);
        if let Some(stop) = self.stop.lock().as_ref() {
            stop.stop_with(StopReason::Fault);
        }
    }
}

/// Records every fault it receives and stops the pool, without touching any
/// process-wide state.
#[derive(Debug, Default)]
pub struct CapturingFaultSink {
    stop: Mutex<Option<StopHandle>>,
    faults: Mutex<Vec<Fault>>,
}

impl CapturingFaultSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once a pool has armed this sink
    pub fn is_installed(&self) -> bool {
        self.stop.lock().is_some()
    }

    /// Faults received so far
    pub fn faults(&self) -> Vec<Fault> {
        self.faults.lock().clone()
    }
}

impl FaultSink for CapturingFaultSink {
    fn install(&self, stop: StopHandle) {
        *self.stop.lock() = Some(stop);
    }

    fn report(&self, fault: &Fault) {
        self.faults.lock().push(fault.clone());
        if let Some(stop) = self.stop.lock().as_ref() {
            stop.stop_with(StopReason::Fault);
        }
    }
}
