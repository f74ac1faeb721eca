//! Binding OS termination signals to a pool's stop operation.
//!
//! Signal dispositions are process-wide, so the registry that owns them is
//! created by the program's entry point and injected into each
//! [`PoolManager`](crate::pool::PoolManager). Tests inject a
//! [`ManualSignalRegistry`] instead.
//!
//! # Usage constraint
//!
//! A signal routes to exactly one pool. Registering a second pool for a signal
//! that is already bound moves the route to the newer pool (last registration
//! wins) and logs a warning. Create at most one [`OsSignalRegistry`] per process.

use crate::core::Result;
use crate::pool::{StopHandle, StopReason};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Signals bound when the configuration does not say otherwise.
pub const DEFAULT_STOP_SIGNALS: [StopSignal; 3] = [
    StopSignal::Interrupt,
    StopSignal::Terminate,
    StopSignal::BrokenPipe,
];

/// An OS signal that may be bound to a stop
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopSignal {
    /// SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGPIPE
    BrokenPipe,
    /// SIGHUP
    Hangup,
    /// SIGQUIT
    Quit,
}

impl StopSignal {
    /// Conventional signal name
    pub fn name(self) -> &'static str {
        match self {
            StopSignal::Interrupt => "SIGINT",
            StopSignal::Terminate => "SIGTERM",
            StopSignal::BrokenPipe => "SIGPIPE",
            StopSignal::Hangup => "SIGHUP",
            StopSignal::Quit => "SIGQUIT",
        }
    }

    /// Raw signal number
    #[cfg(unix)]
    pub fn as_raw(self) -> i32 {
        use signal_hook::consts::{SIGHUP, SIGINT, SIGPIPE, SIGQUIT, SIGTERM};
        match self {
            StopSignal::Interrupt => SIGINT,
            StopSignal::Terminate => SIGTERM,
            StopSignal::BrokenPipe => SIGPIPE,
            StopSignal::Hangup => SIGHUP,
            StopSignal::Quit => SIGQUIT,
        }
    }

    /// Map a raw signal number back, if it is one we bind
    #[cfg(unix)]
    pub fn from_raw(raw: i32) -> Option<Self> {
        [
            StopSignal::Interrupt,
            StopSignal::Terminate,
            StopSignal::BrokenPipe,
            StopSignal::Hangup,
            StopSignal::Quit,
        ]
        .into_iter()
        .find(|signal| signal.as_raw() == raw)
    }
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Routes signals to pool stop handles
pub trait SignalRegistry: Send + Sync {
    /// Bind each of `signals` to `stop`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::SignalRegistration`](crate::PoolError::SignalRegistration)
    /// if the OS refuses a binding.
    fn register(&self, signals: &[StopSignal], stop: StopHandle) -> Result<()>;
}

type Routes = HashMap<StopSignal, StopHandle>;

fn bind(routes: &mut Routes, signal: StopSignal, stop: &StopHandle) {
    if routes.insert(signal, stop.clone()).is_some() {
        warn!(
            "{} was already bound to another pool; rebinding to the most recent registration",
            signal
        );
    }
}

/// In-memory registry; signals are delivered by calling [`deliver`](Self::deliver).
#[derive(Debug, Default)]
pub struct ManualSignalRegistry {
    routes: Mutex<Routes>,
}

impl ManualSignalRegistry {
    /// Create a registry with no routes
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `signal` has a route
    pub fn is_bound(&self, signal: StopSignal) -> bool {
        self.routes.lock().contains_key(&signal)
    }

    /// Simulate delivery of `signal`.
    ///
    /// Returns `true` if the delivery performed the stop transition of the
    /// bound pool, `false` if the signal is unbound or the pool was already stopped.
    pub fn deliver(&self, signal: StopSignal) -> bool {
        let route = self.routes.lock().get(&signal).cloned();
        match route {
            Some(stop) => stop.stop_with(StopReason::Signal(signal)),
            None => false,
        }
    }
}

impl SignalRegistry for ManualSignalRegistry {
    fn register(&self, signals: &[StopSignal], stop: StopHandle) -> Result<()> {
        let mut routes = self.routes.lock();
        for &signal in signals {
            bind(&mut routes, signal, &stop);
        }
        Ok(())
    }
}

#[cfg(unix)]
pub use os::OsSignalRegistry;

#[cfg(unix)]
mod os {
    use super::*;
    use crate::core::PoolError;
    use signal_hook::iterator::{Handle, Signals};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};

    struct Dispatcher {
        handle: Handle,
        thread: Option<JoinHandle<()>>,
    }

    /// Registry backed by real OS signal handlers.
    ///
    /// Handlers are installed through `signal-hook`; delivered signals are
    /// picked up by a dedicated `signal-bridge` thread, which calls the bound
    /// pool's stop outside of signal-handler context.
    #[derive(Default)]
    pub struct OsSignalRegistry {
        routes: Arc<Mutex<Routes>>,
        dispatcher: Mutex<Option<Dispatcher>>,
    }

    impl OsSignalRegistry {
        /// Create a registry. No handler is installed until the first `register`.
        pub fn new() -> Self {
            Self::default()
        }

        fn dispatcher_handle(&self) -> Result<Handle> {
            let mut dispatcher = self.dispatcher.lock();
            if let Some(existing) = dispatcher.as_ref() {
                return Ok(existing.handle.clone());
            }

            let no_signals: [i32; 0] = [];
            let signals = Signals::new(no_signals)
                .map_err(|e| PoolError::signal_registration("signal dispatcher", e))?;
            let handle = signals.handle();
            let routes = Arc::clone(&self.routes);

            let thread = thread::Builder::new()
                .name("signal-bridge".to_string())
                .spawn(move || Self::dispatch(signals, routes))
                .map_err(|e| PoolError::signal_registration("signal dispatcher", e))?;

            *dispatcher = Some(Dispatcher {
                handle: handle.clone(),
                thread: Some(thread),
            });
            Ok(handle)
        }

        fn dispatch(mut signals: Signals, routes: Arc<Mutex<Routes>>) {
            for raw in signals.forever() {
                let Some(signal) = StopSignal::from_raw(raw) else {
                    continue;
                };
                let route = routes.lock().get(&signal).cloned();
                match route {
                    Some(stop) => {
                        info!("Received {}", signal);
                        stop.stop_with(StopReason::Signal(signal));
                    }
                    None => debug!("Received {} with no pool bound", signal),
                }
            }
        }
    }

    impl SignalRegistry for OsSignalRegistry {
        fn register(&self, signals: &[StopSignal], stop: StopHandle) -> Result<()> {
            let handle = self.dispatcher_handle()?;
            let mut routes = self.routes.lock();
            for &signal in signals {
                bind(&mut routes, signal, &stop);
                handle
                    .add_signal(signal.as_raw())
                    .map_err(|e| PoolError::signal_registration(signal.name(), e))?;
            }
            debug!("Bound {} stop signals", signals.len());
            Ok(())
        }
    }

    impl fmt::Debug for OsSignalRegistry {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("OsSignalRegistry")
                .field("bound", &self.routes.lock().keys().collect::<Vec<_>>())
                .finish()
        }
    }

    impl Drop for OsSignalRegistry {
        fn drop(&mut self) {
            if let Some(mut dispatcher) = self.dispatcher.lock().take() {
                dispatcher.handle.close();
                if let Some(thread) = dispatcher.thread.take() {
                    let _ = thread.join();
                }
            }
        }
    }
}
