//! Pool configuration

use crate::core::{PoolError, Result};
use crate::shutdown::signal::{StopSignal, DEFAULT_STOP_SIGNALS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Channel slots per worker.
pub const CAPACITY_PER_WORKER: usize = 3;

/// Upper bound on `worker_count`; the channel preallocates every slot.
pub const MAX_WORKERS: usize = 4096;

/// Configuration for a [`PoolManager`](crate::pool::PoolManager)
///
/// # Example
///
/// ```rust
/// use rust_worker_pool::pool::PoolConfig;
/// use rust_worker_pool::shutdown::StopSignal;
///
/// let config = PoolConfig::new(4)
///     .with_stop_signals([StopSignal::Interrupt, StopSignal::Terminate])
///     .with_thread_name_prefix("transfer");
///
/// assert_eq!(config.capacity(), 12);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads; also the channel capacity multiplier
    pub worker_count: usize,
    /// OS signals bound to the pool's stop operation
    pub stop_signals: Vec<StopSignal>,
    /// Install the fault sink so that uncaught panics stop the pool
    pub enable_fault_escalation: bool,
    /// Thread name prefix
    pub thread_name_prefix: String,
    /// Longest a worker waits on an empty channel before re-checking for a stop request.
    /// Default: 100ms
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            stop_signals: DEFAULT_STOP_SIGNALS.to_vec(),
            enable_fault_escalation: true,
            thread_name_prefix: "worker".to_string(),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with specified number of workers
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    ///
    /// ```rust
    /// use rust_worker_pool::pool::PoolConfig;
    ///
    /// let config = PoolConfig::from_json(r#"{"worker_count": 2, "stop_signals": ["terminate"]}"#)?;
    /// assert_eq!(config.capacity(), 6);
    /// assert!(config.enable_fault_escalation);
    /// # Ok::<(), rust_worker_pool::PoolError>(())
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the OS signals that trigger a stop
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_stop_signals<I>(mut self, signals: I) -> Self
    where
        I: IntoIterator<Item = StopSignal>,
    {
        self.stop_signals = signals.into_iter().collect();
        self
    }

    /// Enable or disable fault escalation
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_fault_escalation(mut self, enable: bool) -> Self {
        self.enable_fault_escalation = enable;
        self
    }

    /// Set thread name prefix
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the worker poll interval.
    ///
    /// Shorter intervals make stop requests visible sooner to idle workers at
    /// the cost of more wakeups. Must be non-zero (checked by [`validate`](Self::validate)).
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Capacity of the work channel: three slots per worker
    pub fn capacity(&self) -> usize {
        self.worker_count.saturating_mul(CAPACITY_PER_WORKER)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(PoolError::invalid_config(
                "worker_count",
                "Number of workers must be greater than 0",
            ));
        }
        if self.worker_count > MAX_WORKERS {
            return Err(PoolError::invalid_config(
                "worker_count",
                format!("Number of workers must not exceed {}", MAX_WORKERS),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(PoolError::invalid_config(
                "poll_interval",
                "Poll interval must be non-zero",
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
