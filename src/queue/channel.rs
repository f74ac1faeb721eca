//! Bounded FIFO channel with capacity limit.

use super::WorkItem;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use std::time::Duration;

/// A bounded, multi-producer multi-consumer FIFO of [`WorkItem`]s.
///
/// `put` blocks while the channel is full and `get` blocks while it is empty.
/// Cloning yields another handle to the same channel. Every handle owns both
/// ends, so the channel never disconnects while a handle is alive.
///
/// # Example
///
/// ```rust
/// use rust_worker_pool::queue::{WorkChannel, WorkItem};
/// use std::time::Duration;
///
/// let channel = WorkChannel::new(1);
/// channel.put(WorkItem::Sentinel);
///
/// // Full: a bounded put hands the item back
/// assert!(channel.put_timeout(WorkItem::Sentinel, Duration::from_millis(5)).is_err());
/// assert!(channel.get().map(|item| item.is_sentinel()).unwrap_or(false));
/// ```
#[derive(Clone)]
pub struct WorkChannel {
    sender: Sender<WorkItem>,
    receiver: Receiver<WorkItem>,
    capacity: usize,
}

impl WorkChannel {
    /// Creates a new channel with the specified capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        let (sender, receiver) = channel::bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Returns the maximum number of items the channel holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue an item, blocking while the channel is full.
    pub fn put(&self, item: WorkItem) {
        // Cannot disconnect: `self` keeps a receiver alive.
        let _ = self.sender.send(item);
    }

    /// Enqueue an item, waiting at most `timeout` for space.
    ///
    /// Returns the item back if the channel stayed full.
    pub fn put_timeout(&self, item: WorkItem, timeout: Duration) -> Result<(), WorkItem> {
        self.sender.send_timeout(item, timeout).map_err(|e| match e {
            SendTimeoutError::Timeout(item) | SendTimeoutError::Disconnected(item) => item,
        })
    }

    /// Enqueue an item only if there is room right now.
    pub fn try_put(&self, item: WorkItem) -> Result<(), WorkItem> {
        self.sender.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) | TrySendError::Disconnected(item) => item,
        })
    }

    /// Dequeue the next item, blocking while the channel is empty.
    pub fn get(&self) -> Option<WorkItem> {
        self.receiver.recv().ok()
    }

    /// Dequeue the next item, waiting at most `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Option<WorkItem> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Number of items currently queued
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns `true` if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl std::fmt::Debug for WorkChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkChannel")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BoxedJob, ClosureJob};
    use std::sync::Arc;
    use std::thread;

    fn named_job(name: &str) -> WorkItem {
        let job: BoxedJob = Box::new(ClosureJob::with_name(|| Ok(()), name));
        WorkItem::Job(job)
    }

    fn job_name(item: WorkItem) -> String {
        match item {
            WorkItem::Job(job) => job.job_type().to_string(),
            WorkItem::Sentinel => "sentinel".to_string(),
        }
    }

    #[test]
    fn test_capacity() {
        let channel = WorkChannel::new(9);
        assert_eq!(channel.capacity(), 9);
        assert!(channel.is_empty());
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than 0")]
    fn test_zero_capacity_panics() {
        let _ = WorkChannel::new(0);
    }

    #[test]
    fn test_fifo_order() {
        let channel = WorkChannel::new(4);
        channel.put(named_job("a"));
        channel.put(named_job("b"));
        channel.put(WorkItem::Sentinel);
        channel.put(named_job("c"));

        let order: Vec<String> = (0..4)
            .map(|_| job_name(channel.get().unwrap()))
            .collect();
        assert_eq!(order, vec!["a", "b", "sentinel", "c"]);
    }

    #[test]
    fn test_try_put_full_returns_item() {
        let channel = WorkChannel::new(1);
        channel.try_put(named_job("first")).unwrap();

        let rejected = channel.try_put(named_job("second")).unwrap_err();
        assert_eq!(job_name(rejected), "second");
        assert_eq!(channel.len(), 1);
    }

    #[test]
    fn test_put_blocks_when_full() {
        let channel = Arc::new(WorkChannel::new(1));
        channel.put(named_job("first"));

        let producer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || channel.put(named_job("second")))
        };

        // Give the producer a chance to block
        thread::sleep(Duration::from_millis(20));
        assert_eq!(channel.len(), 1);
        assert!(!producer.is_finished());

        assert_eq!(job_name(channel.get().unwrap()), "first");
        producer.join().unwrap();
        assert_eq!(job_name(channel.get().unwrap()), "second");
    }

    #[test]
    fn test_put_timeout_when_full() {
        let channel = WorkChannel::new(1);
        channel.put(WorkItem::Sentinel);

        let returned = channel
            .put_timeout(named_job("late"), Duration::from_millis(10))
            .unwrap_err();
        assert_eq!(job_name(returned), "late");
    }

    #[test]
    fn test_get_timeout_empty() {
        let channel = WorkChannel::new(3);
        assert!(channel.get_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_concurrent_producers_consumers() {
        let channel = WorkChannel::new(3);
        let per_producer = 50;

        let producers: Vec<_> = (0..2)
            .map(|_| {
                let channel = channel.clone();
                thread::spawn(move || {
                    for _ in 0..per_producer {
                        channel.put(named_job("x"));
                    }
                })
            })
            .collect();

        let consumer = {
            let channel = channel.clone();
            thread::spawn(move || {
                let mut received = 0;
                while received < 2 * per_producer {
                    if channel.get().is_some() {
                        received += 1;
                    }
                }
                received
            })
        };

        for producer in producers {
            producer.join().unwrap();
        }
        assert_eq!(consumer.join().unwrap(), 2 * per_producer);
        assert!(channel.is_empty());
    }
}
