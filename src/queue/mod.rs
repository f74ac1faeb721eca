//! The bounded work channel shared by the pool and its workers.
//!
//! Items are either a [`BoxedJob`] or a [`WorkItem::Sentinel`] telling the
//! worker that dequeues it that no more work is coming for its slot.
//!
//! [`BoxedJob`]: crate::core::BoxedJob

mod channel;

pub use channel::WorkChannel;

use crate::core::BoxedJob;

/// An entry on the [`WorkChannel`]
#[derive(Debug)]
pub enum WorkItem {
    /// A job to execute
    Job(BoxedJob),
    /// "No more work for this worker slot"
    Sentinel,
}

impl WorkItem {
    /// Returns `true` for the termination marker
    pub fn is_sentinel(&self) -> bool {
        matches!(self, WorkItem::Sentinel)
    }
}

impl From<BoxedJob> for WorkItem {
    fn from(job: BoxedJob) -> Self {
        WorkItem::Job(job)
    }
}
