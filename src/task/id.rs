use std::fmt;
use std::num::{NonZeroU32, NonZeroU64};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// An opaque ID that uniquely identifies a task for the lifetime of the
/// process.
///
/// Task IDs are never re-used and are not guaranteed to be sequential; they
/// only promise uniqueness.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct TaskId(NonZeroU64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        // Safety margin: at a billion tasks per second this counter takes
        // centuries to wrap.
        let Some(id) = NonZeroU64::new(id) else {
            exhausted("task");
        };

        Self(id)
    }

    pub(crate) fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Uniquely identifies a [`Group`](crate::Group) within the process.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct GroupId(NonZeroU32);

impl GroupId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU32 = AtomicU32::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let Some(id) = NonZeroU32::new(id) else {
            exhausted("group");
        };

        Self(id)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Uniquely identifies a [`Queue`](crate::Queue) within the process.
///
/// Creation order of queues is total and observable: a later-created queue
/// always has a greater ID. The dispatcher relies on this to break priority
/// ties deterministically.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct QueueId(NonZeroU32);

impl QueueId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU32 = AtomicU32::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let Some(id) = NonZeroU32::new(id) else {
            exhausted("queue");
        };

        Self(id)
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cold]
fn exhausted(kind: &str) -> ! {
    panic!("failed to generate unique {kind} ID: bitspace exhausted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_task_ids_unique() {
        let n = 13;
        let mut all_ids = HashSet::with_capacity(n);

        for _ in 0..n {
            all_ids.insert(TaskId::next());
        }

        assert_eq!(all_ids.len(), n);
    }

    #[test]
    fn test_queue_ids_increase_with_creation_order() {
        let first = QueueId::next();
        let second = QueueId::next();
        assert!(second > first);
    }
}
