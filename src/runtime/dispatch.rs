use crate::queue::Queue;
use crate::task::{QueueId, Task};
use crossbeam_deque::{Injector, Steal};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};

struct ParkSlot {
    thread: Thread,
    unparked: Arc<AtomicBool>,
}

/// The published state workers dispatch from.
///
/// Two sources feed the workers, both readable without touching the node's
/// registries: one standalone lane per priority level for spawned and
/// continuation tasks, and the ordered queues, published here sorted by
/// (priority, creation order). A claim pass walks priorities from most
/// urgent (0) upward, draining queues before the lane at each level, so
/// priority-first service with a creation-order tie-break falls out of the
/// scan itself.
pub(crate) struct Dispatch {
    /// One FIFO injector per priority level, index == priority.
    lanes: Vec<Injector<Arc<Task>>>,

    /// Ordered queues, sorted by (priority, id). Read on every claim pass;
    /// written only on queue create/destroy.
    queues: RwLock<Vec<Arc<Queue>>>,

    /// LIFO collection of parked workers. Unparking in LIFO order favors the
    /// thread whose CPU cache is hottest.
    parked: Mutex<VecDeque<ParkSlot>>,

    shutdown: AtomicBool,
}

impl Dispatch {
    pub(crate) fn new(max_priorities: usize) -> Self {
        Self {
            lanes: (0..max_priorities).map(|_| Injector::new()).collect(),
            queues: RwLock::new(Vec::new()),
            parked: Mutex::new(VecDeque::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Hands a scheduled task to the lane for its priority and wakes a
    /// worker for it.
    pub(crate) fn inject(&self, task: Arc<Task>) {
        debug_assert!(task.priority() < self.lanes.len());
        self.lanes[task.priority()].push(task);
        self.notify_one();
    }

    /// Wakes one parked worker, if any. Called after any submission that a
    /// parked worker might otherwise sleep through.
    pub(crate) fn notify_one(&self) {
        if let Some(slot) = self.parked.lock().pop_back() {
            slot.unparked.store(true, Ordering::Release);
            slot.thread.unpark();
        }
    }

    pub(crate) fn publish_queue(&self, queue: Arc<Queue>) {
        let mut queues = self.queues.write();
        let pos = queues
            .partition_point(|q| (q.priority(), q.id()) <= (queue.priority(), queue.id()));
        queues.insert(pos, queue);
    }

    pub(crate) fn retract_queue(&self, id: QueueId) {
        self.queues.write().retain(|q| q.id() != id);
    }

    /// Claims the most urgent ready task, transitioning it to Running.
    pub(crate) fn claim(&self) -> Option<Arc<Task>> {
        let queues = self.queues.read();
        let mut qi = 0;

        for priority in 0..self.lanes.len() {
            // Queues first: their tie-break (creation order) is encoded in
            // the sort order of the published list.
            while qi < queues.len() && queues[qi].priority() == priority {
                if let Some(task) = queues[qi].claim_next() {
                    return Some(task);
                }
                qi += 1;
            }

            loop {
                match self.lanes[priority].steal() {
                    Steal::Success(task) => {
                        if task.claim() {
                            if let Some(queue) = task.queue_binding() {
                                queue.on_claimed();
                            }
                            return Some(task);
                        }
                        // Terminated while lane-resident; nothing to run.
                    }
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }

        None
    }

    fn has_ready(&self) -> bool {
        self.lanes.iter().any(|lane| !lane.is_empty())
            || self.queues.read().iter().any(|queue| queue.has_ready())
    }

    /// Parks the calling worker until new work or shutdown wakes it.
    ///
    /// The ready/shutdown re-check happens while holding the parked-list
    /// lock: every producer notifies through that same lock, so a worker can
    /// never check, miss a concurrent submission, and then park forever.
    pub(crate) fn park_current(&self) {
        let unparked = {
            let mut parked = self.parked.lock();

            if self.shutdown.load(Ordering::Acquire) || self.has_ready() {
                return;
            }

            let slot = ParkSlot {
                thread: thread::current(),
                unparked: Arc::new(AtomicBool::new(false)),
            };
            let unparked = Arc::clone(&slot.unparked);
            parked.push_back(slot);
            unparked
        };

        // Loop to absorb spurious wakeups, as the park docs require.
        while !unparked.load(Ordering::Acquire) {
            thread::park();
        }
    }

    pub(crate) fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let mut parked = self.parked.lock();
        while let Some(slot) = parked.pop_back() {
            slot.unparked.store(true, Ordering::Release);
            slot.thread.unpark();
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Action;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Dispatch: Send, Sync);

    fn scheduled_task(priority: usize) -> Arc<Task> {
        let task = Task::new(Action::new(|_| {}), priority, None);
        task.mark_scheduled();
        task
    }

    #[test]
    fn test_claim_prefers_lower_priority_value() {
        let dispatch = Dispatch::new(3);
        let relaxed = scheduled_task(2);
        let urgent = scheduled_task(0);
        dispatch.inject(Arc::clone(&relaxed));
        dispatch.inject(Arc::clone(&urgent));

        assert_eq!(dispatch.claim().unwrap().id(), urgent.id());
        assert_eq!(dispatch.claim().unwrap().id(), relaxed.id());
        assert!(dispatch.claim().is_none());
    }

    #[test]
    fn test_lane_is_fifo_within_priority() {
        let dispatch = Dispatch::new(1);
        let first = scheduled_task(0);
        let second = scheduled_task(0);
        dispatch.inject(Arc::clone(&first));
        dispatch.inject(Arc::clone(&second));

        assert_eq!(dispatch.claim().unwrap().id(), first.id());
        assert_eq!(dispatch.claim().unwrap().id(), second.id());
    }
}
