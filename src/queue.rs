use crate::error::{Result, RuntimeError};
use crate::group::Group;
use crate::runtime::Node;
use crate::task::{Action, QueueId, Task};
use anyhow::anyhow;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Whether a queue preserves submission order for task starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Tasks from this queue start in the order they were pushed, relative
    /// to each other. Claims are serialized through the queue's buffer.
    Ordered,

    /// No start-order guarantee. Tasks are fed straight into the dispatch
    /// lane for the queue's priority, maximizing parallel throughput.
    Unordered,
}

#[derive(Default)]
struct Buffer {
    tasks: VecDeque<Arc<Task>>,
}

/// A bounded buffer of tasks at one scheduling priority.
///
/// Lower numeric priority is more urgent: among non-empty queues the
/// dispatcher services the lowest priority value first, breaking ties by
/// queue creation order. A push on a full queue fails with
/// [`RuntimeError::QueueFull`] immediately rather than blocking the producer.
pub struct Queue {
    id: QueueId,
    priority: usize,
    mode: QueueMode,
    capacity: usize,

    self_weak: Weak<Queue>,
    node: Weak<Node>,

    /// Buffered, not-yet-claimed tasks. Only used in ordered mode; unordered
    /// submissions bypass the buffer entirely.
    buffer: Mutex<Buffer>,

    /// Number of submitted-but-unclaimed tasks an unordered queue currently
    /// has sitting in its dispatch lane.
    occupied: AtomicUsize,

    closed: AtomicBool,
}

impl Queue {
    pub(crate) fn new(
        priority: usize,
        mode: QueueMode,
        capacity: usize,
        node: Weak<Node>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            id: QueueId::next(),
            priority,
            mode,
            capacity,
            self_weak: self_weak.clone(),
            node,
            buffer: Mutex::new(Buffer::default()),
            occupied: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn priority(&self) -> usize {
        self.priority
    }

    pub fn mode(&self) -> QueueMode {
        self.mode
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of submitted tasks not yet claimed by a worker.
    pub fn len(&self) -> usize {
        match self.mode {
            QueueMode::Ordered => self.buffer.lock().tasks.len(),
            QueueMode::Unordered => self.occupied.load(Ordering::Acquire),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Submits an action to this queue and schedules the resulting task at
    /// the queue's priority.
    pub fn push(&self, action: impl Into<Action>) -> Result<Arc<Task>> {
        self.submit(action.into(), None)
    }

    /// Like [`Queue::push`], registering the task with `group` before it is
    /// scheduled.
    pub fn push_in_group(&self, group: &Arc<Group>, action: impl Into<Action>) -> Result<Arc<Task>> {
        self.submit(action.into(), Some(Arc::clone(group)))
    }

    fn submit(&self, action: Action, group: Option<Arc<Group>>) -> Result<Arc<Task>> {
        let node = self.node.upgrade().ok_or(RuntimeError::NotInitialized)?;

        match self.mode {
            QueueMode::Ordered => {
                // Capacity check, task creation and buffering all happen
                // under the buffer lock, so a failed push leaves the queue
                // untouched and a concurrent close cannot drop the task.
                let mut buffer = self.buffer.lock();
                if self.closed.load(Ordering::Acquire) {
                    return Err(RuntimeError::QueueClosed);
                }
                if buffer.tasks.len() >= self.capacity {
                    return Err(RuntimeError::QueueFull);
                }

                let task = node.prepare_task(action, self.priority, group)?;
                task.bind_queue(self.self_weak.clone());
                task.mark_scheduled();
                buffer.tasks.push_back(Arc::clone(&task));
                drop(buffer);

                node.dispatch().notify_one();
                Ok(task)
            }
            QueueMode::Unordered => {
                if self.closed.load(Ordering::Acquire) {
                    return Err(RuntimeError::QueueClosed);
                }

                // Reserve a capacity slot before creating the task.
                let prev = self.occupied.fetch_add(1, Ordering::AcqRel);
                if prev >= self.capacity {
                    self.occupied.fetch_sub(1, Ordering::AcqRel);
                    return Err(RuntimeError::QueueFull);
                }

                let task = match node.prepare_task(action, self.priority, group) {
                    Ok(task) => task,
                    Err(err) => {
                        self.occupied.fetch_sub(1, Ordering::AcqRel);
                        return Err(err);
                    }
                };
                task.bind_queue(self.self_weak.clone());
                task.mark_scheduled();
                node.dispatch().inject(Arc::clone(&task));
                Ok(task)
            }
        }
    }

    /// Best-effort removal of a still-buffered task.
    ///
    /// Returns `true` if the task was withdrawn; it then terminates as
    /// [`RuntimeError::ActionFailed`] without its action running, and all the
    /// usual completion bookkeeping (waiters, group, dependents) applies.
    /// Returns `false`, silently (this race is expected), if a worker
    /// already claimed the task, or for unordered queues, whose tasks are
    /// not individually addressable once injected.
    pub fn withdraw(&self, task: &Arc<Task>) -> bool {
        let Some(node) = self.node.upgrade() else {
            return false;
        };
        if self.mode == QueueMode::Unordered {
            return false;
        }

        let removed = {
            let mut buffer = self.buffer.lock();
            let index = buffer.tasks.iter().position(|t| t.id() == task.id());
            index.and_then(|index| buffer.tasks.remove(index))
        };

        match removed {
            Some(task) => {
                node.finish_task(
                    task,
                    Err(RuntimeError::action_failed(anyhow!(
                        "withdrawn before execution"
                    ))),
                    None,
                );
                true
            }
            None => false,
        }
    }

    /// Claims the next buffered task of an ordered queue.
    ///
    /// The pop and the `Scheduled → Running` transition happen under the
    /// buffer lock; this is what makes claim order equal submission order.
    pub(crate) fn claim_next(&self) -> Option<Arc<Task>> {
        match self.mode {
            QueueMode::Unordered => None,
            QueueMode::Ordered => {
                let mut buffer = self.buffer.lock();
                let task = buffer.tasks.pop_front()?;
                let claimed = task.claim();
                debug_assert!(claimed, "buffered task was not in Scheduled state");
                Some(task)
            }
        }
    }

    /// Whether the dispatcher could claim something here right now.
    pub(crate) fn has_ready(&self) -> bool {
        match self.mode {
            QueueMode::Ordered => !self.buffer.lock().tasks.is_empty(),
            QueueMode::Unordered => false,
        }
    }

    /// Called by the dispatcher when a lane-resident task of this queue is
    /// claimed. Only unordered queues track lane occupancy; an ordered
    /// queue's tasks reach the lane only when flushed by destruction, after
    /// occupancy stopped mattering.
    pub(crate) fn on_claimed(&self) {
        if self.mode == QueueMode::Unordered {
            let prev = self.occupied.fetch_sub(1, Ordering::AcqRel);
            debug_assert!(prev > 0, "queue occupancy underflow");
        }
    }

    /// Closes the queue for further pushes and hands back whatever is still
    /// buffered, in submission order.
    pub(crate) fn close(&self) -> Vec<Arc<Task>> {
        let mut buffer = self.buffer.lock();
        self.closed.store(true, Ordering::Release);
        buffer.tasks.drain(..).collect()
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("mode", &self.mode)
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Queue: Send, Sync);
}
