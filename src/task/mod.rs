use crate::continuation::ChainShared;
use crate::error::{Result, RuntimeError};
use crate::group::Group;
use crate::queue::Queue;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

pub mod action;
pub use action::Action;

pub mod context;
pub use context::TaskContext;

pub mod id;
pub use id::{GroupId, QueueId, TaskId};

/// Lifecycle of a task.
///
/// Transitions only ever move forward: `Created → Scheduled → Running →
/// {Completed, Failed}`. A withdrawn or dependency-poisoned task can jump
/// straight from `Created`/`Scheduled` to `Failed` without ever running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Scheduled,
    Running,
    Completed,
    Failed,
}

const CREATED: u8 = 0;
const SCHEDULED: u8 = 1;
const RUNNING: u8 = 2;
const COMPLETED: u8 = 3;
const FAILED: u8 = 4;

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            CREATED => TaskState::Created,
            SCHEDULED => TaskState::Scheduled,
            RUNNING => TaskState::Running,
            COMPLETED => TaskState::Completed,
            FAILED => TaskState::Failed,
            _ => unreachable!("invalid task state: {raw}"),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

#[derive(Default)]
struct Completion {
    /// Terminal outcome, set exactly once by [`Task::finish`].
    status: Option<Result<()>>,

    /// Value recorded through [`TaskContext::complete`]. Taken at most once.
    result: Option<Box<dyn Any + Send>>,
}

/// One schedulable unit of work: an [`Action`] plus identity, priority and a
/// waitable completion state.
///
/// Tasks are shared by reference counting: the submitter, the dispatcher and
/// any waiters all hold the same `Arc<Task>`. Ownership of the *right to run*
/// the action moves exactly once, from the dispatcher to the claiming worker.
pub struct Task {
    id: TaskId,
    priority: usize,

    state: AtomicU8,

    /// Consumed by the worker that claims the task.
    action: Mutex<Option<Action>>,

    /// Group this task was registered with before scheduling, if any.
    group: Option<Arc<Group>>,

    /// Back-reference to the queue that buffered this task. Weak, so a
    /// destroyed queue is not kept alive by its in-flight tasks.
    queue: OnceLock<Weak<Queue>>,

    /// Set at chain-construction time for continuation tasks.
    chain: OnceLock<(Arc<ChainShared>, u32)>,

    completion: Mutex<Completion>,
    done: Condvar,
}

impl Task {
    pub(crate) fn new(action: Action, priority: usize, group: Option<Arc<Group>>) -> Arc<Self> {
        Arc::new(Self {
            id: TaskId::next(),
            priority,
            state: AtomicU8::new(CREATED),
            action: Mutex::new(Some(action)),
            group,
            queue: OnceLock::new(),
            chain: OnceLock::new(),
            completion: Mutex::new(Completion::default()),
            done: Condvar::new(),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> usize {
        self.priority
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn group(&self) -> Option<&Arc<Group>> {
        self.group.as_ref()
    }

    /// Blocks the calling thread until the task reaches a terminal state and
    /// returns the stored outcome. Waiting on an already-terminal task
    /// returns immediately; re-waiting is idempotent.
    pub fn wait(&self) -> Result<()> {
        let mut completion = self.completion.lock();
        loop {
            if let Some(status) = &completion.status {
                return status.clone();
            }
            self.done.wait(&mut completion);
        }
    }

    /// Like [`Task::wait`], but gives up with [`RuntimeError::Timeout`] after
    /// `timeout` has elapsed without the task terminating.
    pub fn wait_for(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut completion = self.completion.lock();

        loop {
            if let Some(status) = &completion.status {
                return status.clone();
            }
            if self.done.wait_until(&mut completion, deadline).timed_out() {
                return match &completion.status {
                    Some(status) => status.clone(),
                    None => Err(RuntimeError::Timeout),
                };
            }
        }
    }

    /// Takes the result value recorded by the action, if any.
    ///
    /// The value is handed out exactly once; subsequent calls return `None`.
    pub fn take_result(&self) -> Option<Box<dyn Any + Send>> {
        self.completion.lock().result.take()
    }

    pub(crate) fn take_action(&self) -> Option<Action> {
        self.action.lock().take()
    }

    pub(crate) fn bind_queue(&self, queue: Weak<Queue>) {
        self.queue
            .set(queue)
            .unwrap_or_else(|_| unreachable!("task bound to a queue twice"));
    }

    pub(crate) fn queue_binding(&self) -> Option<Arc<Queue>> {
        self.queue.get().and_then(Weak::upgrade)
    }

    pub(crate) fn bind_chain(&self, chain: Arc<ChainShared>, index: u32) {
        self.chain
            .set((chain, index))
            .unwrap_or_else(|_| unreachable!("task bound to a chain twice"));
    }

    pub(crate) fn chain_binding(&self) -> Option<&(Arc<ChainShared>, u32)> {
        self.chain.get()
    }

    /// `Created → Scheduled`, on submission.
    pub(crate) fn mark_scheduled(&self) {
        let prev = self
            .state
            .compare_exchange(CREATED, SCHEDULED, Ordering::AcqRel, Ordering::Acquire);
        debug_assert!(prev.is_ok(), "task scheduled twice");
    }

    /// `Scheduled → Running`, when a worker claims the task. The claim is the
    /// task's observable start: for an ordered queue it happens under the
    /// queue's buffer lock, which is what makes per-queue start order equal
    /// submission order.
    pub(crate) fn claim(&self) -> bool {
        self.state
            .compare_exchange(SCHEDULED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Records the terminal outcome and wakes all waiters. Called exactly
    /// once per task, from the completion fan-out.
    pub(crate) fn finish(&self, status: Result<()>, result: Option<Box<dyn Any + Send>>) {
        let terminal = if status.is_ok() { COMPLETED } else { FAILED };
        let prev = self.state.swap(terminal, Ordering::AcqRel);
        debug_assert!(
            prev != COMPLETED && prev != FAILED,
            "task finished twice (task {})",
            self.id
        );

        let mut completion = self.completion.lock();
        completion.status = Some(status);
        completion.result = result;
        self.done.notify_all();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Task: Send, Sync);

    #[test]
    fn test_state_machine_forward_only() {
        let task = Task::new(Action::new(|_| {}), 0, None);
        assert_eq!(task.state(), TaskState::Created);

        task.mark_scheduled();
        assert_eq!(task.state(), TaskState::Scheduled);
        assert!(task.claim());
        assert!(!task.claim(), "claiming twice must fail");
        assert_eq!(task.state(), TaskState::Running);

        task.finish(Ok(()), None);
        assert_eq!(task.state(), TaskState::Completed);
        assert!(task.state().is_terminal());
    }

    #[test]
    fn test_wait_after_terminal_returns_immediately() {
        let task = Task::new(Action::new(|_| {}), 0, None);
        task.mark_scheduled();
        assert!(task.claim());
        task.finish(Ok(()), Some(Box::new(7usize)));

        assert!(task.wait().is_ok());
        assert!(task.wait().is_ok(), "re-waiting is idempotent");

        let result = task.take_result().unwrap();
        assert_eq!(*result.downcast::<usize>().unwrap(), 7);
        assert!(task.take_result().is_none(), "result is taken exactly once");
    }

    #[test]
    fn test_wait_for_times_out_on_running_task() {
        let task = Task::new(Action::new(|_| {}), 0, None);
        task.mark_scheduled();

        let waited = task.wait_for(Duration::from_millis(20));
        assert!(matches!(waited, Err(RuntimeError::Timeout)));
    }
}
