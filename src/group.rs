use crate::error::{Result, RuntimeError};
use crate::task::{GroupId, Task};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Default)]
struct GroupInner {
    /// Terminal members not yet consumed by a [`Group::wait_any`] caller.
    finished: VecDeque<Arc<Task>>,
}

/// A cohort of in-flight tasks sharing a lifecycle.
///
/// Tasks are registered before they are scheduled and counted out as they
/// reach a terminal state; `wait_all` blocks until the outstanding count hits
/// zero. The decrement and the "last member" check are a single atomic step,
/// so exactly one completion performs the final wakeup.
pub struct Group {
    id: GroupId,
    outstanding: AtomicUsize,
    inner: Mutex<GroupInner>,
    members_done: Condvar,

    /// Set on destruction; a closed group accepts no new members.
    closed: AtomicBool,
}

impl Group {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: GroupId::next(),
            outstanding: AtomicUsize::new(0),
            inner: Mutex::new(GroupInner::default()),
            members_done: Condvar::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn id(&self) -> GroupId {
        self.id
    }

    /// Number of members that have not yet reached a terminal state.
    pub fn pending(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Counts a task in. Called exactly once per member, always before the
    /// task is scheduled. Fails with [`RuntimeError::GroupClosed`] once the
    /// group has been destroyed.
    pub(crate) fn try_register(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RuntimeError::GroupClosed);
        }
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Closes the group for further membership; existing members are
    /// unaffected.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Counts a member out on terminal transition and wakes waiters.
    ///
    /// Completing a task that is not currently a member would underflow the
    /// membership count; that is a programming error surfaced as
    /// [`RuntimeError::NotAMember`] instead of being silently ignored.
    pub(crate) fn complete_one(&self, task: &Arc<Task>) -> Result<()> {
        let prev = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            // Underflow: restore the counter before reporting the fault.
            self.outstanding.fetch_add(1, Ordering::AcqRel);
            return Err(RuntimeError::NotAMember);
        }

        // The notify must happen under the mutex so a waiter cannot check the
        // counter and block between our decrement and our wakeup.
        let mut inner = self.inner.lock();
        inner.finished.push_back(Arc::clone(task));
        self.members_done.notify_all();
        Ok(())
    }

    /// Blocks until every current member has reached a terminal state.
    ///
    /// Safe to call from multiple waiters concurrently; returns immediately
    /// if all members already terminated. Calling this from inside an action
    /// can deadlock a fully-busy worker pool; actions that need to wait on
    /// other work should spawn children via
    /// [`TaskContext::spawn`](crate::TaskContext::spawn) instead.
    pub fn wait_all(&self) {
        let mut inner = self.inner.lock();
        while self.outstanding.load(Ordering::Acquire) > 0 {
            self.members_done.wait(&mut inner);
        }
    }

    /// Like [`Group::wait_all`] with a deadline; fails with
    /// [`RuntimeError::Timeout`] if members are still outstanding when it
    /// expires.
    pub fn wait_all_for(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();

        while self.outstanding.load(Ordering::Acquire) > 0 {
            if self
                .members_done
                .wait_until(&mut inner, deadline)
                .timed_out()
            {
                if self.outstanding.load(Ordering::Acquire) == 0 {
                    return Ok(());
                }
                return Err(RuntimeError::Timeout);
            }
        }
        Ok(())
    }

    /// Blocks until any member reaches a terminal state and returns it.
    ///
    /// Each terminal member is handed out exactly once across all
    /// `wait_any` callers. Returns `None` once no member is outstanding and
    /// every finished member has been consumed.
    pub fn wait_any(&self) -> Option<Arc<Task>> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(task) = inner.finished.pop_front() {
                return Some(task);
            }
            if self.outstanding.load(Ordering::Acquire) == 0 {
                return None;
            }
            self.members_done.wait(&mut inner);
        }
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Action;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Group: Send, Sync);

    fn terminal_task() -> Arc<Task> {
        let task = Task::new(Action::new(|_| {}), 0, None);
        task.mark_scheduled();
        assert!(task.claim());
        task.finish(Ok(()), None);
        task
    }

    #[test]
    fn test_wait_all_returns_immediately_when_empty() {
        let group = Group::new();
        group.wait_all();
        assert_eq!(group.pending(), 0);
    }

    #[test]
    fn test_complete_without_member_is_not_a_member() {
        let group = Group::new();
        let task = terminal_task();

        let completed = group.complete_one(&task);
        assert!(matches!(completed, Err(RuntimeError::NotAMember)));
        assert_eq!(group.pending(), 0, "count must not underflow");
    }

    #[test]
    fn test_wait_any_consumes_each_member_once() {
        let group = Group::new();
        group.try_register().unwrap();
        group.try_register().unwrap();

        let first = terminal_task();
        let second = terminal_task();
        group.complete_one(&first).unwrap();
        group.complete_one(&second).unwrap();

        assert_eq!(group.wait_any().unwrap().id(), first.id());
        assert_eq!(group.wait_any().unwrap().id(), second.id());
        assert!(group.wait_any().is_none());
    }

    #[test]
    fn test_wait_all_for_times_out_with_outstanding_member() {
        let group = Group::new();
        group.try_register().unwrap();

        let waited = group.wait_all_for(Duration::from_millis(20));
        assert!(matches!(waited, Err(RuntimeError::Timeout)));
    }

    #[test]
    fn test_closed_group_rejects_new_members() {
        let group = Group::new();
        group.close();

        let registered = group.try_register();
        assert!(matches!(registered, Err(RuntimeError::GroupClosed)));
    }
}
