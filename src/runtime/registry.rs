use crate::error::{Resource, Result, RuntimeError};
use crate::task::{Task, TaskId};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, MutexGuard};
use slab::Slab;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

/// How many times to spin on a registry lock before ceding the processor.
const LOCK_SPIN_LIMIT: usize = 1024;

/// A bounded arena of shared handles (groups or queues), guarded by a mutex
/// that is only ever taken for create/destroy.
///
/// Acquisition spins with a bounded retry and cooperative yield instead of
/// blocking indefinitely: registry mutation must never priority-invert the
/// dispatch path, which itself reads only already-published `Arc` references
/// and never takes this lock.
pub(crate) struct SlotRegistry<T> {
    resource: Resource,
    capacity: usize,
    slots: Mutex<Slab<Arc<T>>>,
}

impl<T> SlotRegistry<T> {
    pub(crate) fn new(resource: Resource, capacity: usize) -> Self {
        Self {
            resource,
            capacity,
            slots: Mutex::new(Slab::with_capacity(capacity)),
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, Slab<Arc<T>>> {
        loop {
            for _ in 0..LOCK_SPIN_LIMIT {
                if let Some(guard) = self.slots.try_lock() {
                    return guard;
                }
                std::hint::spin_loop();
            }
            thread::yield_now();
        }
    }

    pub(crate) fn insert(&self, item: Arc<T>) -> Result<()> {
        let mut slots = self.lock_slots();
        if slots.len() >= self.capacity {
            return Err(RuntimeError::ResourceExhausted(self.resource));
        }
        slots.insert(item);
        Ok(())
    }

    /// Removes and returns the first entry matching `pred`; `None` if no
    /// entry matches.
    pub(crate) fn remove_where(&self, pred: impl Fn(&Arc<T>) -> bool) -> Option<Arc<T>> {
        let mut slots = self.lock_slots();
        let key = slots.iter().find(|(_, entry)| pred(entry)).map(|(k, _)| k)?;
        Some(slots.remove(key))
    }

    pub(crate) fn len(&self) -> usize {
        self.lock_slots().len()
    }

    /// Empties the registry, handing back every entry for teardown.
    pub(crate) fn drain(&self) -> Vec<Arc<T>> {
        self.lock_slots().drain().collect()
    }
}

/// Every task the runtime currently owns: inserted when scheduled, removed on
/// terminal transition. Enforces the configured task limit and lets teardown
/// wait for in-flight work to drain.
pub(crate) struct LiveTasks {
    limit: usize,

    tasks: DashMap<TaskId, Arc<Task>>,

    // Tracked separately because DashMap's len iterates all shards.
    size: AtomicUsize,

    /// Set once teardown finished draining; rejects any further inserts.
    closed: AtomicBool,

    drain_lock: Mutex<()>,
    drained: Condvar,
}

impl LiveTasks {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            tasks: DashMap::with_capacity(limit.min(1024)),
            size: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            drain_lock: Mutex::new(()),
            drained: Condvar::new(),
        }
    }

    pub(crate) fn insert(&self, task: &Arc<Task>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RuntimeError::NotInitialized);
        }

        let prev = self.size.fetch_add(1, Ordering::AcqRel);
        if prev >= self.limit {
            self.size.fetch_sub(1, Ordering::AcqRel);
            return Err(RuntimeError::ResourceExhausted(Resource::Tasks));
        }

        let replaced = self.tasks.insert(task.id(), Arc::clone(task));
        debug_assert!(replaced.is_none(), "task inserted twice");
        Ok(())
    }

    pub(crate) fn remove(&self, id: TaskId) {
        if self.tasks.remove(&id).is_some() {
            let prev = self.size.fetch_sub(1, Ordering::AcqRel);
            if prev == 1 {
                // Wake drain waiters under the lock so they cannot observe a
                // non-zero count and block after our notification.
                let _guard = self.drain_lock.lock();
                self.drained.notify_all();
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Blocks until no live task remains.
    pub(crate) fn wait_drained(&self) {
        let mut guard = self.drain_lock.lock();
        while self.size.load(Ordering::Acquire) > 0 {
            self.drained.wait(&mut guard);
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Action;
    use static_assertions::assert_impl_all;

    assert_impl_all!(SlotRegistry<crate::Group>: Send, Sync);
    assert_impl_all!(LiveTasks: Send, Sync);

    #[test]
    fn test_slot_registry_enforces_capacity() {
        let registry = SlotRegistry::new(Resource::Groups, 2);
        registry.insert(Arc::new(1u32)).unwrap();
        registry.insert(Arc::new(2u32)).unwrap();

        let overflow = registry.insert(Arc::new(3u32));
        assert!(matches!(
            overflow,
            Err(RuntimeError::ResourceExhausted(Resource::Groups))
        ));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_slot_registry_remove_frees_capacity() {
        let registry = SlotRegistry::new(Resource::Queues, 1);
        registry.insert(Arc::new(7u32)).unwrap();

        assert!(registry.remove_where(|v| **v == 7).is_some());
        assert!(registry.remove_where(|v| **v == 7).is_none());
        assert!(registry.insert(Arc::new(8u32)).is_ok());
    }

    #[test]
    fn test_live_tasks_limit_and_drain() {
        let live = LiveTasks::new(1);
        let first = Task::new(Action::new(|_| {}), 0, None);
        let second = Task::new(Action::new(|_| {}), 0, None);

        live.insert(&first).unwrap();
        assert!(matches!(
            live.insert(&second),
            Err(RuntimeError::ResourceExhausted(Resource::Tasks))
        ));

        live.remove(first.id());
        assert_eq!(live.len(), 0);
        live.wait_drained();

        live.close();
        assert!(matches!(
            live.insert(&second),
            Err(RuntimeError::NotInitialized)
        ));
    }
}
