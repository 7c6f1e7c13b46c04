use crate::continuation::Continuation;
use crate::error::{Resource, Result, RuntimeError};
use crate::group::Group;
use crate::queue::{Queue, QueueMode};
use crate::runtime::builder::NodeConfig;
use crate::runtime::dispatch::Dispatch;
use crate::runtime::pool::ThreadPool;
use crate::runtime::registry::{LiveTasks, SlotRegistry};
use crate::task::{Action, Task};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Priority given to tasks submitted without an explicit one. 0 is the most
/// urgent level.
const DEFAULT_TASK_PRIORITY: usize = 0;

/// The runtime: configuration, the worker pool, the dispatcher, and the
/// registries of live groups and queues.
///
/// A `Node` is an explicitly constructed handle shared by reference
/// counting; build one with [`Builder::build`](crate::Builder::build). The
/// process-wide singleton convenience ([`Node::initialize`],
/// [`Node::instance`], [`Node::finalize`]) layers a one-time-initialization
/// guard on top of the same type.
pub struct Node {
    cfg: NodeConfig,
    self_weak: Weak<Node>,

    dispatch: Arc<Dispatch>,
    live: LiveTasks,

    groups: SlotRegistry<Group>,
    queues: SlotRegistry<Queue>,

    pool: ThreadPool,
    stopped: AtomicBool,
}

impl Node {
    pub(crate) fn start(cfg: NodeConfig) -> Result<Arc<Node>> {
        let node = Arc::new_cyclic(|self_weak| Node {
            self_weak: self_weak.clone(),
            dispatch: Arc::new(Dispatch::new(cfg.max_priorities)),
            live: LiveTasks::new(cfg.max_tasks),
            groups: SlotRegistry::new(Resource::Groups, cfg.max_groups),
            queues: SlotRegistry::new(Resource::Queues, cfg.max_queues),
            pool: ThreadPool::default(),
            stopped: AtomicBool::new(false),
            cfg,
        });

        node.pool.spawn_workers(&node)?;

        tracing::info!(
            domain = node.cfg.domain_id,
            node = node.cfg.node_id,
            workers = node.cfg.worker_count,
            "runtime started"
        );
        Ok(node)
    }

    pub fn domain_id(&self) -> u32 {
        self.cfg.domain_id
    }

    pub fn node_id(&self) -> u32 {
        self.cfg.node_id
    }

    /// Number of worker threads, one per core in the configured set.
    pub fn worker_count(&self) -> usize {
        self.cfg.worker_count
    }

    /// Hardware threads reported by the machine, informational.
    pub fn hardware_concurrency(&self) -> usize {
        self.cfg.hardware_concurrency
    }

    /// Number of priority levels; valid priorities are `0..max_priorities`.
    pub fn max_priorities(&self) -> usize {
        self.cfg.max_priorities
    }

    /// Currently registered groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Currently registered queues.
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Live (scheduled or running) tasks.
    pub fn task_count(&self) -> usize {
        self.live.len()
    }

    pub(crate) fn config(&self) -> &NodeConfig {
        &self.cfg
    }

    pub(crate) fn dispatch(&self) -> &Arc<Dispatch> {
        &self.dispatch
    }

    /// Registers a new group. Fails with
    /// [`ResourceExhausted`](RuntimeError::ResourceExhausted) at the
    /// configured group limit.
    pub fn create_group(&self) -> Result<Arc<Group>> {
        let group = Group::new();
        self.groups.insert(Arc::clone(&group))?;
        tracing::debug!(group = %group.id(), "group created");
        Ok(group)
    }

    /// Unregisters a group, force-waiting for any outstanding members first,
    /// so a group never disappears out from under its in-flight tasks.
    /// No-op if the group was not (or is no longer) registered.
    pub fn destroy_group(&self, group: &Arc<Group>) {
        group.close();
        group.wait_all();
        if self
            .groups
            .remove_where(|g| g.id() == group.id())
            .is_some()
        {
            tracing::debug!(group = %group.id(), "group destroyed");
        }
    }

    /// Registers a new queue at `priority`. Fails with
    /// [`ResourceExhausted`](RuntimeError::ResourceExhausted) at the
    /// configured queue limit, or when `priority` is outside
    /// `0..max_priorities`.
    pub fn create_queue(&self, priority: usize, mode: QueueMode) -> Result<Arc<Queue>> {
        if priority >= self.cfg.max_priorities {
            return Err(RuntimeError::ResourceExhausted(Resource::Priorities));
        }

        let queue = Queue::new(priority, mode, self.cfg.queue_depth, self.self_weak.clone());
        self.queues.insert(Arc::clone(&queue))?;
        if queue.mode() == QueueMode::Ordered {
            self.dispatch.publish_queue(Arc::clone(&queue));
        }

        tracing::debug!(queue = %queue.id(), priority, ?mode, "queue created");
        Ok(queue)
    }

    /// Unregisters a queue. The handle is closed for further pushes; tasks
    /// still buffered are flushed into the standalone dispatch lane at the
    /// queue's priority, so nothing already submitted is lost. No-op if the
    /// queue was not (or is no longer) registered.
    pub fn destroy_queue(&self, queue: &Arc<Queue>) {
        let Some(queue) = self.queues.remove_where(|q| q.id() == queue.id()) else {
            return;
        };

        if queue.mode() == QueueMode::Ordered {
            self.dispatch.retract_queue(queue.id());
        }
        let leftover = queue.close();
        tracing::debug!(queue = %queue.id(), flushed = leftover.len(), "queue destroyed");
        for task in leftover {
            self.dispatch.inject(task);
        }
    }

    /// Creates and immediately schedules a standalone task at the default
    /// priority.
    pub fn spawn(&self, action: impl Into<Action>) -> Result<Arc<Task>> {
        self.submit(action.into(), DEFAULT_TASK_PRIORITY, None)
    }

    /// Like [`Node::spawn`] at an explicit priority.
    pub fn spawn_with_priority(
        &self,
        action: impl Into<Action>,
        priority: usize,
    ) -> Result<Arc<Task>> {
        if priority >= self.cfg.max_priorities {
            return Err(RuntimeError::ResourceExhausted(Resource::Priorities));
        }
        self.submit(action.into(), priority, None)
    }

    /// Like [`Node::spawn`], registering the task with `group` before it is
    /// scheduled.
    pub fn spawn_in_group(
        &self,
        group: &Arc<Group>,
        action: impl Into<Action>,
    ) -> Result<Arc<Task>> {
        self.submit(action.into(), DEFAULT_TASK_PRIORITY, Some(Arc::clone(group)))
    }

    /// Seeds a continuation chain. Nothing runs until
    /// [`Continuation::run`](crate::Continuation::run).
    pub fn first(&self, action: impl Into<Action>) -> Continuation {
        Continuation::first(
            self.self_weak.clone(),
            action.into(),
            DEFAULT_TASK_PRIORITY,
        )
    }

    /// Like [`Node::first`] at an explicit priority for the seed task.
    pub fn first_with_priority(&self, action: impl Into<Action>, priority: usize) -> Continuation {
        Continuation::first(self.self_weak.clone(), action.into(), priority)
    }

    /// Creates a task, accounts it live and registers group membership; the
    /// task is not yet scheduled.
    pub(crate) fn prepare_task(
        &self,
        action: Action,
        priority: usize,
        group: Option<Arc<Group>>,
    ) -> Result<Arc<Task>> {
        let task = Task::new(action, priority, group);
        self.live.insert(&task)?;
        if let Some(group) = task.group()
            && let Err(err) = group.try_register()
        {
            self.live.remove(task.id());
            return Err(err);
        }
        Ok(task)
    }

    /// Full standalone submission: prepare, mark scheduled, hand to the
    /// dispatcher.
    pub(crate) fn submit(
        &self,
        action: Action,
        priority: usize,
        group: Option<Arc<Group>>,
    ) -> Result<Arc<Task>> {
        let task = self.prepare_task(action, priority, group)?;
        task.mark_scheduled();
        self.dispatch.inject(Arc::clone(&task));
        Ok(task)
    }

    /// Schedules a continuation task whose predecessors all completed.
    ///
    /// Chain tasks are only accounted live at this point; if the task limit
    /// is hit now there is no caller to hand the error to, so the task is
    /// failed in place and the error propagates to its dependents.
    pub(crate) fn schedule_chain_task(&self, task: Arc<Task>) {
        match self.live.insert(&task) {
            Ok(()) => {
                task.mark_scheduled();
                self.dispatch.inject(task);
            }
            Err(err) => {
                tracing::warn!(task = %task.id(), %err, "could not schedule chain task");
                self.finish_task(
                    task,
                    Err(RuntimeError::action_failed(anyhow::anyhow!(
                        "could not schedule: {err}"
                    ))),
                    None,
                );
            }
        }
    }

    /// Terminal fan-out for a task: records the outcome, wakes task waiters,
    /// counts the task out of its group, unblocks or poisons chain
    /// successors, and releases the live-task slot.
    ///
    /// Poisoned dependents are finished through the same worklist, so a
    /// failure propagates through an arbitrarily deep chain without
    /// recursion.
    pub(crate) fn finish_task(
        &self,
        task: Arc<Task>,
        status: Result<()>,
        result: Option<Box<dyn Any + Send>>,
    ) {
        let mut pending = vec![(task, status, result)];

        while let Some((task, status, result)) = pending.pop() {
            let failed = status.is_err();
            task.finish(status, result);

            if let Some(group) = task.group() {
                if let Err(err) = group.complete_one(&task) {
                    tracing::error!(task = %task.id(), %err, "group completion fault");
                    debug_assert!(false, "completed a task that is not a group member");
                }
            }

            if let Some((chain, index)) = task.chain_binding() {
                let wake = chain.on_node_done(*index, failed);
                for ready in wake.ready {
                    self.schedule_chain_task(ready);
                }
                for poisoned in wake.poisoned {
                    pending.push((poisoned, Err(RuntimeError::DependencyFailed), None));
                }
            }

            self.live.remove(task.id());
        }
    }

    /// Stops the runtime: waits for live tasks to drain, closes submission,
    /// tears down the remaining queues and groups (complete, unspecified
    /// order) and joins the worker pool. Idempotent.
    ///
    /// Must be called from outside the worker pool; a task waiting for its
    /// own runtime to drain would deadlock.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::info!(
            domain = self.cfg.domain_id,
            node = self.cfg.node_id,
            "runtime shutting down"
        );

        self.live.wait_drained();
        self.live.close();

        for queue in self.queues.drain() {
            if queue.mode() == QueueMode::Ordered {
                self.dispatch.retract_queue(queue.id());
            }
            let leftover = queue.close();
            debug_assert!(leftover.is_empty(), "drained runtime had buffered tasks");
        }

        for group in self.groups.drain() {
            debug_assert!(
                group.pending() == 0,
                "drained runtime had outstanding group members"
            );
        }

        self.dispatch.begin_shutdown();
        if let Err(err) = self.pool.join_all() {
            tracing::error!(%err, "worker pool teardown failed");
            debug_assert!(false, "worker pool teardown failed");
        }

        tracing::info!("runtime stopped");
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("domain_id", &self.cfg.domain_id)
            .field("node_id", &self.cfg.node_id)
            .field("workers", &self.cfg.worker_count)
            .field("live_tasks", &self.live.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Node: Send, Sync);
}
