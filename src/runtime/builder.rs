use crate::core_set::{CoreSet, hardware_concurrency};
use crate::error::Result;
use crate::runtime::Node;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default ceiling on concurrently live (scheduled or running) tasks.
const MAX_TASKS: usize = 256;

/// Default ceiling on simultaneously registered groups.
const MAX_GROUPS: usize = 64;

/// Default ceiling on simultaneously registered queues.
const MAX_QUEUES: usize = 16;

/// Default per-queue buffer capacity.
const QUEUE_DEPTH: usize = 64;

/// Default number of scheduling priority levels. Priority 0 is the most
/// urgent; levels run `0..max_priorities`.
const MAX_PRIORITIES: usize = 4;

#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn() -> String + Send + Sync + 'static>);

fn default_thread_name_fn() -> ThreadNameFn {
    let worker_count = Arc::new(AtomicUsize::new(0));

    ThreadNameFn(Arc::new(move || {
        let id = worker_count.fetch_add(1, Ordering::Relaxed);
        format!("rondo-{}", id)
    }))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The closure itself isn't printable.
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Configures and constructs a runtime [`Node`].
///
/// Every knob has a sensible default; a bare `Builder::new().build(1, 1)`
/// produces a runtime with one worker per hardware core. For the common
/// process-wide singleton use, see [`Node::initialize`] and
/// [`Node::initialize_with`], which drive this builder internally.
#[derive(Debug)]
pub struct Builder {
    /// Cores the workers may run on; one worker per contained core.
    core_set: Option<CoreSet>,

    max_tasks: usize,
    max_groups: usize,
    max_queues: usize,
    queue_depth: usize,
    max_priorities: usize,

    /// Name fn used for threads spawned by the runtime.
    thread_name: ThreadNameFn,

    /// Stack size used for threads spawned by the runtime.
    thread_stack_size: Option<usize>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            core_set: None,
            max_tasks: MAX_TASKS,
            max_groups: MAX_GROUPS,
            max_queues: MAX_QUEUES,
            queue_depth: QUEUE_DEPTH,
            max_priorities: MAX_PRIORITIES,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
        }
    }

    /// Restricts workers to the given cores. Worker count equals the set's
    /// cardinality; each worker is pinned to its core at startup.
    ///
    /// Defaults to every core the hardware reports.
    pub fn core_set(mut self, val: CoreSet) -> Self {
        self.core_set = Some(val);
        self
    }

    /// Ceiling on concurrently live (scheduled or running) tasks.
    #[track_caller]
    pub fn max_tasks(mut self, val: usize) -> Self {
        assert!(val > 0, "max_tasks must be greater than 0");
        self.max_tasks = val;
        self
    }

    /// Ceiling on simultaneously registered groups.
    #[track_caller]
    pub fn max_groups(mut self, val: usize) -> Self {
        assert!(val > 0, "max_groups must be greater than 0");
        self.max_groups = val;
        self
    }

    /// Ceiling on simultaneously registered queues.
    #[track_caller]
    pub fn max_queues(mut self, val: usize) -> Self {
        assert!(val > 0, "max_queues must be greater than 0");
        self.max_queues = val;
        self
    }

    /// Per-queue buffer capacity. A push beyond this depth fails with
    /// [`QueueFull`](crate::RuntimeError::QueueFull).
    #[track_caller]
    pub fn queue_depth(mut self, val: usize) -> Self {
        assert!(val > 0, "queue_depth must be greater than 0");
        self.queue_depth = val;
        self
    }

    /// Number of priority levels, `0..val`, with 0 the most urgent.
    #[track_caller]
    pub fn max_priorities(mut self, val: usize) -> Self {
        assert!(val > 0, "max_priorities must be greater than 0");
        self.max_priorities = val;
        self
    }

    /// Sets the name for threads spawned by the runtime's worker pool.
    ///
    /// The default name is "rondo-{id}", with id monotonically increasing.
    /// Names are truncated beyond 15 bytes per pthread limitations.
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = ThreadNameFn(Arc::new(move || val.clone()));
        self
    }

    /// Sets a function used to generate worker thread names.
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    /// Sets the stack size (in bytes) for worker threads. The platform may
    /// round this up to its minimum.
    #[track_caller]
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        assert!(
            val.is_power_of_two(),
            "thread_stack_size must be a power of two"
        );
        self.thread_stack_size = Some(val);
        self
    }

    /// Builds a running [`Node`] with the configured attributes: workers are
    /// spawned, pinned and ready to dispatch before this returns.
    ///
    /// The returned handle is independent of the process-wide slot managed
    /// by [`Node::initialize`]; call [`Node::shutdown`] on it when done.
    pub fn build(self, domain_id: u32, node_id: u32) -> Result<Arc<Node>> {
        Node::start(NodeConfig::new(self, domain_id, node_id))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// The builder, resolved: immutable attributes shared by the node, the
/// dispatcher and every worker.
#[derive(Debug, Clone)]
pub(crate) struct NodeConfig {
    pub(crate) domain_id: u32,
    pub(crate) node_id: u32,
    pub(crate) core_set: CoreSet,
    pub(crate) worker_count: usize,
    pub(crate) hardware_concurrency: usize,
    pub(crate) max_tasks: usize,
    pub(crate) max_groups: usize,
    pub(crate) max_queues: usize,
    pub(crate) queue_depth: usize,
    pub(crate) max_priorities: usize,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
}

impl NodeConfig {
    fn new(builder: Builder, domain_id: u32, node_id: u32) -> Self {
        let core_set = builder.core_set.unwrap_or_default();

        NodeConfig {
            domain_id,
            node_id,
            core_set,
            worker_count: core_set.count(),
            hardware_concurrency: hardware_concurrency(),
            max_tasks: builder.max_tasks,
            max_groups: builder.max_groups,
            max_queues: builder.max_queues,
            queue_depth: builder.queue_depth,
            max_priorities: builder.max_priorities,
            thread_name: builder.thread_name,
            thread_stack_size: builder.thread_stack_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    // Cloned and sent into every spawned worker thread.
    assert_impl_all!(NodeConfig: Send, Sync, Clone);

    #[test]
    fn test_defaults_derive_worker_count_from_core_set() {
        let cfg = NodeConfig::new(Builder::new(), 1, 2);
        assert_eq!(cfg.domain_id, 1);
        assert_eq!(cfg.node_id, 2);
        assert_eq!(cfg.worker_count, cfg.core_set.count());
        assert!(cfg.worker_count >= 1);
    }

    #[test]
    #[should_panic(expected = "max_priorities must be greater than 0")]
    fn test_zero_priorities_rejected() {
        let _ = Builder::new().max_priorities(0);
    }

    #[test]
    fn test_thread_name_fn_increments() {
        let cfg = NodeConfig::new(Builder::new(), 1, 1);
        assert_eq!((cfg.thread_name.0)(), "rondo-0");
        assert_eq!((cfg.thread_name.0)(), "rondo-1");
    }
}
