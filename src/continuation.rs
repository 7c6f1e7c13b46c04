use crate::error::{Result, RuntimeError};
use crate::runtime::Node;
use crate::task::{Action, Task};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

struct ChainNode {
    task: Arc<Task>,

    /// Predecessors that have not yet reached a terminal state.
    pending: usize,

    /// Set when any predecessor failed; the node then terminates as
    /// `DependencyFailed` instead of being scheduled.
    poisoned: bool,

    successors: SmallVec<[u32; 4]>,
}

struct ChainInner {
    nodes: Vec<ChainNode>,
    started: bool,
}

/// Tasks a finished chain node has made eligible: `ready` ones get scheduled,
/// `poisoned` ones terminate as `DependencyFailed` without running.
#[derive(Default)]
pub(crate) struct WakeSet {
    pub(crate) ready: SmallVec<[Arc<Task>; 4]>,
    pub(crate) poisoned: SmallVec<[Arc<Task>; 4]>,
}

/// The dependency graph behind a family of [`Continuation`] handles.
///
/// Nodes live in an index-addressed arena; edges are successor index lists
/// plus a pending-predecessor count per node. All mutation happens under one
/// mutex, which is touched only at build time and once per node completion.
pub(crate) struct ChainShared {
    node: Weak<Node>,
    inner: Mutex<ChainInner>,
}

impl ChainShared {
    /// Called from the completion fan-out when the chain task at `index`
    /// reached a terminal state. Returns the directly unblocked successors;
    /// transitive failure propagation happens as the poisoned tasks are
    /// themselves finished.
    pub(crate) fn on_node_done(&self, index: u32, failed: bool) -> WakeSet {
        let mut inner = self.inner.lock();
        let successors = inner.nodes[index as usize].successors.clone();

        let mut wake = WakeSet::default();
        for succ in successors {
            let node = &mut inner.nodes[succ as usize];
            debug_assert!(node.pending > 0, "chain predecessor count underflow");
            node.pending -= 1;
            if failed {
                node.poisoned = true;
            }

            if node.pending == 0 {
                if node.poisoned {
                    wake.poisoned.push(Arc::clone(&node.task));
                } else {
                    wake.ready.push(Arc::clone(&node.task));
                }
            }
        }
        wake
    }
}

/// A handle to one node of a dependency chain.
///
/// Building a chain is pure graph construction: no task runs until the chain
/// is explicitly started with [`Continuation::run`]. A successor becomes
/// eligible only once every one of its predecessors completed; if any
/// predecessor failed, the successor (and transitively everything after it)
/// terminates as [`RuntimeError::DependencyFailed`] without its action ever
/// running.
#[derive(Clone)]
pub struct Continuation {
    chain: Arc<ChainShared>,
    index: u32,
}

impl Continuation {
    pub(crate) fn first(node: Weak<Node>, action: Action, priority: usize) -> Self {
        let task = Task::new(action, priority, None);
        let chain = Arc::new(ChainShared {
            node,
            inner: Mutex::new(ChainInner {
                nodes: vec![ChainNode {
                    task: Arc::clone(&task),
                    pending: 0,
                    poisoned: false,
                    successors: SmallVec::new(),
                }],
                started: false,
            }),
        });
        task.bind_chain(Arc::clone(&chain), 0);

        Self { chain, index: 0 }
    }

    /// Appends a successor that becomes eligible once this node's task
    /// completes. The successor inherits this node's priority.
    ///
    /// # Panics
    ///
    /// Extending a chain after [`Continuation::run`] is a programming error
    /// and panics: a partially-built chain racing its own execution has no
    /// sound meaning.
    #[track_caller]
    pub fn then(&self, action: impl Into<Action>) -> Continuation {
        let priority = self.task().priority();
        self.then_with_priority(action, priority)
    }

    /// Like [`Continuation::then`] with an explicit priority for the
    /// successor task.
    #[track_caller]
    pub fn then_with_priority(&self, action: impl Into<Action>, priority: usize) -> Continuation {
        let mut inner = self.chain.inner.lock();
        assert!(
            !inner.started,
            "cannot extend a continuation chain after run()"
        );

        let task = Task::new(action.into(), priority, None);
        let index = u32::try_from(inner.nodes.len()).expect("continuation chain too large");
        task.bind_chain(Arc::clone(&self.chain), index);

        inner.nodes.push(ChainNode {
            task,
            pending: 1,
            poisoned: false,
            successors: SmallVec::new(),
        });
        inner.nodes[self.index as usize].successors.push(index);

        Continuation {
            chain: Arc::clone(&self.chain),
            index,
        }
    }

    /// The task backing this chain node.
    pub fn task(&self) -> Arc<Task> {
        Arc::clone(&self.chain.inner.lock().nodes[self.index as usize].task)
    }

    /// Starts the chain: every node without predecessors is scheduled, and
    /// the rest follow as their predecessors complete.
    ///
    /// # Panics
    ///
    /// Starting a chain twice is a programming error and panics.
    #[track_caller]
    pub fn run(&self) -> Result<()> {
        let node = self.chain.node.upgrade().ok_or(RuntimeError::NotInitialized)?;

        let roots: Vec<Arc<Task>> = {
            let mut inner = self.chain.inner.lock();
            assert!(!inner.started, "continuation chain started twice");
            inner.started = true;

            inner
                .nodes
                .iter()
                .filter(|n| n.pending == 0)
                .map(|n| Arc::clone(&n.task))
                .collect()
        };

        for task in roots {
            node.schedule_chain_task(task);
        }
        Ok(())
    }

    /// Convenience for [`Continuation::run`] followed by waiting on this
    /// node's own task.
    pub fn run_and_wait(&self) -> Result<()> {
        self.run()?;
        self.wait()
    }

    /// Waits for this node's task; see [`Task::wait`](crate::Task::wait).
    pub fn wait(&self) -> Result<()> {
        self.task().wait()
    }

    /// Waits with a deadline; see [`Task::wait_for`](crate::Task::wait_for).
    pub fn wait_for(&self, timeout: Duration) -> Result<()> {
        self.task().wait_for(timeout)
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.chain.inner.lock();
        f.debug_struct("Continuation")
            .field("index", &self.index)
            .field("chain_len", &inner.nodes.len())
            .field("started", &inner.started)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Continuation: Send, Sync, Clone);
}
