use crate::core_set::CoreSet;
use crate::runtime::{Builder, Node};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;

/// Serializes tests that touch the process-wide runtime slot; everything
/// else should build explicit nodes and run in parallel.
static GLOBAL_SLOT_LOCK: Mutex<()> = Mutex::new(());

pub(crate) fn global_slot_guard() -> MutexGuard<'static, ()> {
    GLOBAL_SLOT_LOCK.lock()
}

/// Routes runtime logs into the test harness, honoring `RUST_LOG`.
pub(crate) fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A runtime with a single worker: execution order equals claim order, which
/// makes ordering assertions deterministic.
pub(crate) fn single_worker_node() -> Arc<Node> {
    small_builder().core_set(CoreSet::first(1)).build(1, 1).unwrap()
}

/// A runtime with two workers for tests that need actual parallelism.
pub(crate) fn two_worker_node() -> Arc<Node> {
    small_builder().core_set(CoreSet::first(2)).build(1, 1).unwrap()
}

/// Small limits so exhaustion tests stay cheap.
pub(crate) fn small_builder() -> Builder {
    Builder::new()
        .max_tasks(64)
        .max_groups(4)
        .max_queues(4)
        .queue_depth(4)
        .max_priorities(3)
}

/// A reusable open/close latch for holding actions (and thereby workers) in
/// place until the test is ready.
#[derive(Default)]
pub(crate) struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn open(&self) {
        let mut open = self.open.lock();
        *open = true;
        self.changed.notify_all();
    }

    pub(crate) fn wait_open(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.changed.wait(&mut open);
        }
    }
}
