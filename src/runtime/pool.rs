use crate::error::{Resource, Result, RuntimeError};
use crate::runtime::Node;
use crate::runtime::worker::Worker;
use anyhow::anyhow;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;

/// Holds every spawned worker back until the whole pool is up, then releases
/// them together. Unlike a barrier this stays safe when a later spawn fails:
/// opening the gate after flagging shutdown lets the early workers run,
/// observe the flag and exit, instead of waiting forever on peers that never
/// came up.
pub(crate) struct StartGate {
    open: Mutex<bool>,
    released: Condvar,
}

impl StartGate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(false),
            released: Condvar::new(),
        })
    }

    fn open(&self) {
        let mut open = self.open.lock();
        *open = true;
        self.released.notify_all();
    }

    pub(crate) fn wait_open(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.released.wait(&mut open);
        }
    }
}

/// The fixed pool of worker threads, one per core in the configured set.
#[derive(Default)]
pub(crate) struct ThreadPool {
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ThreadPool {
    /// Spawns, names and pins one worker per core. Returns once every worker
    /// is running its dispatch loop.
    pub(crate) fn spawn_workers(&self, node: &Arc<Node>) -> Result<()> {
        let cfg = node.config();
        let gate = StartGate::new();
        let mut handles = self.handles.lock();

        for (index, core) in cfg.core_set.iter().enumerate() {
            let worker_node = Arc::clone(node);
            let worker_gate = Arc::clone(&gate);
            let name = (cfg.thread_name.0)();

            let mut builder = thread::Builder::new();
            if let Some(size) = cfg.thread_stack_size {
                builder = builder.stack_size(size);
            }

            let spawned = builder.spawn(move || {
                let worker = Worker::new(index, core, name);
                worker.run(worker_node, worker_gate);
            });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    tracing::error!(worker = index, %err, "failed to spawn worker thread");

                    // Let the workers that did come up drain out and join
                    // them before reporting the failure.
                    node.dispatch().begin_shutdown();
                    gate.open();
                    for handle in handles.drain(..) {
                        let _ = handle.join();
                    }
                    return Err(RuntimeError::ResourceExhausted(Resource::Workers));
                }
            }
        }

        drop(handles);
        gate.open();
        Ok(())
    }

    /// Joins every worker; fails if any of them panicked.
    pub(crate) fn join_all(&self) -> anyhow::Result<()> {
        let mut handles = self.handles.lock();

        let panicked = handles
            .drain(..)
            .filter_map(|handle| handle.join().err())
            .count();

        if panicked == 0 {
            Ok(())
        } else {
            Err(anyhow!("{} worker thread(s) panicked", panicked))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(ThreadPool: Send, Sync);
    assert_impl_all!(StartGate: Send, Sync);
}
