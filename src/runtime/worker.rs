use crate::core_set;
use crate::error::RuntimeError;
use crate::runtime::Node;
use crate::runtime::pool::StartGate;
use crate::task::{Task, TaskContext};
use crate::utils::thread as os_thread;
use anyhow::anyhow;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// One dispatch loop bound to one core.
pub(crate) struct Worker {
    index: usize,
    core: usize,
    name: String,
}

impl Worker {
    pub(crate) fn new(index: usize, core: usize, name: String) -> Self {
        Self { index, core, name }
    }

    pub(crate) fn run(&self, node: Arc<Node>, gate: Arc<StartGate>) {
        gate.wait_open();

        os_thread::set_current_thread_name(&self.name);
        core_set::pin_current_thread(self.core);
        tracing::debug!(worker = self.index, core = self.core, "worker online");

        let dispatch = Arc::clone(node.dispatch());
        loop {
            if let Some(task) = dispatch.claim() {
                self.run_task(&node, task);
            } else if dispatch.is_shutdown() {
                break;
            } else {
                dispatch.park_current();
            }
        }

        tracing::debug!(worker = self.index, "worker offline");
    }

    /// Runs a claimed task to completion. The action runs under an unwind
    /// guard: a panicking action fails its task, never the worker or the
    /// process.
    fn run_task(&self, node: &Arc<Node>, task: Arc<Task>) {
        tracing::trace!(task = %task.id(), worker = self.index, "task claimed");

        let Some(action) = task.take_action() else {
            debug_assert!(false, "claimed task has no action");
            node.finish_task(
                task,
                Err(RuntimeError::action_failed(anyhow!(
                    "task action was already consumed"
                ))),
                None,
            );
            return;
        };

        let mut ctx = TaskContext::new(Arc::clone(node), Arc::clone(&task));
        let unwound = panic::catch_unwind(AssertUnwindSafe(|| action.invoke(&mut ctx)));

        let (status, result) = match unwound {
            Ok(()) => ctx.into_outcome(),
            Err(payload) => {
                let message = panic_message(payload);
                tracing::warn!(task = %task.id(), message, "action panicked");
                (
                    Err(RuntimeError::action_failed(anyhow!(
                        "action panicked: {message}"
                    ))),
                    None,
                )
            }
        };

        tracing::trace!(task = %task.id(), ok = status.is_ok(), "task finished");
        node.finish_task(task, status, result);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
