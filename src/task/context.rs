use crate::error::{Result, RuntimeError};
use crate::runtime::Node;
use crate::task::{Action, Task};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

enum Recorded {
    Completed(Option<Box<dyn Any + Send>>),
    Failed(anyhow::Error),
}

/// The per-execution handle an [`Action`] receives while it runs.
///
/// A context is created fresh for each invocation, lives only for the
/// duration of that invocation, and is never shared across tasks. It lets
/// the action spawn nested work attributed to the same group as its parent,
/// and record the task's terminal outcome.
pub struct TaskContext {
    node: Arc<Node>,
    task: Arc<Task>,
    outcome: Option<Recorded>,
}

impl TaskContext {
    pub(crate) fn new(node: Arc<Node>, task: Arc<Task>) -> Self {
        Self {
            node,
            task,
            outcome: None,
        }
    }

    /// The task this context belongs to.
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    /// Spawns child work inheriting the parent task's priority and group
    /// membership. The child is scheduled immediately.
    pub fn spawn(&mut self, action: impl Into<Action>) -> Result<Arc<Task>> {
        self.node.submit(
            action.into(),
            self.task.priority(),
            self.task.group().cloned(),
        )
    }

    /// Records successful completion with a result value retrievable through
    /// [`Task::take_result`](crate::Task::take_result).
    ///
    /// # Panics
    ///
    /// Recording an outcome twice is a programming error and panics; the
    /// panic is captured by the executing worker and turns the task into
    /// [`RuntimeError::ActionFailed`].
    #[track_caller]
    pub fn complete<R: Any + Send>(&mut self, value: R) {
        assert!(self.outcome.is_none(), "task outcome recorded twice");
        self.outcome = Some(Recorded::Completed(Some(Box::new(value))));
    }

    /// Records failure with the given cause. Same exactly-once contract as
    /// [`TaskContext::complete`].
    #[track_caller]
    pub fn fail(&mut self, error: impl Into<anyhow::Error>) {
        assert!(self.outcome.is_none(), "task outcome recorded twice");
        self.outcome = Some(Recorded::Failed(error.into()));
    }

    /// Resolves the recorded outcome after the action has returned. A silent
    /// return counts as completion without a result value.
    pub(crate) fn into_outcome(self) -> (Result<()>, Option<Box<dyn Any + Send>>) {
        match self.outcome {
            None => (Ok(()), None),
            Some(Recorded::Completed(value)) => (Ok(()), value),
            Some(Recorded::Failed(error)) => (Err(RuntimeError::action_failed(error)), None),
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task", &self.task.id())
            .finish_non_exhaustive()
    }
}
