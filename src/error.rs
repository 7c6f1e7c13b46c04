use std::fmt;
use std::sync::Arc;

/// The resource class whose configured limit was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Tasks,
    Groups,
    Queues,
    Priorities,
    Workers,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Tasks => "task",
            Resource::Groups => "group",
            Resource::Queues => "queue",
            Resource::Priorities => "priority",
            Resource::Workers => "worker",
        };
        f.write_str(name)
    }
}

/// Everything that can go wrong talking to the runtime.
///
/// Lifecycle and configuration violations (`AlreadyInitialized`,
/// `NotInitialized`, `ResourceExhausted`) are returned synchronously from the
/// call that triggered them. `ActionFailed` and `DependencyFailed` are
/// terminal task outcomes: they are captured while the task runs and become
/// visible only to waiters inspecting that task.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime is already initialized")]
    AlreadyInitialized,

    #[error("runtime is not initialized")]
    NotInitialized,

    #[error("{0} limit reached")]
    ResourceExhausted(Resource),

    #[error("queue is at capacity")]
    QueueFull,

    #[error("queue has been destroyed")]
    QueueClosed,

    #[error("group has been destroyed")]
    GroupClosed,

    #[error("timed out before completion")]
    Timeout,

    #[error("task is not a member of this group")]
    NotAMember,

    /// A predecessor of this task failed, so its action never ran.
    #[error("a dependency of this task failed")]
    DependencyFailed,

    /// The task's action reported an error, panicked, or was withdrawn.
    ///
    /// The cause is shared so that every waiter on the task can observe it.
    #[error("action failed: {0}")]
    ActionFailed(Arc<anyhow::Error>),
}

impl RuntimeError {
    pub(crate) fn action_failed(cause: anyhow::Error) -> Self {
        RuntimeError::ActionFailed(Arc::new(cause))
    }
}

pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(RuntimeError: Send, Sync, Clone);

    #[test]
    fn test_display_includes_resource() {
        let err = RuntimeError::ResourceExhausted(Resource::Queues);
        assert_eq!(err.to_string(), "queue limit reached");
    }
}
