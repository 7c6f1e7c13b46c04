//! A user-level multicore task scheduling runtime.
//!
//! Work is submitted as one-shot [`Action`]s, wrapped into [`Task`]s and
//! dispatched across a fixed pool of core-pinned worker threads. Ordering is
//! controlled three ways: priority [`Queue`]s (lower value = more urgent,
//! optionally FIFO-ordered per queue), [`Group`]s for bulk completion
//! waiting, and [`Continuation`] chains for predecessor-before-successor
//! dependencies. The [`Node`] owns workers, limits and registries; use it
//! either as an explicit handle from [`Builder::build`] or through the
//! process-wide [`Node::initialize`] / [`Node::instance`] / [`Node::finalize`]
//! lifecycle.

mod error;
pub use error::{Resource, Result, RuntimeError};

mod core_set;
pub use core_set::{CoreSet, hardware_concurrency};

mod group;
pub use group::Group;

mod queue;
pub use queue::{Queue, QueueMode};

mod continuation;
pub use continuation::Continuation;

pub mod runtime;
pub use runtime::{Builder, Node};

pub mod task;
pub use task::{Action, Task, TaskContext, TaskId, TaskState};

mod utils;

#[cfg(test)]
mod test_utils;
