use crate::task::TaskContext;
use std::fmt;

/// A type-erased, one-shot unit of user work.
///
/// An action owns its captured state and is consumed exactly once when the
/// dispatcher invokes it. The closure receives a fresh [`TaskContext`] for
/// the duration of the call; returning without recording an outcome counts
/// as successful completion with no result value.
pub struct Action {
    f: Box<dyn FnOnce(&mut TaskContext) + Send + 'static>,
}

impl Action {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(&mut TaskContext) + Send + 'static,
    {
        Self { f: Box::new(f) }
    }

    pub(crate) fn invoke(self, ctx: &mut TaskContext) {
        (self.f)(ctx)
    }
}

impl<F> From<F> for Action
where
    F: FnOnce(&mut TaskContext) + Send + 'static,
{
    fn from(f: F) -> Self {
        Action::new(f)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The closure itself is not printable.
        f.debug_tuple("Action").field(&"<closure>").finish()
    }
}
