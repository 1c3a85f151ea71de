//! Iteration strategies decide whether the loop may invoke the model again.

/// Consulted before every model invocation.
pub trait IterationStrategy: Send + Sync {
    /// `invocations` is how many model calls this run already made.
    fn should_continue(&self, invocations: usize) -> bool;
}

/// Cap the number of model invocations per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxIterations(pub usize);

impl Default for MaxIterations {
    fn default() -> Self {
        Self(10)
    }
}

impl IterationStrategy for MaxIterations {
    fn should_continue(&self, invocations: usize) -> bool {
        invocations < self.0
    }
}

impl<F> IterationStrategy for F
where
    F: Fn(usize) -> bool + Send + Sync,
{
    fn should_continue(&self, invocations: usize) -> bool {
        self(invocations)
    }
}
