//! Blocking pipeline executor.
//!
//! Middleware execute in the order they were added; every step is
//! expected to forward to its continuation, and the flow has no return
//! value. Each step type is resolved freshly at the moment its turn
//! comes, and owned instances are released as the call stack unwinds —
//! strictly after everything the step triggered downstream has
//! finished.

use std::sync::Arc;

use tracing::{debug, instrument};

use middleware::{
    Contract, FlowError, Middleware, Next, ReleaseMode, Resolved, Resolver, StepType,
};

use crate::error::ConfigError;
use crate::flow::StepList;

/// A blocking middleware pipeline over parameters of type `P`.
///
/// Configure with [`add`](Self::add)/[`add_type`](Self::add_type), then
/// call [`execute`](Self::execute) any number of times; the configured
/// definition is never mutated by execution and is safe to share
/// across threads.
pub struct Pipeline<P: 'static> {
    steps: StepList,
    resolver: Arc<dyn Resolver<Box<dyn Middleware<P>>>>,
}

impl<P: 'static> Pipeline<P> {
    /// Create an empty pipeline backed by `resolver`.
    pub fn new(resolver: Arc<dyn Resolver<Box<dyn Middleware<P>>>>) -> Self {
        Self {
            steps: StepList::new(vec![Contract::of::<dyn Middleware<P>>()]),
            resolver,
        }
    }

    /// Add a middleware type. Steps execute in the order they are
    /// added; the same type may be added more than once, each
    /// occurrence resolved independently at execution time.
    pub fn add<M>(&mut self) -> &mut Self
    where
        M: Middleware<P> + 'static,
    {
        self.steps.push(StepType::middleware::<M, P>());
        self
    }

    /// Add a middleware type by handle, validated against this flow's
    /// contract at configuration time.
    pub fn add_type(&mut self, step: StepType) -> Result<&mut Self, ConfigError> {
        self.steps.push_checked(step)?;
        Ok(self)
    }

    /// Execute the configured pipeline over `parameter`.
    ///
    /// An empty pipeline returns immediately without resolving anything.
    ///
    /// # Errors
    /// Resolution failures, release-capability mismatches, and
    /// middleware failures propagate unchanged; owned instances
    /// resolved so far are still released on the way out.
    #[instrument(skip_all, fields(steps = self.steps.len()))]
    pub fn execute(&self, parameter: P) -> Result<(), FlowError> {
        if self.steps.is_empty() {
            return Ok(());
        }
        self.run_from(0, parameter)
    }

    // Resolve and run the step at `index`. The index is the per-call
    // cursor: concurrent executions of one definition each recurse over
    // their own indices and cannot interfere.
    fn run_from(&self, index: usize, parameter: P) -> Result<(), FlowError> {
        let step = self.steps.get(index);
        debug!(step = step.name(), index, "resolving pipeline middleware");
        let Resolved { mut instance, is_owned } = self.resolver.resolve(step)?;
        if is_owned && instance.release_mode() == ReleaseMode::Suspending {
            return Err(FlowError::AsyncReleaseRequired {
                step: step.name().to_owned(),
                flow: "pipeline",
            });
        }

        let next = if index + 1 == self.steps.len() {
            Next::end()
        } else {
            Next::new(move |p| self.run_from(index + 1, p))
        };

        let result = instance.run(parameter, next);
        if is_owned {
            instance.release();
        }
        result
    }
}
