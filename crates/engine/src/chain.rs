//! Blocking chain-of-responsibility executor.
//!
//! Like the pipeline, except every handler returns a value and may
//! short-circuit the flow by answering instead of forwarding. An
//! exhausted chain — including an empty one — falls through to the
//! configured fallback, or to `R::default()` when none is set.

use std::sync::Arc;

use tracing::{debug, instrument};

use middleware::{
    ChainNext, ChainResolver, Contract, Finally, FlowError, Handler, ReleaseMode, Resolved,
    Resolver, StepType,
};

use crate::error::ConfigError;
use crate::flow::{check_contract, StepList};

// The configured fallback: at most one, the latest setter wins.
enum Fallback<P, R> {
    None,
    Type(StepType),
    Literal(Box<dyn Fn(P) -> Result<R, FlowError> + Send + Sync>),
}

/// A blocking chain of responsibility from `P` to `R`.
pub struct ResponsibilityChain<P: 'static, R: 'static> {
    steps: StepList,
    fallback: Fallback<P, R>,
    fallback_accepted: Vec<Contract>,
    resolver: Arc<dyn ChainResolver<P, R>>,
}

impl<P: 'static, R: 'static> ResponsibilityChain<P, R> {
    /// Create an empty chain backed by `resolver`.
    pub fn new(resolver: Arc<dyn ChainResolver<P, R>>) -> Self {
        Self {
            steps: StepList::new(vec![Contract::of::<dyn Handler<P, R>>()]),
            fallback: Fallback::None,
            fallback_accepted: vec![Contract::of::<dyn Finally<P, R>>()],
            resolver,
        }
    }

    /// Add a handler type. Handlers execute in the order they are
    /// added; the same type may be added more than once.
    pub fn add<H>(&mut self) -> &mut Self
    where
        H: Handler<P, R> + 'static,
    {
        self.steps.push(StepType::handler::<H, P, R>());
        self
    }

    /// Add a handler type by handle, validated against this flow's
    /// contract at configuration time.
    pub fn add_type(&mut self, step: StepType) -> Result<&mut Self, ConfigError> {
        self.steps.push_checked(step)?;
        Ok(self)
    }

    /// Set the fallback invoked when no handler answers. It is resolved
    /// and released exactly like a step. A chain holds at most one
    /// fallback: setting it again, in either form, replaces the
    /// previous one.
    pub fn finally<F>(&mut self) -> &mut Self
    where
        F: Finally<P, R> + 'static,
    {
        self.fallback = Fallback::Type(StepType::finally::<F, P, R>());
        self
    }

    /// Set the fallback by type handle, validated at configuration time.
    pub fn finally_type(&mut self, step: StepType) -> Result<&mut Self, ConfigError> {
        check_contract(&step, &self.fallback_accepted)?;
        self.fallback = Fallback::Type(step);
        Ok(self)
    }

    /// Set the fallback as a bare function.
    #[deprecated(note = "legacy form; implement `Finally` and use `finally` instead")]
    pub fn finally_fn(
        &mut self,
        f: impl Fn(P) -> Result<R, FlowError> + Send + Sync + 'static,
    ) -> &mut Self {
        self.fallback = Fallback::Literal(Box::new(f));
        self
    }

    /// Execute the configured chain over `parameter`.
    ///
    /// The result is the first answering handler's value, the
    /// fallback's value if every handler forwarded, or `R::default()`
    /// when no fallback is configured.
    ///
    /// # Errors
    /// Resolution failures, release-capability mismatches, and
    /// middleware failures propagate unchanged; owned instances
    /// resolved so far are still released on the way out.
    #[instrument(skip_all, fields(steps = self.steps.len()))]
    pub fn execute(&self, parameter: P) -> Result<R, FlowError>
    where
        R: Default,
    {
        self.run_from(0, parameter)
    }

    // Resolve and run the handler at `index`; past the last handler
    // (and for an empty chain) this is the fallback branch.
    fn run_from(&self, index: usize, parameter: P) -> Result<R, FlowError>
    where
        R: Default,
    {
        if index == self.steps.len() {
            return self.run_fallback(parameter);
        }
        let step = self.steps.get(index);
        debug!(step = step.name(), index, "resolving chain handler");
        let Resolved { mut instance, is_owned } =
            Resolver::<Box<dyn Handler<P, R>>>::resolve(self.resolver.as_ref(), step)?;
        if is_owned && instance.release_mode() == ReleaseMode::Suspending {
            return Err(FlowError::AsyncReleaseRequired {
                step: step.name().to_owned(),
                flow: "chain",
            });
        }

        let next = ChainNext::new(move |p| self.run_from(index + 1, p));
        let result = instance.run(parameter, next);
        if is_owned {
            instance.release();
        }
        result
    }

    // Exhausted chain: resolve a type fallback like a step, call a
    // literal directly, or yield the default with no invocation at all.
    fn run_fallback(&self, parameter: P) -> Result<R, FlowError>
    where
        R: Default,
    {
        match &self.fallback {
            Fallback::Type(step) => {
                debug!(step = step.name(), "resolving chain fallback");
                let Resolved { mut instance, is_owned } =
                    Resolver::<Box<dyn Finally<P, R>>>::resolve(self.resolver.as_ref(), step)?;
                if is_owned && instance.release_mode() == ReleaseMode::Suspending {
                    return Err(FlowError::AsyncReleaseRequired {
                        step: step.name().to_owned(),
                        flow: "chain",
                    });
                }
                let result = instance.finally(parameter);
                if is_owned {
                    instance.release();
                }
                result
            }
            Fallback::Literal(f) => f(parameter),
            Fallback::None => Ok(R::default()),
        }
    }
}
