//! Suspending chain-of-responsibility executor.
//!
//! Generalizes the suspending pipeline the way the blocking chain
//! generalizes the blocking pipeline: handlers return values, may
//! short-circuit, and an exhausted chain falls through to the
//! configured fallback. The fallback is resolved in a tagged form like
//! the steps, so its cancellation-aware variant is preferred when
//! present.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use middleware::{
    AsyncChainFinally, AsyncChainNext, AsyncChainResolver, AsyncChainStep, AsyncFinally,
    AsyncHandler, CancellableAsyncFinally, CancellableAsyncHandler, Contract, FlowError,
    Resolved, Resolver, StepType,
};

use crate::error::ConfigError;
use crate::flow::{check_contract, StepList};

// The configured fallback: at most one, the latest setter wins.
enum Fallback<P, R> {
    None,
    Type(StepType),
    Literal(Box<dyn Fn(P) -> BoxFuture<'static, Result<R, FlowError>> + Send + Sync>),
}

/// A suspending chain of responsibility from `P` to `R`.
pub struct AsyncResponsibilityChain<P: Send + 'static, R: Send + 'static> {
    steps: StepList,
    fallback: Fallback<P, R>,
    fallback_accepted: Vec<Contract>,
    resolver: Arc<dyn AsyncChainResolver<P, R>>,
}

impl<P: Send + 'static, R: Send + 'static> AsyncResponsibilityChain<P, R> {
    /// Create an empty chain backed by `resolver`.
    pub fn new(resolver: Arc<dyn AsyncChainResolver<P, R>>) -> Self {
        Self {
            steps: StepList::new(vec![
                Contract::of::<dyn AsyncHandler<P, R>>(),
                Contract::of::<dyn CancellableAsyncHandler<P, R>>(),
            ]),
            fallback: Fallback::None,
            fallback_accepted: vec![
                Contract::of::<dyn AsyncFinally<P, R>>(),
                Contract::of::<dyn CancellableAsyncFinally<P, R>>(),
            ],
            resolver,
        }
    }

    /// Add a handler type. Handlers execute in the order they are
    /// added; the same type may be added more than once.
    pub fn add<H>(&mut self) -> &mut Self
    where
        H: AsyncHandler<P, R> + 'static,
    {
        self.steps.push(StepType::async_handler::<H, P, R>());
        self
    }

    /// Add a handler type that receives the cancellation token.
    pub fn add_cancellable<H>(&mut self) -> &mut Self
    where
        H: CancellableAsyncHandler<P, R> + 'static,
    {
        self.steps.push(StepType::cancellable_async_handler::<H, P, R>());
        self
    }

    /// Add a handler type by handle, validated against this flow's
    /// contracts at configuration time.
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
        F: AsyncFinally<P, R> + 'static,
    {
        self.fallback = Fallback::Type(StepType::async_finally::<F, P, R>());
        self
    }

    /// Set a fallback that receives the cancellation token.
    pub fn finally_cancellable<F>(&mut self) -> &mut Self
    where
        F: CancellableAsyncFinally<P, R> + 'static,
    {
        self.fallback = Fallback::Type(StepType::cancellable_async_finally::<F, P, R>());
        self
    }

    /// Set the fallback by type handle, validated at configuration time.
    pub fn finally_type(&mut self, step: StepType) -> Result<&mut Self, ConfigError> {
        check_contract(&step, &self.fallback_accepted)?;
        self.fallback = Fallback::Type(step);
        Ok(self)
    }

    /// Set the fallback as a bare asynchronous function.
    #[deprecated(note = "legacy form; implement `AsyncFinally` and use `finally` instead")]
    pub fn finally_fn<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, FlowError>> + Send + 'static,
    {
        self.fallback = Fallback::Literal(Box::new(move |p| Box::pin(f(p))));
        self
    }

    /// Execute the configured chain with a token that is never
    /// cancelled.
    pub async fn execute(&self, parameter: P) -> Result<R, FlowError>
    where
        R: Default,
    {
        self.execute_with_cancellation(parameter, CancellationToken::new())
            .await
    }

    /// Execute the configured chain, delivering `token` unchanged to
    /// every cancellation-aware handler and to a cancellation-aware
    /// fallback.
    ///
    /// # Errors
    /// Resolution failures, middleware failures, and cancellation
    /// outcomes propagate unchanged; owned instances resolved so far
    /// are still released on the way out.
    #[instrument(skip_all, fields(steps = self.steps.len()))]
    pub async fn execute_with_cancellation(
        &self,
        parameter: P,
        token: CancellationToken,
    ) -> Result<R, FlowError>
    where
        R: Default,
    {
        self.run_from(0, parameter, token).await
    }

    // Resolve and run the handler at `index`; past the last handler
    // (and for an empty chain) this is the fallback branch. Boxed so
    // the continuation can recurse.
    fn run_from(
        &self,
        index: usize,
        parameter: P,
        token: CancellationToken,
    ) -> BoxFuture<'_, Result<R, FlowError>>
    where
        R: Default,
    {
        Box::pin(async move {
            if index == self.steps.len() {
                return self.run_fallback(parameter, token).await;
            }
            let step = self.steps.get(index);
            debug!(step = step.name(), index, "resolving chain handler");
            let Resolved { mut instance, is_owned } =
                Resolver::<AsyncChainStep<P, R>>::resolve(self.resolver.as_ref(), step)?;

            let forward = token.clone();
            let next = AsyncChainNext::new(move |p| self.run_from(index + 1, p, forward));

            let result = instance.run(parameter, next, &token).await;
            if is_owned {
                instance.release().await;
            }
            result
        })
    }

    // Exhausted chain: resolve a type fallback like a step, call a
    // literal directly, or yield the default with no invocation at all.
    async fn run_fallback(&self, parameter: P, token: CancellationToken) -> Result<R, FlowError>
    where
        R: Default,
    {
        match &self.fallback {
            Fallback::Type(step) => {
                debug!(step = step.name(), "resolving chain fallback");
                let Resolved { mut instance, is_owned } =
                    Resolver::<AsyncChainFinally<P, R>>::resolve(self.resolver.as_ref(), step)?;
                let result = instance.finally(parameter, &token).await;
                if is_owned {
                    instance.release().await;
                }
                result
            }
            Fallback::Literal(f) => f(parameter).await,
            Fallback::None => Ok(R::default()),
        }
    }
}
