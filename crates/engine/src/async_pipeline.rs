//! Suspending pipeline executor.
//!
//! The suspending counterpart of [`Pipeline`](crate::Pipeline): steps
//! may await, may accept the cancellation token, and owned instances
//! are released through the asynchronous hook. The executor introduces
//! no waits of its own — suspension points exist only inside the steps.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use middleware::{
    AsyncMiddleware, AsyncNext, AsyncPipelineStep, CancellableAsyncMiddleware, Contract,
    FlowError, Resolved, Resolver, StepType,
};

use crate::error::ConfigError;
use crate::flow::StepList;

/// A suspending middleware pipeline over parameters of type `P`.
pub struct AsyncPipeline<P: Send + 'static> {
    steps: StepList,
    resolver: Arc<dyn Resolver<AsyncPipelineStep<P>>>,
}

impl<P: Send + 'static> AsyncPipeline<P> {
    /// Create an empty pipeline backed by `resolver`.
    pub fn new(resolver: Arc<dyn Resolver<AsyncPipelineStep<P>>>) -> Self {
        Self {
            steps: StepList::new(vec![
                Contract::of::<dyn AsyncMiddleware<P>>(),
                Contract::of::<dyn CancellableAsyncMiddleware<P>>(),
            ]),
            resolver,
        }
    }

    /// Add a middleware type. Steps execute in the order they are
    /// added; the same type may be added more than once.
    pub fn add<M>(&mut self) -> &mut Self
    where
        M: AsyncMiddleware<P> + 'static,
    {
        self.steps.push(StepType::async_middleware::<M, P>());
        self
    }

    /// Add a middleware type that receives the cancellation token.
    pub fn add_cancellable<M>(&mut self) -> &mut Self
    where
        M: CancellableAsyncMiddleware<P> + 'static,
    {
        self.steps.push(StepType::cancellable_async_middleware::<M, P>());
        self
    }

    /// Add a middleware type by handle, validated against this flow's
    /// contracts at configuration time.
    pub fn add_type(&mut self, step: StepType) -> Result<&mut Self, ConfigError> {
        self.steps.push_checked(step)?;
        Ok(self)
    }

    /// Execute the configured pipeline with a token that is never
    /// cancelled.
    pub async fn execute(&self, parameter: P) -> Result<(), FlowError> {
        self.execute_with_cancellation(parameter, CancellationToken::new())
            .await
    }

    /// Execute the configured pipeline, delivering `token` unchanged to
    /// every cancellation-aware step.
    ///
    /// Cancellation is cooperative: a step observes the token and
    /// aborts with [`FlowError::Cancelled`]; the executor never
    /// interrupts a running step and never observes the token itself.
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
    ) -> Result<(), FlowError> {
        if self.steps.is_empty() {
            return Ok(());
        }
        self.run_from(0, parameter, token).await
    }

    // Resolve and run the step at `index`; boxed so the continuation
    // can recurse.
    fn run_from(
        &self,
        index: usize,
        parameter: P,
        token: CancellationToken,
    ) -> BoxFuture<'_, Result<(), FlowError>> {
        Box::pin(async move {
            let step = self.steps.get(index);
            debug!(step = step.name(), index, "resolving pipeline middleware");
            let Resolved { mut instance, is_owned } = self.resolver.resolve(step)?;

            let next = if index + 1 == self.steps.len() {
                AsyncNext::end()
            } else {
                let forward = token.clone();
                AsyncNext::new(move |p| self.run_from(index + 1, p, forward))
            };

            let result = instance.run(parameter, next, &token).await;
            if is_owned {
                instance.release().await;
            }
            result
        })
    }
}
