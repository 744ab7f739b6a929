//! The middleware run contracts — the traits every step must fulfil.
//!
//! Pipelines and chains each come in a blocking and a suspending form,
//! and suspending middleware may additionally accept the cancellation
//! token. A step receives the parameter and a single-shot continuation
//! and decides whether to transform, forward, or stop.

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::FlowError;

// ---------------------------------------------------------------------------
// Release capability
// ---------------------------------------------------------------------------

/// How an owned instance releases its resources.
///
/// Blocking flows can only honour `Blocking`; an owned instance that
/// reports `Suspending` makes a blocking executor fail fast instead of
/// leaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    /// Resources are released synchronously, in `release` or `Drop`.
    Blocking,
    /// Resource release must await; only a suspending flow can run it.
    Suspending,
}

// ---------------------------------------------------------------------------
// Continuations
// ---------------------------------------------------------------------------

/// Single-shot continuation handed to a blocking pipeline step.
pub struct Next<'a, P> {
    inner: Option<Box<dyn FnOnce(P) -> Result<(), FlowError> + 'a>>,
}

impl<'a, P> Next<'a, P> {
    /// Continuation invoking the rest of the flow. Built by the executors.
    pub fn new(f: impl FnOnce(P) -> Result<(), FlowError> + 'a) -> Self {
        Self { inner: Some(Box::new(f)) }
    }

    /// Terminal continuation — the end of the pipeline, a no-op.
    pub fn end() -> Self {
        Self { inner: None }
    }

    /// Forward the parameter to the rest of the pipeline.
    pub fn run(self, parameter: P) -> Result<(), FlowError> {
        match self.inner {
            Some(f) => f(parameter),
            None => Ok(()),
        }
    }
}

/// Single-shot continuation handed to a suspending pipeline step.
pub struct AsyncNext<'a, P> {
    inner: Option<Box<dyn FnOnce(P) -> BoxFuture<'a, Result<(), FlowError>> + Send + 'a>>,
}

impl<'a, P: Send> AsyncNext<'a, P> {
    /// Continuation invoking the rest of the flow. Built by the executors.
    pub fn new(f: impl FnOnce(P) -> BoxFuture<'a, Result<(), FlowError>> + Send + 'a) -> Self {
        Self { inner: Some(Box::new(f)) }
    }

    /// Terminal continuation — the end of the pipeline, a no-op.
    pub fn end() -> Self {
        Self { inner: None }
    }

    /// Forward the parameter to the rest of the pipeline.
    pub async fn run(self, parameter: P) -> Result<(), FlowError> {
        match self.inner {
            Some(f) => f(parameter).await,
            None => Ok(()),
        }
    }
}

/// Single-shot continuation handed to a blocking chain step. Always
/// leads to the next handler or, past the last one, to the fallback.
pub struct ChainNext<'a, P, R> {
    inner: Box<dyn FnOnce(P) -> Result<R, FlowError> + 'a>,
}

impl<'a, P, R> ChainNext<'a, P, R> {
    /// Continuation invoking the rest of the chain. Built by the executors.
    pub fn new(f: impl FnOnce(P) -> Result<R, FlowError> + 'a) -> Self {
        Self { inner: Box::new(f) }
    }

    /// Forward the parameter to the rest of the chain.
    pub fn run(self, parameter: P) -> Result<R, FlowError> {
        (self.inner)(parameter)
    }
}

/// Single-shot continuation handed to a suspending chain step.
pub struct AsyncChainNext<'a, P, R> {
    inner: Box<dyn FnOnce(P) -> BoxFuture<'a, Result<R, FlowError>> + Send + 'a>,
}

impl<'a, P: Send, R> AsyncChainNext<'a, P, R> {
    /// Continuation invoking the rest of the chain. Built by the executors.
    pub fn new(f: impl FnOnce(P) -> BoxFuture<'a, Result<R, FlowError>> + Send + 'a) -> Self {
        Self { inner: Box::new(f) }
    }

    /// Forward the parameter to the rest of the chain.
    pub async fn run(self, parameter: P) -> Result<R, FlowError> {
        (self.inner)(parameter).await
    }
}

// ---------------------------------------------------------------------------
// Pipeline contracts
// ---------------------------------------------------------------------------

/// A blocking pipeline step.
///
/// Steps execute in the order they were added; each is expected to
/// forward with `next.run(parameter)`, though returning without
/// forwarding simply ends the flow early.
pub trait Middleware<P>: Send + Sync {
    /// Run the step over `parameter`.
    fn run(&self, parameter: P, next: Next<'_, P>) -> Result<(), FlowError>;

    /// Release the instance's resources. Invoked by the executors only
    /// for instances the resolver marked owned, strictly after the
    /// downstream continuation has finished — on success and on error.
    fn release(&mut self) {}

    /// Which release style this instance requires.
    fn release_mode(&self) -> ReleaseMode {
        ReleaseMode::Blocking
    }
}

/// A suspending pipeline step.
#[async_trait]
pub trait AsyncMiddleware<P: Send + 'static>: Send + Sync {
    /// Run the step over `parameter`.
    async fn run(&self, parameter: P, next: AsyncNext<'_, P>) -> Result<(), FlowError>;

    /// Release the instance's resources; awaited for owned instances
    /// after the downstream continuation has finished.
    async fn release(&mut self) {}
}

/// A suspending pipeline step that observes the cancellation token.
///
/// Cancellation is strictly cooperative: the executor delivers the
/// token unchanged and never interrupts a running step. A step
/// typically checks the token before forwarding and aborts with
/// [`FlowError::Cancelled`].
#[async_trait]
pub trait CancellableAsyncMiddleware<P: Send + 'static>: Send + Sync {
    /// Run the step over `parameter`, observing `token`.
    async fn run(
        &self,
        parameter: P,
        next: AsyncNext<'_, P>,
        token: CancellationToken,
    ) -> Result<(), FlowError>;

    /// Release the instance's resources; awaited for owned instances
    /// after the downstream continuation has finished.
    async fn release(&mut self) {}
}

// ---------------------------------------------------------------------------
// Chain-of-responsibility contracts
// ---------------------------------------------------------------------------

/// A blocking chain-of-responsibility step.
///
/// Returning without calling `next` short-circuits every later handler
/// and the fallback; the returned value becomes the chain's result.
pub trait Handler<P, R>: Send + Sync {
    /// Run the handler over `parameter`.
    fn run(&self, parameter: P, next: ChainNext<'_, P, R>) -> Result<R, FlowError>;

    /// Release the instance's resources. Invoked only for owned
    /// instances, after the downstream continuation has finished.
    fn release(&mut self) {}

    /// Which release style this instance requires.
    fn release_mode(&self) -> ReleaseMode {
        ReleaseMode::Blocking
    }
}

/// A suspending chain-of-responsibility step.
#[async_trait]
pub trait AsyncHandler<P: Send + 'static, R: Send + 'static>: Send + Sync {
    /// Run the handler over `parameter`.
    async fn run(&self, parameter: P, next: AsyncChainNext<'_, P, R>) -> Result<R, FlowError>;

    /// Release the instance's resources; awaited for owned instances
    /// after the downstream continuation has finished.
    async fn release(&mut self) {}
}

/// A suspending chain-of-responsibility step that observes the
/// cancellation token.
#[async_trait]
pub trait CancellableAsyncHandler<P: Send + 'static, R: Send + 'static>: Send + Sync {
    /// Run the handler over `parameter`, observing `token`.
    async fn run(
        &self,
        parameter: P,
        next: AsyncChainNext<'_, P, R>,
        token: CancellationToken,
    ) -> Result<R, FlowError>;

    /// Release the instance's resources; awaited for owned instances
    /// after the downstream continuation has finished.
    async fn release(&mut self) {}
}

// ---------------------------------------------------------------------------
// Fallback contracts
// ---------------------------------------------------------------------------

/// The fallback invoked when a blocking chain is exhausted without any
/// handler answering. Resolved and released exactly like a step.
pub trait Finally<P, R>: Send + Sync {
    /// Produce the chain's result for an unhandled parameter.
    fn finally(&self, parameter: P) -> Result<R, FlowError>;

    /// Release the instance's resources. Invoked only for owned instances.
    fn release(&mut self) {}

    /// Which release style this instance requires.
    fn release_mode(&self) -> ReleaseMode {
        ReleaseMode::Blocking
    }
}

/// The fallback invoked when a suspending chain is exhausted.
#[async_trait]
pub trait AsyncFinally<P: Send + 'static, R: Send + 'static>: Send + Sync {
    /// Produce the chain's result for an unhandled parameter.
    async fn finally(&self, parameter: P) -> Result<R, FlowError>;

    /// Release the instance's resources; awaited for owned instances.
    async fn release(&mut self) {}
}

/// The fallback for a suspending chain, observing the cancellation token.
#[async_trait]
pub trait CancellableAsyncFinally<P: Send + 'static, R: Send + 'static>: Send + Sync {
    /// Produce the chain's result for an unhandled parameter.
    async fn finally(&self, parameter: P, token: CancellationToken) -> Result<R, FlowError>;

    /// Release the instance's resources; awaited for owned instances.
    async fn release(&mut self) {}
}
