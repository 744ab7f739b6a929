//! The resolver seam: step-type handles, resolution results, and the
//! tagged instance forms the suspending executors dispatch on.
//!
//! A flow stores [`StepType`] handles and defers all construction to a
//! [`Resolver`] at execution time, one fresh resolution per step
//! invocation. Which object performs a step and how it is constructed
//! and owned are entirely the resolver's business.

use std::any::{type_name, TypeId};
use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::traits::{
    AsyncChainNext, AsyncFinally, AsyncHandler, AsyncMiddleware, AsyncNext,
    CancellableAsyncFinally, CancellableAsyncHandler, CancellableAsyncMiddleware, Finally,
    Handler, Middleware,
};
use crate::{FlowError, ResolveError};

// ---------------------------------------------------------------------------
// Contracts and step-type handles
// ---------------------------------------------------------------------------

/// Identifies one of the run contracts a step type can satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contract {
    id: TypeId,
    name: &'static str,
}

impl Contract {
    /// Contract evidence for the trait-object type `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Opaque handle identifying a middleware type to a resolver.
///
/// Each constructor requires the corresponding trait bound, so a handle
/// is conformance evidence captured at creation time; the type-handle
/// configuration entry points check that evidence against the contracts
/// the flow accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepType {
    id: TypeId,
    name: &'static str,
    contract: Contract,
}

impl StepType {
    fn of<M: 'static>(contract: Contract) -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: type_name::<M>(),
            contract,
        }
    }

    /// Handle for a blocking pipeline middleware type.
    pub fn middleware<M, P>() -> Self
    where
        M: Middleware<P> + 'static,
        P: 'static,
    {
        Self::of::<M>(Contract::of::<dyn Middleware<P>>())
    }

    /// Handle for a suspending pipeline middleware type.
    pub fn async_middleware<M, P>() -> Self
    where
        M: AsyncMiddleware<P> + 'static,
        P: Send + 'static,
    {
        Self::of::<M>(Contract::of::<dyn AsyncMiddleware<P>>())
    }

    /// Handle for a cancellation-aware suspending pipeline middleware type.
    pub fn cancellable_async_middleware<M, P>() -> Self
    where
        M: CancellableAsyncMiddleware<P> + 'static,
        P: Send + 'static,
    {
        Self::of::<M>(Contract::of::<dyn CancellableAsyncMiddleware<P>>())
    }

    /// Handle for a blocking chain handler type.
    pub fn handler<M, P, R>() -> Self
    where
        M: Handler<P, R> + 'static,
        P: 'static,
        R: 'static,
    {
        Self::of::<M>(Contract::of::<dyn Handler<P, R>>())
    }

    /// Handle for a suspending chain handler type.
    pub fn async_handler<M, P, R>() -> Self
    where
        M: AsyncHandler<P, R> + 'static,
        P: Send + 'static,
        R: Send + 'static,
    {
        Self::of::<M>(Contract::of::<dyn AsyncHandler<P, R>>())
    }

    /// Handle for a cancellation-aware suspending chain handler type.
    pub fn cancellable_async_handler<M, P, R>() -> Self
    where
        M: CancellableAsyncHandler<P, R> + 'static,
        P: Send + 'static,
        R: Send + 'static,
    {
        Self::of::<M>(Contract::of::<dyn CancellableAsyncHandler<P, R>>())
    }

    /// Handle for a blocking chain fallback type.
    pub fn finally<M, P, R>() -> Self
    where
        M: Finally<P, R> + 'static,
        P: 'static,
        R: 'static,
    {
        Self::of::<M>(Contract::of::<dyn Finally<P, R>>())
    }

    /// Handle for a suspending chain fallback type.
    pub fn async_finally<M, P, R>() -> Self
    where
        M: AsyncFinally<P, R> + 'static,
        P: Send + 'static,
        R: Send + 'static,
    {
        Self::of::<M>(Contract::of::<dyn AsyncFinally<P, R>>())
    }

    /// Handle for a cancellation-aware suspending chain fallback type.
    pub fn cancellable_async_finally<M, P, R>() -> Self
    where
        M: CancellableAsyncFinally<P, R> + 'static,
        P: Send + 'static,
        R: Send + 'static,
    {
        Self::of::<M>(Contract::of::<dyn CancellableAsyncFinally<P, R>>())
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The middleware type's name, for registries and error messages.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The contract this handle carries evidence for.
    pub fn contract(&self) -> Contract {
        self.contract
    }
}

// ---------------------------------------------------------------------------
// Resolution results
// ---------------------------------------------------------------------------

/// The outcome of resolving a step type: the instance plus whether the
/// engine owns its resources.
pub struct Resolved<S> {
    /// The freshly constructed (or container-supplied) instance.
    pub instance: S,
    /// When `true`, the executor releases the instance once its
    /// downstream continuation has finished.
    pub is_owned: bool,
}

impl<S> Resolved<S> {
    /// An instance whose resources the engine must release.
    pub fn owned(instance: S) -> Self {
        Self { instance, is_owned: true }
    }

    /// An instance whose lifetime the resolver (or its container) manages.
    pub fn external(instance: S) -> Self {
        Self { instance, is_owned: false }
    }
}

/// Turns a step type into a runtime instance.
///
/// The sole dependency-injection seam: containers, registries, and
/// hand-rolled factories all plug in here. `resolve` is invoked freshly
/// for every step invocation of every execute call, so implementations
/// must be safe for concurrent use and must not cache on the engine's
/// behalf.
pub trait Resolver<S>: Send + Sync {
    /// Produce an instance for `step`, in the resolved form `S` the
    /// requesting flow needs.
    fn resolve(&self, step: &StepType) -> Result<Resolved<S>, ResolveError>;

    /// Name used when reporting contract violations.
    fn name(&self) -> &'static str {
        type_name::<Self>()
    }
}

/// Everything a blocking chain needs from its resolver: handlers and
/// the type-form fallback. Implemented automatically for any resolver
/// supplying both.
pub trait ChainResolver<P: 'static, R: 'static>:
    Resolver<Box<dyn Handler<P, R>>> + Resolver<Box<dyn Finally<P, R>>>
{
}

impl<T, P: 'static, R: 'static> ChainResolver<P, R> for T where
    T: Resolver<Box<dyn Handler<P, R>>> + Resolver<Box<dyn Finally<P, R>>>
{
}

/// Everything a suspending chain needs from its resolver. Implemented
/// automatically for any resolver supplying both resolved forms.
pub trait AsyncChainResolver<P: Send + 'static, R: Send + 'static>:
    Resolver<AsyncChainStep<P, R>> + Resolver<AsyncChainFinally<P, R>>
{
}

impl<T, P: Send + 'static, R: Send + 'static> AsyncChainResolver<P, R> for T where
    T: Resolver<AsyncChainStep<P, R>> + Resolver<AsyncChainFinally<P, R>>
{
}

// ---------------------------------------------------------------------------
// Tagged resolved forms for the suspending executors
// ---------------------------------------------------------------------------

/// A resolved suspending-pipeline step, tagged by the run contract it
/// satisfies. The executor prefers the cancellation-aware run when the
/// tag says it exists; plain middleware simply never sees the token.
pub enum AsyncPipelineStep<P: Send + 'static> {
    Plain(Box<dyn AsyncMiddleware<P>>),
    Cancellable(Box<dyn CancellableAsyncMiddleware<P>>),
}

impl<P: Send + 'static> AsyncPipelineStep<P> {
    /// Run the step, delivering `token` only to cancellation-aware
    /// middleware.
    pub async fn run(
        &self,
        parameter: P,
        next: AsyncNext<'_, P>,
        token: &CancellationToken,
    ) -> Result<(), FlowError> {
        match self {
            Self::Plain(mw) => mw.run(parameter, next).await,
            Self::Cancellable(mw) => mw.run(parameter, next, token.clone()).await,
        }
    }

    /// Release the underlying instance's resources.
    pub async fn release(&mut self) {
        match self {
            Self::Plain(mw) => mw.release().await,
            Self::Cancellable(mw) => mw.release().await,
        }
    }
}

/// A resolved suspending-chain step, tagged like [`AsyncPipelineStep`].
pub enum AsyncChainStep<P: Send + 'static, R: Send + 'static> {
    Plain(Box<dyn AsyncHandler<P, R>>),
    Cancellable(Box<dyn CancellableAsyncHandler<P, R>>),
}

impl<P: Send + 'static, R: Send + 'static> AsyncChainStep<P, R> {
    /// Run the handler, delivering `token` only to cancellation-aware
    /// middleware.
    pub async fn run(
        &self,
        parameter: P,
        next: AsyncChainNext<'_, P, R>,
        token: &CancellationToken,
    ) -> Result<R, FlowError> {
        match self {
            Self::Plain(mw) => mw.run(parameter, next).await,
            Self::Cancellable(mw) => mw.run(parameter, next, token.clone()).await,
        }
    }

    /// Release the underlying instance's resources.
    pub async fn release(&mut self) {
        match self {
            Self::Plain(mw) => mw.release().await,
            Self::Cancellable(mw) => mw.release().await,
        }
    }
}

/// A resolved suspending-chain fallback, tagged like the steps.
pub enum AsyncChainFinally<P: Send + 'static, R: Send + 'static> {
    Plain(Box<dyn AsyncFinally<P, R>>),
    Cancellable(Box<dyn CancellableAsyncFinally<P, R>>),
}

impl<P: Send + 'static, R: Send + 'static> AsyncChainFinally<P, R> {
    /// Produce the chain's result, delivering `token` only to the
    /// cancellation-aware form.
    pub async fn finally(&self, parameter: P, token: &CancellationToken) -> Result<R, FlowError> {
        match self {
            Self::Plain(fin) => fin.finally(parameter).await,
            Self::Cancellable(fin) => fin.finally(parameter, token.clone()).await,
        }
    }

    /// Release the underlying instance's resources.
    pub async fn release(&mut self) {
        match self {
            Self::Plain(fin) => fin.release().await,
            Self::Cancellable(fin) => fin.release().await,
        }
    }
}
