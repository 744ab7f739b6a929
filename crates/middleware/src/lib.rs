//! `middleware` crate — the step contracts, the resolver seam, and
//! recording test doubles for middleware flows.
//!
//! The flow executors (the `engine` crate) dispatch every step through
//! these contracts; user middleware and resolvers implement them.

pub mod error;
pub mod traits;
pub mod resolve;
pub mod registry;
pub mod mock;

pub use error::{FlowError, ResolveError};
pub use traits::{
    AsyncChainNext, AsyncFinally, AsyncHandler, AsyncMiddleware, AsyncNext,
    CancellableAsyncFinally, CancellableAsyncHandler, CancellableAsyncMiddleware, ChainNext,
    Finally, Handler, Middleware, Next, ReleaseMode,
};
pub use resolve::{
    AsyncChainFinally, AsyncChainResolver, AsyncChainStep, AsyncPipelineStep, ChainResolver,
    Contract, Resolved, Resolver, StepType,
};
pub use registry::FactoryResolver;
