//! Flow-level and resolver-level error types.

use thiserror::Error;

/// Errors surfaced while executing a flow.
///
/// The executors never retry and never swallow: resolution failures and
/// middleware failures propagate exactly once, with release of owned
/// instances still performed on the way out.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The resolver could not produce an instance for a configured step.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// An owned instance can only release its resources asynchronously,
    /// which a blocking flow cannot honour.
    #[error("middleware '{step}' only supports asynchronous release; execute it in the suspending {flow} instead")]
    AsyncReleaseRequired {
        step: String,
        flow: &'static str,
    },

    /// Cooperative cancellation was observed by a middleware.
    #[error("flow execution was cancelled")]
    Cancelled,

    /// A failure raised inside user middleware; passes through untouched.
    #[error(transparent)]
    Middleware(#[from] anyhow::Error),
}

/// Errors returned by a [`Resolver`](crate::Resolver) implementation.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The step type has no registration at all.
    #[error("no middleware registered for step type '{step}'")]
    Unregistered { step: String },

    /// The resolver knows the step type but cannot supply it under the
    /// contract this flow requires.
    #[error("resolver '{resolver}' cannot supply step type '{step}' under the required contract")]
    WrongContract { resolver: String, step: String },
}
