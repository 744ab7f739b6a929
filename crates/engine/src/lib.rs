//! `engine` crate — the middleware-flow executors.
//!
//! Four flow shapes over the contracts in the `middleware` crate:
//! [`Pipeline`] and [`AsyncPipeline`] run middleware that forward to
//! one another with no return value; [`ResponsibilityChain`] and
//! [`AsyncResponsibilityChain`] let a handler answer directly, with an
//! exhausted chain falling through to a configurable fallback. The
//! suspending shapes thread a cooperative cancellation token through
//! every continuation.

pub mod error;
mod flow;
pub mod pipeline;
pub mod async_pipeline;
pub mod chain;
pub mod async_chain;

pub use error::ConfigError;
pub use pipeline::Pipeline;
pub use async_pipeline::AsyncPipeline;
pub use chain::ResponsibilityChain;
pub use async_chain::AsyncResponsibilityChain;

#[cfg(test)]
mod pipeline_tests;
