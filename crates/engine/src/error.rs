//! Configuration-time error types.

use thiserror::Error;

/// Errors raised while configuring a flow, before any execution.
///
/// The generic `add`/`finally` entry points are checked by the
/// compiler; only the type-handle entry points can fail, and they fail
/// immediately rather than at execution time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A type handle does not carry evidence for any contract this
    /// flow accepts.
    #[error("step type '{step}' does not satisfy the required contract ({expected})")]
    ContractMismatch { step: String, expected: String },
}
