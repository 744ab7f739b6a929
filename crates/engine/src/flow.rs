//! Shared step-list base for the four flow executors.
//!
//! Stores the configured step handles in execution order and validates
//! type-handle additions against the contracts a flow accepts.
//! Append-only during configuration; the executors only read, so a
//! configured flow may execute repeatedly and concurrently.

use middleware::{Contract, StepType};

use crate::error::ConfigError;

/// Check a handle's recorded contract against an accepted set.
///
/// Shared by the step lists and the chains' fallback setters.
pub(crate) fn check_contract(step: &StepType, accepted: &[Contract]) -> Result<(), ConfigError> {
    if accepted.contains(&step.contract()) {
        return Ok(());
    }
    Err(ConfigError::ContractMismatch {
        step: step.name().to_owned(),
        expected: accepted
            .iter()
            .map(Contract::name)
            .collect::<Vec<_>>()
            .join(" or "),
    })
}

/// Ordered middleware registrations shared by every flow shape.
///
/// Duplicates are permitted — the same type may appear more than once,
/// each occurrence resolved independently at execution time.
pub(crate) struct StepList {
    steps: Vec<StepType>,
    accepted: Vec<Contract>,
}

impl StepList {
    pub(crate) fn new(accepted: Vec<Contract>) -> Self {
        Self {
            steps: Vec::new(),
            accepted,
        }
    }

    /// Append a handle added through a compile-checked entry point.
    pub(crate) fn push(&mut self, step: StepType) {
        self.steps.push(step);
    }

    /// Append a handle added by type, validating its contract.
    pub(crate) fn push_checked(&mut self, step: StepType) -> Result<(), ConfigError> {
        check_contract(&step, &self.accepted)?;
        self.steps.push(step);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.steps.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub(crate) fn get(&self, index: usize) -> &StepType {
        &self.steps[index]
    }
}
