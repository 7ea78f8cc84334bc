//! Orchestrator errors.

use thiserror::Error;
use veritask_ledger::SettlementError;
use veritask_types::ErrorClass;

/// Errors outside individual sagas. Saga failures are reported as
/// [`SagaOutcome`](crate::SagaOutcome) values instead.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Reading ledger state for the recovery sweep failed.
    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),

    /// Registering metrics failed.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl SagaError {
    /// Failure class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            SagaError::Settlement(e) => e.class(),
            SagaError::Metrics(_) => ErrorClass::InvariantViolation,
        }
    }
}

/// Result type alias for orchestrator operations.
pub type SagaResult<T> = Result<T, SagaError>;
