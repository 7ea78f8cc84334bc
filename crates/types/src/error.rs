//! Error classification shared across crates.

use serde::{Deserialize, Serialize};

/// Failure class, used to pick a recovery policy for an error.
///
/// Every crate-level error type reports one of these through a
/// `class()` method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Network or RPC trouble. Retried with bounded exponential backoff.
    TransientInfra,
    /// The ledger rejected a call. Routed to compensation, never retried blindly.
    ContractExecutionFailure,
    /// Malformed event or payload. Skipped or defaulted.
    DecodeFailure,
    /// Signing or verification failed. Always routed to compensation.
    AttestationFailure,
    /// Broken saga invariant. Fatal to the saga instance only.
    InvariantViolation,
}

impl ErrorClass {
    /// Whether an error of this class may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::TransientInfra)
    }

    /// Stable lowercase label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::TransientInfra => "transient_infra",
            ErrorClass::ContractExecutionFailure => "contract_execution_failure",
            ErrorClass::DecodeFailure => "decode_failure",
            ErrorClass::AttestationFailure => "attestation_failure",
            ErrorClass::InvariantViolation => "invariant_violation",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
