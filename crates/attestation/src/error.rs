//! Attestation error types.

use thiserror::Error;
use veritask_types::ErrorClass;

/// Errors while producing an attestation.
///
/// Verification never errors; it answers `false`.
#[derive(Debug, Error)]
pub enum AttestationError {
    /// The signing key could not be used.
    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),

    /// The key reference could not be parsed.
    #[error("invalid key reference: {0}")]
    InvalidKey(String),
}

impl AttestationError {
    /// Failure class of this error.
    pub fn class(&self) -> ErrorClass {
        ErrorClass::AttestationFailure
    }
}

/// Result type alias for attestation operations.
pub type AttestationResult<T> = Result<T, AttestationError>;
