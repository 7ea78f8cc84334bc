//! Subscriber errors.

use thiserror::Error;
use veritask_ledger::LedgerError;
use veritask_types::ErrorClass;

/// Errors ending one subscription attempt or the subscriber itself.
#[derive(Debug, Error)]
pub enum SubscriberError {
    /// Opening or reading the event stream failed.
    #[error("event subscription failed: {0}")]
    Subscription(#[from] LedgerError),

    /// The event stream ended.
    #[error("event stream ended")]
    StreamEnded,

    /// The orchestrator intake channel is closed.
    #[error("orchestrator intake closed")]
    IntakeClosed,
}

impl SubscriberError {
    /// Failure class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            SubscriberError::Subscription(e) => e.class(),
            SubscriberError::StreamEnded => ErrorClass::TransientInfra,
            SubscriberError::IntakeClosed => ErrorClass::InvariantViolation,
        }
    }
}

/// Result alias for subscriber operations.
pub type SubscriberResult<T> = Result<T, SubscriberError>;
