//! Error types for ledger access and settlement.

use thiserror::Error;
use veritask_types::{ErrorClass, JobId, JobStatus};

/// Errors from the ledger transport and contract gateways.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Connecting to the chain failed.
    #[error("chain connection failed: {0}")]
    Connection(String),

    /// The client was disconnected.
    #[error("ledger client not connected")]
    NotConnected,

    /// RPC transport failure.
    #[error("rpc failure: {0}")]
    Rpc(String),

    /// The event subscription ended or failed.
    #[error("event subscription failed: {0}")]
    Subscription(String),

    /// The extrinsic was included but failed to dispatch.
    #[error("extrinsic failed: {0}")]
    ExtrinsicFailed(String),

    /// The contract reverted the message.
    #[error("contract reverted {method}: {reason}")]
    ContractReverted {
        /// Message label.
        method: String,
        /// Revert data or description.
        reason: String,
    },

    /// Response, event or storage bytes could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Other client-side failure that retrying will not fix.
    #[error("ledger client error: {0}")]
    Client(String),
}

impl LedgerError {
    /// Failure class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::Connection(_)
            | LedgerError::NotConnected
            | LedgerError::Rpc(_)
            | LedgerError::Subscription(_) => ErrorClass::TransientInfra,
            LedgerError::ExtrinsicFailed(_)
            | LedgerError::ContractReverted { .. }
            | LedgerError::Client(_) => ErrorClass::ContractExecutionFailure,
            LedgerError::Decode(_) => ErrorClass::DecodeFailure,
        }
    }
}

impl From<parity_scale_codec::Error> for LedgerError {
    fn from(err: parity_scale_codec::Error) -> Self {
        LedgerError::Decode(err.to_string())
    }
}

/// Settlement operation, used in errors, logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettlementAction {
    /// Read of job, escrow or attestation state.
    Query,
    /// Job-queue status update.
    UpdateStatus,
    /// Attestation write on the job processor.
    RecordAttestation,
    /// Escrow release to the provider.
    ReleasePayment,
    /// Escrow refund to the owner.
    RefundPayment,
}

impl SettlementAction {
    /// Stable lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementAction::Query => "query",
            SettlementAction::UpdateStatus => "update_job_status",
            SettlementAction::RecordAttestation => "record_attestation",
            SettlementAction::ReleasePayment => "release_payment",
            SettlementAction::RefundPayment => "refund_payment",
        }
    }
}

impl std::fmt::Display for SettlementAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by a settlement gateway.
#[derive(Debug, Clone, Error)]
pub enum SettlementError {
    /// Infrastructure failure that outlived the local retry budget.
    #[error("transient ledger failure during {action}: {source}")]
    Transient {
        /// Operation that failed.
        action: SettlementAction,
        /// Last transport error.
        source: LedgerError,
    },

    /// The ledger rejected the call.
    #[error("{action} rejected by ledger: {reason}")]
    Rejected {
        /// Operation that failed.
        action: SettlementAction,
        /// Rejection description.
        reason: String,
    },

    /// Ledger data could not be decoded.
    #[error("{action} returned undecodable data: {reason}")]
    Decode {
        /// Operation that failed.
        action: SettlementAction,
        /// Decoder message.
        reason: String,
    },

    /// No such job on the ledger.
    #[error("job {job_id} not found on ledger")]
    JobNotFound {
        /// Missing job.
        job_id: JobId,
    },

    /// The requested status change is not an edge of the status graph.
    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Job concerned.
        job_id: JobId,
        /// Current ledger status.
        from: JobStatus,
        /// Requested status.
        to: JobStatus,
    },

    /// Ledger state contradicts the requested settlement.
    #[error("{action} conflicts with ledger state of job {job_id}: {reason}")]
    Conflict {
        /// Operation requested.
        action: SettlementAction,
        /// Job concerned.
        job_id: JobId,
        /// What the ledger already holds.
        reason: String,
    },
}

impl SettlementError {
    /// Classify a transport error raised during `action`.
    pub fn from_ledger(action: SettlementAction, err: LedgerError) -> Self {
        match err.class() {
            ErrorClass::TransientInfra => SettlementError::Transient {
                action,
                source: err,
            },
            ErrorClass::DecodeFailure => SettlementError::Decode {
                action,
                reason: err.to_string(),
            },
            _ => SettlementError::Rejected {
                action,
                reason: err.to_string(),
            },
        }
    }

    /// Failure class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            SettlementError::Transient { .. } => ErrorClass::TransientInfra,
            SettlementError::Rejected { .. } | SettlementError::JobNotFound { .. } => {
                ErrorClass::ContractExecutionFailure
            }
            SettlementError::Decode { .. } => ErrorClass::DecodeFailure,
            SettlementError::InvalidTransition { .. } | SettlementError::Conflict { .. } => {
                ErrorClass::InvariantViolation
            }
        }
    }
}

/// Result type alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Result type alias for settlement operations.
pub type SettlementResult<T> = Result<T, SettlementError>;
