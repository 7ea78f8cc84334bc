//! # Veritask Types
//!
//! Domain types shared by every Veritask crate: the ledger job record and
//! its status graph, execution results, attestations, the compute payload
//! envelope and the closed set of decoded contract events.
//!
//! The ledger owns every [`Job`]; values of these types held in memory are
//! working copies only.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attestation;
pub mod error;
pub mod event;
pub mod execution;
pub mod job;
pub mod payload;

pub use attestation::{Attestation, AttestationRecord, RecordError};
pub use error::ErrorClass;
pub use event::{
    BlockRef, DecodedEvent, JobStatusChanged, JobSubmitted, MevIntentBatched, UnknownEvent,
};
pub use execution::ExecutionResult;
pub use job::{EscrowStatus, Job, JobFilter, JobId, JobStatus, JobStatusView};
pub use payload::{ComputePayload, GenerationParameters, PayloadDecoding};

/// Account identifier used for contract addresses and job parties.
pub type AccountId = sp_core::crypto::AccountId32;

/// Balance in the smallest ledger denomination.
pub type Balance = u128;
