//! Decoded contract events.
//!
//! One variant per known contract/event pair. Events from a known contract
//! with an unrecognised variant land in [`DecodedEvent::Unknown`] instead of
//! being decoded loosely.

use crate::job::{JobId, JobStatus};
use crate::AccountId;

/// Position of an event in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    /// Block number.
    pub number: u64,
    /// Block hash, `0x`-prefixed hex.
    pub hash: String,
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} ({})", self.number, self.hash)
    }
}

/// A job was registered on the job-processor contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSubmitted {
    /// Emitting contract.
    pub contract: AccountId,
    /// Block that carried the event.
    pub block: BlockRef,
    /// New job.
    pub job_id: JobId,
    /// Encrypted payload as submitted.
    pub encrypted_payload: Vec<u8>,
}

/// The job-queue contract recorded a status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatusChanged {
    /// Emitting contract.
    pub contract: AccountId,
    /// Block that carried the event.
    pub block: BlockRef,
    /// Job whose status changed.
    pub job_id: JobId,
    /// New status.
    pub status: JobStatus,
}

/// The MEV-protection contract sealed a batch of intents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MevIntentBatched {
    /// Emitting contract.
    pub contract: AccountId,
    /// Block that carried the event.
    pub block: BlockRef,
    /// Batch identifier.
    pub batch_id: u64,
    /// Intents in the batch.
    pub intent_count: u32,
}

/// Event from a known contract whose variant has no typed decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEvent {
    /// Emitting contract.
    pub contract: AccountId,
    /// Block that carried the event.
    pub block: BlockRef,
    /// Variant index found in the event data, if any.
    pub variant: Option<u8>,
}

/// Closed union of events the node understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// See [`JobSubmitted`].
    JobSubmitted(JobSubmitted),
    /// See [`JobStatusChanged`].
    JobStatusChanged(JobStatusChanged),
    /// See [`MevIntentBatched`].
    MevIntentBatched(MevIntentBatched),
    /// See [`UnknownEvent`].
    Unknown(UnknownEvent),
}

impl DecodedEvent {
    /// Emitting contract.
    pub fn contract(&self) -> &AccountId {
        match self {
            DecodedEvent::JobSubmitted(e) => &e.contract,
            DecodedEvent::JobStatusChanged(e) => &e.contract,
            DecodedEvent::MevIntentBatched(e) => &e.contract,
            DecodedEvent::Unknown(e) => &e.contract,
        }
    }

    /// Block that carried the event.
    pub fn block(&self) -> &BlockRef {
        match self {
            DecodedEvent::JobSubmitted(e) => &e.block,
            DecodedEvent::JobStatusChanged(e) => &e.block,
            DecodedEvent::MevIntentBatched(e) => &e.block,
            DecodedEvent::Unknown(e) => &e.block,
        }
    }

    /// Short variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodedEvent::JobSubmitted(_) => "JobSubmitted",
            DecodedEvent::JobStatusChanged(_) => "JobStatusChanged",
            DecodedEvent::MevIntentBatched(_) => "MevIntentBatched",
            DecodedEvent::Unknown(_) => "Unknown",
        }
    }
}
