//! Contract schemas: messages, wire types and event layouts.
//!
//! Event data follows the ink! layout: one byte of event variant index,
//! then the SCALE-encoded fields. Bytes after the known fields are
//! ignored so contracts may append fields.

use crate::client::Receipt;
use crate::contract::{ContractGateway, Message};
use crate::error::{LedgerError, LedgerResult};
use parity_scale_codec::Decode;
use sp_core::sr25519;
use veritask_types::{
    AccountId, BlockRef, DecodedEvent, EscrowStatus, Job, JobId, JobStatus, JobStatusChanged,
    JobSubmitted, MevIntentBatched, UnknownEvent,
};

/// Message set and event layout of one contract.
pub trait ContractSchema: Send + Sync + 'static {
    /// Contract name, for logs.
    const NAME: &'static str;

    /// Decode event data emitted by `contract`.
    ///
    /// The default treats every variant as unknown.
    fn decode_event(contract: &AccountId, block: &BlockRef, data: &[u8]) -> LedgerResult<DecodedEvent> {
        let (variant, _) = split_variant(data)?;
        Ok(unknown(contract, block, variant))
    }
}

/// SCALE wire types shared with the contracts.
pub mod wire {
    use parity_scale_codec::{Decode, Encode};
    use veritask_types::{AccountId, Attestation, EscrowStatus, Job, JobStatus};

    /// ink! language-level error wrapping every message output.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
    pub enum LangError {
        /// The contract could not decode the call input.
        CouldNotReadInput,
    }

    /// Job status as stored by the job-queue contract.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
    pub enum WireJobStatus {
        /// See [`JobStatus::Submitted`].
        Submitted,
        /// See [`JobStatus::InProgress`].
        InProgress,
        /// See [`JobStatus::Completed`].
        Completed,
        /// See [`JobStatus::Failed`].
        Failed,
        /// See [`JobStatus::Refunded`].
        Refunded,
    }

    impl From<JobStatus> for WireJobStatus {
        fn from(status: JobStatus) -> Self {
            match status {
                JobStatus::Submitted => WireJobStatus::Submitted,
                JobStatus::InProgress => WireJobStatus::InProgress,
                JobStatus::Completed => WireJobStatus::Completed,
                JobStatus::Failed => WireJobStatus::Failed,
                JobStatus::Refunded => WireJobStatus::Refunded,
            }
        }
    }

    impl From<WireJobStatus> for JobStatus {
        fn from(status: WireJobStatus) -> Self {
            match status {
                WireJobStatus::Submitted => JobStatus::Submitted,
                WireJobStatus::InProgress => JobStatus::InProgress,
                WireJobStatus::Completed => JobStatus::Completed,
                WireJobStatus::Failed => JobStatus::Failed,
                WireJobStatus::Refunded => JobStatus::Refunded,
            }
        }
    }

    /// Escrow state as stored by the payment-escrow contract.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
    pub enum WireEscrowStatus {
        /// Funds held.
        Locked,
        /// Paid to provider.
        Released,
        /// Returned to owner.
        Refunded,
    }

    impl From<WireEscrowStatus> for EscrowStatus {
        fn from(status: WireEscrowStatus) -> Self {
            match status {
                WireEscrowStatus::Locked => EscrowStatus::Locked,
                WireEscrowStatus::Released => EscrowStatus::Released,
                WireEscrowStatus::Refunded => EscrowStatus::Refunded,
            }
        }
    }

    /// Job record layout of the job-queue contract.
    #[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
    pub struct JobRecord {
        /// Job id.
        pub job_id: u64,
        /// Submitter.
        pub owner: AccountId,
        /// Assigned provider.
        pub provider: Option<AccountId>,
        /// Escrowed budget.
        pub budget: u128,
        /// Current status.
        pub status: WireJobStatus,
        /// Encrypted payload.
        pub payload: Vec<u8>,
        /// Raw result digest.
        pub result_hash: Option<[u8; 32]>,
        /// Creation timestamp, ms.
        pub created_at: u64,
        /// Update timestamp, ms.
        pub updated_at: u64,
    }

    impl From<JobRecord> for Job {
        fn from(record: JobRecord) -> Self {
            Job {
                job_id: record.job_id,
                status: record.status.into(),
                owner: record.owner,
                provider: record.provider,
                budget: record.budget,
                payload_ref: record.payload,
                result_hash: record.result_hash.map(hex::encode),
                created_at: record.created_at,
                updated_at: record.updated_at,
            }
        }
    }

    /// Attestation layout of the job-processor contract.
    #[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
    pub struct AttestationData {
        /// Job id.
        pub job_id: u64,
        /// Raw result digest.
        pub result_hash: [u8; 32],
        /// Signature bytes.
        pub proof: Vec<u8>,
        /// Worker public key.
        pub worker_pubkey: [u8; 32],
        /// Signing time, ms.
        pub timestamp: u64,
        /// Execution time in the signed message.
        pub execution_time_ms: u64,
    }

    impl From<AttestationData> for Attestation {
        fn from(data: AttestationData) -> Self {
            Attestation {
                job_id: data.job_id,
                result_hash: hex::encode(data.result_hash),
                proof: data.proof,
                worker_pubkey: data.worker_pubkey,
                timestamp: data.timestamp,
                execution_time_ms: data.execution_time_ms,
            }
        }
    }
}

use wire::{AttestationData, JobRecord, WireEscrowStatus, WireJobStatus};

/// Job registry and status store.
#[derive(Debug, Clone, Copy)]
pub struct JobQueue;

impl JobQueue {
    /// `get_job(job_id) -> Option<Job>`
    pub const GET_JOB: Message = Message::query("get_job");
    /// `get_job_count() -> u64`
    pub const GET_JOB_COUNT: Message = Message::query("get_job_count");
    /// `update_job_status(job_id, status)`
    pub const UPDATE_JOB_STATUS: Message = Message::transaction("update_job_status");
}

impl ContractSchema for JobQueue {
    const NAME: &'static str = "job_queue";

    fn decode_event(contract: &AccountId, block: &BlockRef, data: &[u8]) -> LedgerResult<DecodedEvent> {
        let (variant, mut fields) = split_variant(data)?;
        match variant {
            0 => {
                let job_id = u64::decode(&mut fields)?;
                let status = WireJobStatus::decode(&mut fields)?;
                Ok(DecodedEvent::JobStatusChanged(JobStatusChanged {
                    contract: contract.clone(),
                    block: block.clone(),
                    job_id,
                    status: status.into(),
                }))
            }
            other => Ok(unknown(contract, block, other)),
        }
    }
}

impl ContractGateway<JobQueue> {
    /// Read a job record.
    pub async fn get_job(&self, job_id: JobId) -> LedgerResult<Option<Job>> {
        let record: Option<JobRecord> = self.query(JobQueue::GET_JOB, job_id).await?;
        Ok(record.map(Job::from))
    }

    /// Number of jobs ever registered. Ids run from 1 to this count.
    pub async fn get_job_count(&self) -> LedgerResult<u64> {
        self.query(JobQueue::GET_JOB_COUNT, ()).await
    }

    /// Write a new status.
    pub async fn update_job_status(
        &self,
        signer: &sr25519::Pair,
        job_id: JobId,
        status: JobStatus,
    ) -> LedgerResult<Receipt> {
        self.execute(
            JobQueue::UPDATE_JOB_STATUS,
            signer,
            (job_id, WireJobStatus::from(status)),
        )
        .await
    }
}

/// Escrow holding job budgets.
#[derive(Debug, Clone, Copy)]
pub struct PaymentEscrow;

impl PaymentEscrow {
    /// `release_payment(job_id)`
    pub const RELEASE_PAYMENT: Message = Message::transaction("release_payment");
    /// `refund(job_id)`
    pub const REFUND: Message = Message::transaction("refund");
    /// `get_escrow_status(job_id) -> Option<EscrowStatus>`
    pub const GET_ESCROW_STATUS: Message = Message::query("get_escrow_status");
}

impl ContractSchema for PaymentEscrow {
    const NAME: &'static str = "payment_escrow";
}

impl ContractGateway<PaymentEscrow> {
    /// Current escrow state, `None` when no escrow exists for the job.
    pub async fn get_escrow_status(&self, job_id: JobId) -> LedgerResult<Option<EscrowStatus>> {
        let status: Option<WireEscrowStatus> =
            self.query(PaymentEscrow::GET_ESCROW_STATUS, job_id).await?;
        Ok(status.map(EscrowStatus::from))
    }

    /// Pay the escrow out to the provider.
    pub async fn release_payment(&self, signer: &sr25519::Pair, job_id: JobId) -> LedgerResult<Receipt> {
        self.execute(PaymentEscrow::RELEASE_PAYMENT, signer, job_id).await
    }

    /// Return the escrow to the owner.
    pub async fn refund(&self, signer: &sr25519::Pair, job_id: JobId) -> LedgerResult<Receipt> {
        self.execute(PaymentEscrow::REFUND, signer, job_id).await
    }
}

/// Confidential job intake and attestation store.
#[derive(Debug, Clone, Copy)]
pub struct JobProcessor;

impl JobProcessor {
    /// `record_attestation(job_id, result_hash, proof, worker_pubkey, timestamp, execution_time_ms)`
    pub const RECORD_ATTESTATION: Message = Message::transaction("record_attestation");
    /// `get_attestation(job_id) -> Option<Attestation>`
    pub const GET_ATTESTATION: Message = Message::query("get_attestation");
}

impl ContractSchema for JobProcessor {
    const NAME: &'static str = "job_processor";

    fn decode_event(contract: &AccountId, block: &BlockRef, data: &[u8]) -> LedgerResult<DecodedEvent> {
        let (variant, mut fields) = split_variant(data)?;
        match variant {
            0 => {
                let job_id = u64::decode(&mut fields)?;
                let encrypted_payload = Vec::<u8>::decode(&mut fields)?;
                Ok(DecodedEvent::JobSubmitted(JobSubmitted {
                    contract: contract.clone(),
                    block: block.clone(),
                    job_id,
                    encrypted_payload,
                }))
            }
            other => Ok(unknown(contract, block, other)),
        }
    }
}

impl ContractGateway<JobProcessor> {
    /// Recorded attestation, if any.
    pub async fn get_attestation(
        &self,
        job_id: JobId,
    ) -> LedgerResult<Option<veritask_types::Attestation>> {
        let data: Option<AttestationData> =
            self.query(JobProcessor::GET_ATTESTATION, job_id).await?;
        Ok(data.map(Into::into))
    }

    /// Persist an attestation.
    pub async fn record_attestation(
        &self,
        signer: &sr25519::Pair,
        attestation: &veritask_types::Attestation,
    ) -> LedgerResult<Receipt> {
        let result_hash = decode_digest(&attestation.result_hash)?;
        self.execute(
            JobProcessor::RECORD_ATTESTATION,
            signer,
            (
                attestation.job_id,
                result_hash,
                attestation.proof.clone(),
                attestation.worker_pubkey,
                attestation.timestamp,
                attestation.execution_time_ms,
            ),
        )
        .await
    }
}

/// MEV-protection intent batcher. Only its events are consumed.
#[derive(Debug, Clone, Copy)]
pub struct MevProtection;

impl ContractSchema for MevProtection {
    const NAME: &'static str = "mev_protection";

    fn decode_event(contract: &AccountId, block: &BlockRef, data: &[u8]) -> LedgerResult<DecodedEvent> {
        let (variant, mut fields) = split_variant(data)?;
        match variant {
            0 => {
                let batch_id = u64::decode(&mut fields)?;
                let intent_count = u32::decode(&mut fields)?;
                Ok(DecodedEvent::MevIntentBatched(MevIntentBatched {
                    contract: contract.clone(),
                    block: block.clone(),
                    batch_id,
                    intent_count,
                }))
            }
            other => Ok(unknown(contract, block, other)),
        }
    }
}

fn split_variant(data: &[u8]) -> LedgerResult<(u8, &[u8])> {
    data.split_first()
        .map(|(variant, fields)| (*variant, fields))
        .ok_or_else(|| LedgerError::Decode("empty event data".to_string()))
}

fn unknown(contract: &AccountId, block: &BlockRef, variant: u8) -> DecodedEvent {
    DecodedEvent::Unknown(UnknownEvent {
        contract: contract.clone(),
        block: block.clone(),
        variant: Some(variant),
    })
}

fn decode_digest(result_hash: &str) -> LedgerResult<[u8; 32]> {
    let bytes = hex::decode(result_hash.trim_start_matches("0x"))
        .map_err(|e| LedgerError::Decode(format!("result hash: {}", e)))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| LedgerError::Decode(format!("result hash has {} bytes", bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_scale_codec::Encode;

    fn block() -> BlockRef {
        BlockRef {
            number: 12,
            hash: "0xabc".to_string(),
        }
    }

    fn contract() -> AccountId {
        AccountId::from([9u8; 32])
    }

    fn event(variant: u8, fields: impl Encode) -> Vec<u8> {
        let mut data = vec![variant];
        data.extend(fields.encode());
        data
    }

    #[test]
    fn test_decode_job_submitted() {
        let data = event(0, (1001u64, b"cGF5bG9hZA==".to_vec()));
        let decoded = JobProcessor::decode_event(&contract(), &block(), &data).unwrap();
        match decoded {
            DecodedEvent::JobSubmitted(e) => {
                assert_eq!(e.job_id, 1001);
                assert_eq!(e.encrypted_payload, b"cGF5bG9hZA==".to_vec());
                assert_eq!(e.block.number, 12);
            }
            other => panic!("Expected JobSubmitted, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_status_changed() {
        let data = event(0, (5u64, WireJobStatus::Failed));
        let decoded = JobQueue::decode_event(&contract(), &block(), &data).unwrap();
        assert!(matches!(
            decoded,
            DecodedEvent::JobStatusChanged(JobStatusChanged { job_id: 5, status: JobStatus::Failed, .. })
        ));
    }

    #[test]
    fn test_decode_mev_batch() {
        let data = event(0, (77u64, 12u32));
        let decoded = MevProtection::decode_event(&contract(), &block(), &data).unwrap();
        assert!(matches!(
            decoded,
            DecodedEvent::MevIntentBatched(MevIntentBatched { batch_id: 77, intent_count: 12, .. })
        ));
    }

    #[test]
    fn test_unrecognised_variant_is_unknown() {
        let data = event(3, 1u8);
        let decoded = JobProcessor::decode_event(&contract(), &block(), &data).unwrap();
        assert!(matches!(
            decoded,
            DecodedEvent::Unknown(UnknownEvent { variant: Some(3), .. })
        ));

        let escrow = PaymentEscrow::decode_event(&contract(), &block(), &[0, 1, 2]).unwrap();
        assert_eq!(escrow.kind(), "Unknown");
    }

    #[test]
    fn test_truncated_event_is_decode_error() {
        let data = vec![0u8, 1, 2];
        assert!(matches!(
            JobProcessor::decode_event(&contract(), &block(), &data),
            Err(LedgerError::Decode(_))
        ));
        assert!(matches!(
            JobQueue::decode_event(&contract(), &block(), &[]),
            Err(LedgerError::Decode(_))
        ));
    }

    #[test]
    fn test_job_record_conversion() {
        let record = wire::JobRecord {
            job_id: 3,
            owner: AccountId::from([1u8; 32]),
            provider: None,
            budget: 500,
            status: WireJobStatus::Completed,
            payload: vec![1],
            result_hash: Some([0xab; 32]),
            created_at: 10,
            updated_at: 20,
        };
        let job = Job::from(record);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_hash, Some("ab".repeat(32)));
    }
}
