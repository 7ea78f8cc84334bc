//! Settlement gateway: the idempotent ledger operations of the saga.

use crate::client::{LedgerClient, Receipt};
use crate::contract::ContractGateway;
use crate::error::{SettlementAction, SettlementError, SettlementResult};
use crate::retry::RetryPolicy;
use crate::schema::{JobProcessor, JobQueue, PaymentEscrow};
use async_trait::async_trait;
use sp_core::sr25519;
use std::sync::Arc;
use tracing::{debug, info, warn};
use veritask_types::{AccountId, Attestation, EscrowStatus, Job, JobFilter, JobId, JobStatus};

/// Outcome of an idempotent settlement write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// The write was submitted and finalized.
    Applied(Receipt),
    /// The ledger was already in the target state; nothing was submitted.
    AlreadyApplied,
}

impl SettlementOutcome {
    /// Whether a transaction was submitted.
    pub fn was_applied(&self) -> bool {
        matches!(self, SettlementOutcome::Applied(_))
    }
}

/// Direction of an escrow settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowSettlement {
    /// Pay out to the provider.
    Release,
    /// Return to the owner.
    Refund,
}

impl EscrowSettlement {
    /// Operation label for errors, logs and metrics.
    pub fn action(self) -> SettlementAction {
        match self {
            EscrowSettlement::Release => SettlementAction::ReleasePayment,
            EscrowSettlement::Refund => SettlementAction::RefundPayment,
        }
    }

    /// Escrow state once the settlement is applied.
    pub fn target(self) -> EscrowStatus {
        match self {
            EscrowSettlement::Release => EscrowStatus::Released,
            EscrowSettlement::Refund => EscrowStatus::Refunded,
        }
    }

    /// Escrow state that rules this settlement out.
    pub fn opposite(self) -> EscrowStatus {
        match self {
            EscrowSettlement::Release => EscrowStatus::Refunded,
            EscrowSettlement::Refund => EscrowStatus::Released,
        }
    }
}

/// Ledger operations the orchestrator depends on.
///
/// Every write is safe to repeat: when the ledger already holds the target
/// state the call returns [`SettlementOutcome::AlreadyApplied`].
/// Reads always reflect committed ledger state.
#[async_trait]
pub trait SettlementGateway: Send + Sync {
    /// Read one job.
    async fn get_job(&self, job_id: JobId) -> SettlementResult<Option<Job>>;

    /// List jobs passing `filter`.
    async fn list_jobs(&self, filter: &JobFilter) -> SettlementResult<Vec<Job>>;

    /// Read the recorded attestation of a job.
    async fn get_attestation(&self, job_id: JobId) -> SettlementResult<Option<Attestation>>;

    /// Read the escrow state of a job.
    async fn escrow_status(&self, job_id: JobId) -> SettlementResult<Option<EscrowStatus>>;

    /// Move a job along the status graph.
    async fn update_job_status(
        &self,
        job_id: JobId,
        status: JobStatus,
    ) -> SettlementResult<SettlementOutcome>;

    /// Persist an attestation. Write-once.
    async fn record_attestation(
        &self,
        attestation: &Attestation,
    ) -> SettlementResult<SettlementOutcome>;

    /// Pay the escrow out to the provider.
    async fn release_payment(&self, job_id: JobId) -> SettlementResult<SettlementOutcome>;

    /// Return the escrow to the owner.
    async fn refund_payment(&self, job_id: JobId) -> SettlementResult<SettlementOutcome>;
}

/// Addresses of the deployed contracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractAddresses {
    /// Job registry and status store.
    pub job_queue: AccountId,
    /// Escrow contract.
    pub payment_escrow: AccountId,
    /// Job intake and attestation store.
    pub job_processor: AccountId,
    /// Optional MEV-protection contract, events only.
    pub mev_protection: Option<AccountId>,
}

/// Settlement gateway backed by the job-queue, escrow and processor
/// contracts.
///
/// Status updates and attestations are signed by the worker key; escrow
/// release and refund by the admin key. Each write re-reads ledger state
/// on every attempt, so a retry after an ambiguous failure never submits
/// a second transaction once the first has landed.
pub struct LedgerSettlementGateway {
    job_queue: ContractGateway<JobQueue>,
    escrow: ContractGateway<PaymentEscrow>,
    processor: ContractGateway<JobProcessor>,
    worker: sr25519::Pair,
    admin: sr25519::Pair,
    retry: RetryPolicy,
}

impl LedgerSettlementGateway {
    /// Build gateways for `addresses` over a shared client.
    pub fn new(
        client: Arc<dyn LedgerClient>,
        addresses: &ContractAddresses,
        worker: sr25519::Pair,
        admin: sr25519::Pair,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            job_queue: ContractGateway::new(Arc::clone(&client), addresses.job_queue.clone()),
            escrow: ContractGateway::new(Arc::clone(&client), addresses.payment_escrow.clone()),
            processor: ContractGateway::new(client, addresses.job_processor.clone()),
            worker,
            admin,
            retry,
        }
    }

    /// Retry policy applied to every ledger call.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    async fn try_get_job(&self, job_id: JobId) -> SettlementResult<Option<Job>> {
        self.job_queue
            .get_job(job_id)
            .await
            .map_err(|e| SettlementError::from_ledger(SettlementAction::Query, e))
    }

    async fn try_escrow_status(&self, job_id: JobId) -> SettlementResult<Option<EscrowStatus>> {
        self.escrow
            .get_escrow_status(job_id)
            .await
            .map_err(|e| SettlementError::from_ledger(SettlementAction::Query, e))
    }

    async fn try_get_attestation(&self, job_id: JobId) -> SettlementResult<Option<Attestation>> {
        self.processor
            .get_attestation(job_id)
            .await
            .map_err(|e| SettlementError::from_ledger(SettlementAction::Query, e))
    }

    async fn try_update_status(
        &self,
        job_id: JobId,
        target: JobStatus,
    ) -> SettlementResult<SettlementOutcome> {
        let action = SettlementAction::UpdateStatus;
        let job = self
            .try_get_job(job_id)
            .await?
            .ok_or(SettlementError::JobNotFound { job_id })?;

        if job.status == target {
            debug!(job_id = job_id, status = %target, "Job already in target status");
            return Ok(SettlementOutcome::AlreadyApplied);
        }
        if !job.status.can_transition_to(target) {
            return Err(SettlementError::InvalidTransition {
                job_id,
                from: job.status,
                to: target,
            });
        }

        let receipt = self
            .job_queue
            .update_job_status(&self.worker, job_id, target)
            .await
            .map_err(|e| SettlementError::from_ledger(action, e))?;

        info!(
            job_id = job_id,
            from = %job.status,
            to = %target,
            block = %receipt.block_hash,
            "Job status updated"
        );
        Ok(SettlementOutcome::Applied(receipt))
    }

    async fn try_record_attestation(
        &self,
        attestation: &Attestation,
    ) -> SettlementResult<SettlementOutcome> {
        let action = SettlementAction::RecordAttestation;
        let job_id = attestation.job_id;

        if let Some(existing) = self.try_get_attestation(job_id).await? {
            if existing.result_hash == attestation.result_hash {
                debug!(job_id = job_id, "Attestation already recorded");
                return Ok(SettlementOutcome::AlreadyApplied);
            }
            return Err(SettlementError::Conflict {
                action,
                job_id,
                reason: format!("attestation for result {} already recorded", existing.result_hash),
            });
        }

        let receipt = self
            .processor
            .record_attestation(&self.worker, attestation)
            .await
            .map_err(|e| SettlementError::from_ledger(action, e))?;

        info!(
            job_id = job_id,
            result_hash = %attestation.result_hash,
            block = %receipt.block_hash,
            "Attestation recorded"
        );
        Ok(SettlementOutcome::Applied(receipt))
    }

    async fn try_settle_escrow(
        &self,
        job_id: JobId,
        settlement: EscrowSettlement,
    ) -> SettlementResult<SettlementOutcome> {
        let action = settlement.action();
        let (target, opposite) = (settlement.target(), settlement.opposite());

        match self.try_escrow_status(job_id).await? {
            None => return Err(SettlementError::JobNotFound { job_id }),
            Some(status) if status == target => {
                debug!(job_id = job_id, escrow = %status, "Escrow already settled");
                return Ok(SettlementOutcome::AlreadyApplied);
            }
            Some(status) if status == opposite => {
                return Err(SettlementError::Conflict {
                    action,
                    job_id,
                    reason: format!("escrow already {}", status),
                });
            }
            Some(_) => {}
        }

        let submitted = match settlement {
            EscrowSettlement::Release => self.escrow.release_payment(&self.admin, job_id).await,
            EscrowSettlement::Refund => self.escrow.refund(&self.admin, job_id).await,
        };
        let receipt = submitted.map_err(|e| SettlementError::from_ledger(action, e))?;

        info!(
            job_id = job_id,
            action = %action,
            block = %receipt.block_hash,
            "Escrow settled"
        );
        Ok(SettlementOutcome::Applied(receipt))
    }
}

#[async_trait]
impl SettlementGateway for LedgerSettlementGateway {
    async fn get_job(&self, job_id: JobId) -> SettlementResult<Option<Job>> {
        self.retry.run("get_job", || self.try_get_job(job_id)).await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> SettlementResult<Vec<Job>> {
        let count = self
            .retry
            .run("get_job_count", move || async move {
                self.job_queue
                    .get_job_count()
                    .await
                    .map_err(|e| SettlementError::from_ledger(SettlementAction::Query, e))
            })
            .await?;

        let mut jobs = Vec::new();
        for job_id in 1..=count {
            match self.get_job(job_id).await? {
                Some(job) if filter.matches(&job) => jobs.push(job),
                Some(_) => {}
                None => warn!(job_id = job_id, count = count, "Job id below count has no record"),
            }
        }
        Ok(jobs)
    }

    async fn get_attestation(&self, job_id: JobId) -> SettlementResult<Option<Attestation>> {
        self.retry
            .run("get_attestation", || self.try_get_attestation(job_id))
            .await
    }

    async fn escrow_status(&self, job_id: JobId) -> SettlementResult<Option<EscrowStatus>> {
        self.retry
            .run("get_escrow_status", || self.try_escrow_status(job_id))
            .await
    }

    async fn update_job_status(
        &self,
        job_id: JobId,
        status: JobStatus,
    ) -> SettlementResult<SettlementOutcome> {
        self.retry
            .run(SettlementAction::UpdateStatus.as_str(), || {
                self.try_update_status(job_id, status)
            })
            .await
    }

    async fn record_attestation(
        &self,
        attestation: &Attestation,
    ) -> SettlementResult<SettlementOutcome> {
        self.retry
            .run(SettlementAction::RecordAttestation.as_str(), || {
                self.try_record_attestation(attestation)
            })
            .await
    }

    async fn release_payment(&self, job_id: JobId) -> SettlementResult<SettlementOutcome> {
        let settlement = EscrowSettlement::Release;
        self.retry
            .run(settlement.action().as_str(), || {
                self.try_settle_escrow(job_id, settlement)
            })
            .await
    }

    async fn refund_payment(&self, job_id: JobId) -> SettlementResult<SettlementOutcome> {
        let settlement = EscrowSettlement::Refund;
        self.retry
            .run(settlement.action().as_str(), || {
                self.try_settle_escrow(job_id, settlement)
            })
            .await
    }
}
