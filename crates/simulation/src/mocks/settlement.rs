//! In-memory settlement gateway.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use veritask_ledger::{
    EscrowSettlement, LedgerError, Receipt, SettlementAction, SettlementError, SettlementGateway,
    SettlementOutcome, SettlementResult,
};
use veritask_types::{AccountId, Attestation, EscrowStatus, Job, JobFilter, JobId, JobStatus};

/// A call received by the mock, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementCall {
    /// `update_job_status`
    UpdateStatus {
        /// Job
        job_id: JobId,
        /// Requested status
        status: JobStatus,
    },
    /// `record_attestation`
    RecordAttestation {
        /// Job
        job_id: JobId,
    },
    /// `release_payment`
    Release {
        /// Job
        job_id: JobId,
    },
    /// `refund_payment`
    Refund {
        /// Job
        job_id: JobId,
    },
}

/// Ledger contents held by the mock.
#[derive(Debug, Clone, Default)]
pub struct MockLedgerState {
    /// Job records.
    pub jobs: BTreeMap<JobId, Job>,
    /// Escrow per job.
    pub escrows: HashMap<JobId, EscrowStatus>,
    /// Recorded attestations.
    pub attestations: HashMap<JobId, Attestation>,
    /// Committed statuses per job, starting with the initial one.
    pub history: HashMap<JobId, Vec<JobStatus>>,
    /// Every write call received.
    pub calls: Vec<SettlementCall>,
    transient_faults: HashMap<SettlementAction, u32>,
    permanent_faults: HashMap<SettlementAction, String>,
    block: u64,
}

impl MockLedgerState {
    fn inject(&mut self, action: SettlementAction) -> SettlementResult<()> {
        if let Some(reason) = self.permanent_faults.get(&action) {
            return Err(SettlementError::Rejected {
                action,
                reason: reason.clone(),
            });
        }
        if let Some(remaining) = self.transient_faults.get_mut(&action) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SettlementError::Transient {
                    action,
                    source: LedgerError::Rpc("injected timeout".to_string()),
                });
            }
        }
        Ok(())
    }

    fn receipt(&mut self) -> Receipt {
        self.block += 1;
        Receipt {
            block_hash: format!("0x{:064x}", self.block),
            extrinsic_hash: format!("0x{:064x}", self.block << 8),
        }
    }

    fn count(&self, matches: impl Fn(&SettlementCall) -> bool) -> usize {
        self.calls.iter().filter(|call| matches(call)).count()
    }
}

/// Settlement gateway over in-memory ledger state.
///
/// Applies the same rules as the ledger adapter: repeated writes return
/// `AlreadyApplied`, status changes follow the status graph, escrow
/// settles once and attestations are write-once. Faults can be injected
/// per action.
#[derive(Debug, Default)]
pub struct MockSettlementGateway {
    state: Mutex<MockLedgerState>,
    latency: Option<Duration>,
}

impl MockSettlementGateway {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Register a `Submitted` job with a locked escrow.
    pub async fn submit_job(&self, job_id: JobId, payload: Vec<u8>) {
        self.insert_job(job_id, JobStatus::Submitted, payload, Some(EscrowStatus::Locked))
            .await;
    }

    /// Register a job in any status.
    pub async fn insert_job(
        &self,
        job_id: JobId,
        status: JobStatus,
        payload: Vec<u8>,
        escrow: Option<EscrowStatus>,
    ) {
        let mut state = self.state.lock().await;
        state.jobs.insert(
            job_id,
            Job {
                job_id,
                status,
                owner: AccountId::from([0x11; 32]),
                provider: Some(AccountId::from([0x22; 32])),
                budget: 1_000_000,
                payload_ref: payload,
                result_hash: None,
                created_at: 1_700_000_000_000,
                updated_at: 1_700_000_000_000,
            },
        );
        state.history.insert(job_id, vec![status]);
        if let Some(escrow) = escrow {
            state.escrows.insert(job_id, escrow);
        }
    }

    /// Store an attestation directly, as if recorded before a crash.
    pub async fn insert_attestation(&self, attestation: Attestation) {
        self.state
            .lock()
            .await
            .attestations
            .insert(attestation.job_id, attestation);
    }

    /// Fail the next `times` calls of `action` with a transient error.
    pub async fn fail_transiently(&self, action: SettlementAction, times: u32) {
        self.state.lock().await.transient_faults.insert(action, times);
    }

    /// Reject every call of `action`.
    pub async fn fail_permanently(&self, action: SettlementAction, reason: &str) {
        self.state
            .lock()
            .await
            .permanent_faults
            .insert(action, reason.to_string());
    }

    /// Stop rejecting `action`.
    pub async fn clear_faults(&self, action: SettlementAction) {
        let mut state = self.state.lock().await;
        state.permanent_faults.remove(&action);
        state.transient_faults.remove(&action);
    }

    /// Copy of the ledger state.
    pub async fn snapshot(&self) -> MockLedgerState {
        self.state.lock().await.clone()
    }

    /// Committed status of `job_id`.
    pub async fn status(&self, job_id: JobId) -> Option<JobStatus> {
        self.state.lock().await.jobs.get(&job_id).map(|job| job.status)
    }

    /// Committed statuses of `job_id`, oldest first.
    pub async fn status_history(&self, job_id: JobId) -> Vec<JobStatus> {
        self.state
            .lock()
            .await
            .history
            .get(&job_id)
            .cloned()
            .unwrap_or_default()
    }

    /// `release_payment` calls received for `job_id`.
    pub async fn release_calls(&self, job_id: JobId) -> usize {
        self.state
            .lock()
            .await
            .count(|call| *call == SettlementCall::Release { job_id })
    }

    /// `refund_payment` calls received for `job_id`.
    pub async fn refund_calls(&self, job_id: JobId) -> usize {
        self.state
            .lock()
            .await
            .count(|call| *call == SettlementCall::Refund { job_id })
    }

    /// Recorded attestation of `job_id`.
    pub async fn attestation(&self, job_id: JobId) -> Option<Attestation> {
        self.state.lock().await.attestations.get(&job_id).cloned()
    }

    /// Escrow state of `job_id`.
    pub async fn escrow(&self, job_id: JobId) -> Option<EscrowStatus> {
        self.state.lock().await.escrows.get(&job_id).copied()
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    async fn settle_escrow(
        &self,
        job_id: JobId,
        settlement: EscrowSettlement,
    ) -> SettlementResult<SettlementOutcome> {
        self.delay().await;
        let action = settlement.action();
        let mut state = self.state.lock().await;
        state.calls.push(match settlement {
            EscrowSettlement::Release => SettlementCall::Release { job_id },
            EscrowSettlement::Refund => SettlementCall::Refund { job_id },
        });
        state.inject(action)?;

        let (target, opposite) = (settlement.target(), settlement.opposite());
        match state.escrows.get(&job_id).copied() {
            None => Err(SettlementError::JobNotFound { job_id }),
            Some(status) if status == target => Ok(SettlementOutcome::AlreadyApplied),
            Some(status) if status == opposite => Err(SettlementError::Conflict {
                action,
                job_id,
                reason: format!("escrow already {}", status),
            }),
            Some(_) => {
                state.escrows.insert(job_id, target);
                Ok(SettlementOutcome::Applied(state.receipt()))
            }
        }
    }
}

#[async_trait]
impl SettlementGateway for MockSettlementGateway {
    async fn get_job(&self, job_id: JobId) -> SettlementResult<Option<Job>> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.inject(SettlementAction::Query)?;
        Ok(state.jobs.get(&job_id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> SettlementResult<Vec<Job>> {
        let mut state = self.state.lock().await;
        state.inject(SettlementAction::Query)?;
        Ok(state
            .jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect())
    }

    async fn get_attestation(&self, job_id: JobId) -> SettlementResult<Option<Attestation>> {
        let mut state = self.state.lock().await;
        state.inject(SettlementAction::Query)?;
        Ok(state.attestations.get(&job_id).cloned())
    }

    async fn escrow_status(&self, job_id: JobId) -> SettlementResult<Option<EscrowStatus>> {
        let mut state = self.state.lock().await;
        state.inject(SettlementAction::Query)?;
        Ok(state.escrows.get(&job_id).copied())
    }

    async fn update_job_status(
        &self,
        job_id: JobId,
        status: JobStatus,
    ) -> SettlementResult<SettlementOutcome> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.calls.push(SettlementCall::UpdateStatus { job_id, status });
        state.inject(SettlementAction::UpdateStatus)?;

        let current = state
            .jobs
            .get(&job_id)
            .map(|job| job.status)
            .ok_or(SettlementError::JobNotFound { job_id })?;
        if current == status {
            return Ok(SettlementOutcome::AlreadyApplied);
        }
        if !current.can_transition_to(status) {
            return Err(SettlementError::InvalidTransition {
                job_id,
                from: current,
                to: status,
            });
        }

        let receipt = state.receipt();
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.status = status;
            job.updated_at += 1;
        }
        state.history.entry(job_id).or_default().push(status);
        Ok(SettlementOutcome::Applied(receipt))
    }

    async fn record_attestation(
        &self,
        attestation: &Attestation,
    ) -> SettlementResult<SettlementOutcome> {
        self.delay().await;
        let job_id = attestation.job_id;
        let mut state = self.state.lock().await;
        state.calls.push(SettlementCall::RecordAttestation { job_id });
        state.inject(SettlementAction::RecordAttestation)?;

        if let Some(existing) = state.attestations.get(&job_id) {
            if existing.result_hash == attestation.result_hash {
                return Ok(SettlementOutcome::AlreadyApplied);
            }
            return Err(SettlementError::Conflict {
                action: SettlementAction::RecordAttestation,
                job_id,
                reason: "attestation already recorded".to_string(),
            });
        }
        state.attestations.insert(job_id, attestation.clone());
        Ok(SettlementOutcome::Applied(state.receipt()))
    }

    async fn release_payment(&self, job_id: JobId) -> SettlementResult<SettlementOutcome> {
        self.settle_escrow(job_id, EscrowSettlement::Release)
            .await
    }

    async fn refund_payment(&self, job_id: JobId) -> SettlementResult<SettlementOutcome> {
        self.settle_escrow(job_id, EscrowSettlement::Refund)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_enforces_status_graph() {
        let gateway = MockSettlementGateway::new();
        gateway.submit_job(1, Vec::new()).await;

        assert!(matches!(
            gateway.update_job_status(1, JobStatus::Completed).await,
            Err(SettlementError::InvalidTransition { .. })
        ));
        assert!(gateway
            .update_job_status(1, JobStatus::InProgress)
            .await
            .unwrap()
            .was_applied());
        assert_eq!(
            gateway.update_job_status(1, JobStatus::InProgress).await.unwrap(),
            SettlementOutcome::AlreadyApplied
        );
        assert_eq!(
            gateway.status_history(1).await,
            vec![JobStatus::Submitted, JobStatus::InProgress]
        );
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let gateway = MockSettlementGateway::new();
        gateway.submit_job(1, Vec::new()).await;
        gateway
            .fail_transiently(SettlementAction::ReleasePayment, 1)
            .await;

        let err = gateway.release_payment(1).await.unwrap_err();
        assert!(err.class().is_retryable());
        assert!(gateway.release_payment(1).await.unwrap().was_applied());
        assert!(matches!(
            gateway.refund_payment(1).await,
            Err(SettlementError::Conflict { .. })
        ));
        assert_eq!(gateway.release_calls(1).await, 2);
    }
}
