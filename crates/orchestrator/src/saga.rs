//! Saga steps for one job.
//!
//! Every step reads or writes the ledger through the settlement gateway,
//! so the job's ledger status always names the step to resume from.

use crate::claim::ClaimGuard;
use crate::metrics::SagaMetrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use veritask_attestation::AttestationProducer;
use veritask_executor::ComputeExecutor;
use veritask_ledger::{
    EscrowSettlement, RetryPolicy, SettlementAction, SettlementError, SettlementGateway,
    SettlementOutcome, SettlementResult,
};
use veritask_types::{Attestation, ErrorClass, Job, JobId, JobStatus};

/// How a saga ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaOutcome {
    /// Attested, paid and marked `Completed`.
    Completed,
    /// Compensated: marked `Failed`, refunded and marked `Refunded`.
    Refunded,
    /// A settlement step failed permanently. The job keeps its last
    /// committed status and is alerted on; periodic sweeps keep retrying it.
    NeedsIntervention {
        /// Failure description.
        reason: String,
    },
    /// A ledger call kept failing transiently. The job keeps its last
    /// committed status and the next periodic sweep resumes it.
    Deferred {
        /// Failure description.
        reason: String,
    },
    /// Nothing to do: the job is claimed by another saga, terminal, or
    /// unknown to the ledger.
    Discarded {
        /// Why the event was dropped.
        reason: String,
    },
    /// Ledger state contradicted the saga. Fatal to this saga only.
    InvariantViolation {
        /// Violated expectation.
        reason: String,
    },
}

impl SagaOutcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            SagaOutcome::Completed => "completed",
            SagaOutcome::Refunded => "refunded",
            SagaOutcome::NeedsIntervention { .. } => "needs_intervention",
            SagaOutcome::Deferred { .. } => "deferred",
            SagaOutcome::Discarded { .. } => "discarded",
            SagaOutcome::InvariantViolation { .. } => "invariant_violation",
        }
    }

    /// Whether the job reached `Completed` or `Refunded`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaOutcome::Completed | SagaOutcome::Refunded)
    }
}

impl std::fmt::Display for SagaOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SagaOutcome::Completed | SagaOutcome::Refunded => f.write_str(self.label()),
            SagaOutcome::NeedsIntervention { reason }
            | SagaOutcome::Deferred { reason }
            | SagaOutcome::Discarded { reason }
            | SagaOutcome::InvariantViolation { reason } => {
                write!(f, "{} ({})", self.label(), reason)
            }
        }
    }
}

/// Holds the active-saga gauge up and times the saga until dropped,
/// including on unwind.
struct ActiveSaga<'a> {
    metrics: &'a SagaMetrics,
    started: Instant,
}

impl<'a> ActiveSaga<'a> {
    fn start(metrics: &'a SagaMetrics) -> Self {
        metrics.active_sagas.inc();
        Self {
            metrics,
            started: Instant::now(),
        }
    }
}

impl Drop for ActiveSaga<'_> {
    fn drop(&mut self) {
        self.metrics.active_sagas.dec();
        self.metrics
            .saga_duration_seconds
            .observe(self.started.elapsed().as_secs_f64());
    }
}

/// Collaborators shared by every saga.
pub(crate) struct SagaContext {
    pub(crate) settlement: Arc<dyn SettlementGateway>,
    pub(crate) executor: Arc<dyn ComputeExecutor>,
    pub(crate) producer: AttestationProducer,
    pub(crate) metrics: Arc<SagaMetrics>,
    /// Schedule for release and refund attempts on top of the gateway's
    /// own transport retries.
    pub(crate) settle_retry: RetryPolicy,
}

impl SagaContext {
    /// Run the saga for the claimed job and release the claim.
    ///
    /// `payload` is the payload carried by the submission event; when absent
    /// the job record's payload is used.
    pub(crate) async fn run(&self, claim: ClaimGuard, payload: Option<Vec<u8>>) -> SagaOutcome {
        let job_id = claim.job_id();
        let active = ActiveSaga::start(&self.metrics);

        let outcome = self.drive(job_id, payload).await;

        drop(active);
        self.record_outcome(job_id, &outcome);

        drop(claim);
        outcome
    }

    /// Count and log a finished saga.
    pub(crate) fn record_outcome(&self, job_id: JobId, outcome: &SagaOutcome) {
        self.metrics.sagas_total.with_label_values(&[outcome.label()]).inc();
        match outcome {
            SagaOutcome::Completed | SagaOutcome::Refunded => {
                info!(job_id = job_id, outcome = %outcome, "Saga finished");
            }
            SagaOutcome::Discarded { reason } => {
                self.metrics.redeliveries_discarded_total.inc();
                debug!(job_id = job_id, reason = %reason, "Job submission discarded");
            }
            SagaOutcome::Deferred { reason } => {
                warn!(job_id = job_id, reason = %reason, "Saga deferred to recovery sweep");
            }
            SagaOutcome::NeedsIntervention { reason } => {
                self.metrics.manual_interventions_total.inc();
                error!(
                    job_id = job_id,
                    alert = "manual_intervention",
                    reason = %reason,
                    "Saga halted, operator action required"
                );
            }
            SagaOutcome::InvariantViolation { reason } => {
                error!(job_id = job_id, reason = %reason, "Saga invariant violated");
            }
        }
    }

    async fn drive(&self, job_id: JobId, payload: Option<Vec<u8>>) -> SagaOutcome {
        self.count(SettlementAction::Query);
        let job: Job = match self.settlement.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                return SagaOutcome::Discarded {
                    reason: "job not found on ledger".to_string(),
                }
            }
            Err(e) => return self.halt(job_id, JobStatus::Submitted, e),
        };
        let payload = payload.unwrap_or_else(|| job.payload_ref.clone());

        match job.status {
            JobStatus::Completed | JobStatus::Refunded => SagaOutcome::Discarded {
                reason: format!("job already {}", job.status),
            },
            JobStatus::Submitted => self.start(job_id, &payload).await,
            JobStatus::InProgress => self.resume_in_progress(job_id, &payload).await,
            JobStatus::Failed => {
                info!(job_id = job_id, "Resuming compensation of failed job");
                self.refund_and_close(job_id).await
            }
        }
    }

    async fn start(&self, job_id: JobId, payload: &[u8]) -> SagaOutcome {
        info!(job_id = job_id, "Starting job");
        if let Err(e) = self.update_status(job_id, JobStatus::InProgress).await {
            return self.halt(job_id, JobStatus::Submitted, e);
        }
        self.execute_and_settle(job_id, payload).await
    }

    /// An `InProgress` job with no saga in this process was interrupted.
    /// A recorded attestation means execution finished; otherwise the
    /// result was lost with the process and the job runs again.
    async fn resume_in_progress(&self, job_id: JobId, payload: &[u8]) -> SagaOutcome {
        self.count(SettlementAction::Query);
        match self.settlement.get_attestation(job_id).await {
            Err(e) => self.halt(job_id, JobStatus::InProgress, e),
            Ok(Some(attestation)) if AttestationProducer::verify(&attestation) => {
                info!(
                    job_id = job_id,
                    result_hash = %attestation.result_hash,
                    "Resuming job at payment release"
                );
                self.settle_success(job_id).await
            }
            Ok(Some(_)) => {
                self.compensate(job_id, "recorded attestation does not verify".to_string())
                    .await
            }
            Ok(None) => {
                info!(job_id = job_id, "Re-executing interrupted job");
                self.execute_and_settle(job_id, payload).await
            }
        }
    }

    async fn execute_and_settle(&self, job_id: JobId, payload: &[u8]) -> SagaOutcome {
        let result = match self.executor.execute(job_id, payload).await {
            Ok(result) => result,
            Err(e) => {
                error!(job_id = job_id, error = %e, "Executor environment fault");
                return self.compensate(job_id, format!("executor fault: {}", e)).await;
            }
        };

        if !result.success {
            let reason = result
                .error
                .unwrap_or_else(|| "execution failed".to_string());
            info!(job_id = job_id, reason = %reason, "Execution failed");
            return self.compensate(job_id, reason).await;
        }
        let Some(result_hash) = result.result_hash else {
            return self
                .compensate(job_id, "execution reported no result hash".to_string())
                .await;
        };
        info!(
            job_id = job_id,
            result_hash = %result_hash,
            execution_time_ms = result.execution_time_ms,
            "Execution succeeded"
        );

        let attestation = match self.sign(job_id, &result_hash, result.execution_time_ms) {
            Ok(attestation) => attestation,
            Err(reason) => return self.compensate(job_id, reason).await,
        };

        self.count(SettlementAction::RecordAttestation);
        match self.settlement.record_attestation(&attestation).await {
            Ok(_) => {}
            Err(e) if e.class() == ErrorClass::InvariantViolation => {
                return self.halt(job_id, JobStatus::InProgress, e)
            }
            Err(e) => {
                return self
                    .compensate(job_id, format!("attestation not recorded: {}", e))
                    .await
            }
        }

        self.settle_success(job_id).await
    }

    /// Sign the result and check the signature before it can be recorded.
    fn sign(&self, job_id: JobId, result_hash: &str, execution_time_ms: u64) -> Result<Attestation, String> {
        let attestation = self
            .producer
            .sign(job_id, result_hash, execution_time_ms)
            .map_err(|e| {
                warn!(job_id = job_id, class = %e.class(), error = %e, "Attestation signing failed");
                format!("attestation signing failed: {}", e)
            })?;

        if attestation.result_hash != result_hash || !AttestationProducer::verify(&attestation) {
            warn!(
                job_id = job_id,
                class = %ErrorClass::AttestationFailure,
                "Fresh attestation failed self-verification, discarding"
            );
            return Err("attestation failed self-verification".to_string());
        }
        Ok(attestation)
    }

    async fn settle_success(&self, job_id: JobId) -> SagaOutcome {
        match self.settle(job_id, EscrowSettlement::Release).await {
            Ok(_) => {}
            Err(e) if e.class() == ErrorClass::InvariantViolation => {
                return self.halt(job_id, JobStatus::InProgress, e)
            }
            Err(e) => {
                return self
                    .compensate(job_id, format!("payment release failed: {}", e))
                    .await
            }
        }

        // Paid: from here on only completion is valid, never a refund.
        match self.update_status(job_id, JobStatus::Completed).await {
            Ok(_) => SagaOutcome::Completed,
            Err(e) => self.halt(job_id, JobStatus::InProgress, e),
        }
    }

    async fn compensate(&self, job_id: JobId, reason: String) -> SagaOutcome {
        warn!(job_id = job_id, reason = %reason, "Compensating job");
        if let Err(e) = self.update_status(job_id, JobStatus::Failed).await {
            return self.halt(job_id, JobStatus::InProgress, e);
        }
        self.refund_and_close(job_id).await
    }

    async fn refund_and_close(&self, job_id: JobId) -> SagaOutcome {
        if let Err(e) = self.settle(job_id, EscrowSettlement::Refund).await {
            return SagaOutcome::NeedsIntervention {
                reason: format!("refund failed, job left Failed: {}", e),
            };
        }
        match self.update_status(job_id, JobStatus::Refunded).await {
            Ok(_) => SagaOutcome::Refunded,
            Err(e) => self.halt(job_id, JobStatus::Failed, e),
        }
    }

    async fn update_status(
        &self,
        job_id: JobId,
        status: JobStatus,
    ) -> SettlementResult<SettlementOutcome> {
        self.count(SettlementAction::UpdateStatus);
        let outcome = self.settlement.update_job_status(job_id, status).await?;
        match &outcome {
            SettlementOutcome::Applied(receipt) => {
                info!(job_id = job_id, status = %status, block = %receipt.block_hash, "Job status committed");
            }
            SettlementOutcome::AlreadyApplied => {
                debug!(job_id = job_id, status = %status, "Job status already committed");
            }
        }
        Ok(outcome)
    }

    /// Release or refund with bounded backoff. Only transient failures are
    /// retried.
    async fn settle(
        &self,
        job_id: JobId,
        settlement: EscrowSettlement,
    ) -> SettlementResult<SettlementOutcome> {
        let action = settlement.action();
        let outcome = self
            .settle_retry
            .run(action.as_str(), move || async move {
                self.count(action);
                match settlement {
                    EscrowSettlement::Release => self.settlement.release_payment(job_id).await,
                    EscrowSettlement::Refund => self.settlement.refund_payment(job_id).await,
                }
            })
            .await?;
        info!(job_id = job_id, action = %action, applied = outcome.was_applied(), "Escrow settled");
        Ok(outcome)
    }

    /// Outcome for a settlement failure that compensation cannot fix.
    fn halt(&self, job_id: JobId, status: JobStatus, err: SettlementError) -> SagaOutcome {
        let reason = format!("{} (job left {})", err, status);
        match err.class() {
            ErrorClass::TransientInfra => SagaOutcome::Deferred { reason },
            ErrorClass::InvariantViolation => SagaOutcome::InvariantViolation { reason },
            class => {
                debug!(job_id = job_id, class = %class, "Permanent settlement failure");
                SagaOutcome::NeedsIntervention { reason }
            }
        }
    }

    fn count(&self, action: SettlementAction) {
        self.metrics
            .settlement_calls_total
            .with_label_values(&[action.as_str()])
            .inc();
    }
}
