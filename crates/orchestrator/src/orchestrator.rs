//! Intake loop, worker pool and recovery sweep.

use crate::claim::ClaimTable;
use crate::error::SagaResult;
use crate::metrics::SagaMetrics;
use crate::saga::{SagaContext, SagaOutcome};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use veritask_attestation::AttestationProducer;
use veritask_executor::ComputeExecutor;
use veritask_ledger::{RetryPolicy, SettlementGateway};
use veritask_types::{JobFilter, JobId, JobStatus, JobSubmitted};

/// Configuration for the job orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Maximum sagas running at once.
    pub concurrency_limit: usize,
    /// Attempts for each payment release or refund.
    pub release_attempts: u32,
    /// Delay before the second release or refund attempt (ms).
    pub release_backoff_ms: u64,
    /// Run the recovery sweep when the intake loop starts.
    pub recover_on_start: bool,
    /// Period of the recovery sweep while running (ms). `0` disables it.
    pub sweep_interval_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            release_attempts: 3,
            release_backoff_ms: 1_000,
            recover_on_start: true,
            sweep_interval_ms: 30_000,
        }
    }
}

impl OrchestratorConfig {
    fn settle_retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.release_attempts.max(1),
            initial_backoff_ms: self.release_backoff_ms,
            max_backoff_ms: self.release_backoff_ms.saturating_mul(8),
            multiplier: 2.0,
        }
    }

    fn sweep_timer(&self) -> Option<Interval> {
        if self.sweep_interval_ms == 0 {
            return None;
        }
        let period = Duration::from_millis(self.sweep_interval_ms);
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(timer)
    }
}

/// Result of a recovery sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Non-terminal jobs found on the ledger.
    pub examined: usize,
    /// Jobs skipped because a saga already held them.
    pub skipped: Vec<JobId>,
    /// Outcome per resumed job.
    pub outcomes: BTreeMap<JobId, SagaOutcome>,
}

impl RecoveryReport {
    /// Resumed jobs whose outcome has `label`.
    pub fn count(&self, label: &str) -> usize {
        self.outcomes
            .values()
            .filter(|outcome| outcome.label() == label)
            .count()
    }
}

/// Saga coordinator.
///
/// Each submission runs as its own task on a pool bounded by
/// `concurrency_limit`. Sagas for different jobs run concurrently; a
/// second submission for a job whose saga is still running is discarded.
#[derive(Clone)]
pub struct JobOrchestrator {
    config: OrchestratorConfig,
    ctx: Arc<SagaContext>,
    claims: Arc<ClaimTable>,
    pool: Arc<Semaphore>,
}

impl JobOrchestrator {
    /// Create an orchestrator over its collaborators.
    pub fn new(
        config: OrchestratorConfig,
        settlement: Arc<dyn SettlementGateway>,
        executor: Arc<dyn ComputeExecutor>,
        producer: AttestationProducer,
        metrics: Arc<SagaMetrics>,
    ) -> Self {
        let ctx = SagaContext {
            settlement,
            executor,
            producer,
            metrics,
            settle_retry: config.settle_retry(),
        };
        let pool = Arc::new(Semaphore::new(config.concurrency_limit.max(1)));

        Self {
            config,
            ctx: Arc::new(ctx),
            claims: Arc::new(ClaimTable::new()),
            pool,
        }
    }

    /// Get the orchestrator configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Claim table shared by all sagas.
    pub fn claims(&self) -> &ClaimTable {
        &self.claims
    }

    /// Saga metrics.
    pub fn metrics(&self) -> &SagaMetrics {
        &self.ctx.metrics
    }

    /// Consume submissions until shutdown or until the intake closes, then
    /// wait for running sagas to finish.
    ///
    /// Runs the recovery sweep at start when `recover_on_start` is set and
    /// every `sweep_interval_ms` after that, so jobs left `Deferred` or
    /// awaiting intervention are retried without a restart. Sweeps never
    /// overlap.
    pub async fn run(
        &self,
        mut intake_rx: mpsc::Receiver<JobSubmitted>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        info!(
            concurrency_limit = self.config.concurrency_limit,
            sweep_interval_ms = self.config.sweep_interval_ms,
            "Starting job orchestrator"
        );

        let mut sweep_timer = self.config.sweep_timer();
        let mut sweep: Option<JoinHandle<()>> = None;
        if self.config.recover_on_start {
            sweep = Some(self.spawn_sweep());
        }

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Orchestrator shutdown requested");
                    break;
                }

                _ = next_tick(&mut sweep_timer) => {
                    if sweep.as_ref().map_or(true, |task| task.is_finished()) {
                        sweep = Some(self.spawn_sweep());
                    } else {
                        debug!("Previous recovery sweep still running");
                    }
                }

                event = intake_rx.recv() => match event {
                    Some(event) => {
                        self.dispatch(event).await;
                    }
                    None => {
                        info!("Orchestrator intake closed");
                        break;
                    }
                },
            }
        }

        if let Some(task) = sweep {
            if let Err(e) = task.await {
                error!(error = %e, "Recovery sweep aborted");
            }
        }
        self.drain().await;
        info!("Job orchestrator stopped");
    }

    fn spawn_sweep(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.recover().await {
                warn!(error = %e, "Recovery sweep failed, retrying next period");
            }
        })
    }

    /// Claim the job and start its saga on the pool.
    ///
    /// Waits for a free pool slot, which applies backpressure to the
    /// intake. Returns `None` when the submission was discarded.
    pub async fn dispatch(&self, event: JobSubmitted) -> Option<JoinHandle<SagaOutcome>> {
        let job_id = event.job_id;
        let Some(claim) = self.claims.try_claim(job_id) else {
            self.discard_claimed(job_id);
            return None;
        };

        let permit = match Arc::clone(&self.pool).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(job_id = job_id, "Worker pool closed, dropping submission");
                return None;
            }
        };
        debug!(job_id = job_id, saga_id = claim.saga_id(), block = %event.block, "Dispatching saga");

        let ctx = Arc::clone(&self.ctx);
        Some(tokio::spawn(async move {
            let outcome = ctx.run(claim, Some(event.encrypted_payload)).await;
            drop(permit);
            outcome
        }))
    }

    /// Run the saga for one submission on the current task.
    pub async fn handle_submitted(&self, event: JobSubmitted) -> SagaOutcome {
        match self.claims.try_claim(event.job_id) {
            Some(claim) => self.ctx.run(claim, Some(event.encrypted_payload)).await,
            None => self.discard_claimed(event.job_id),
        }
    }

    /// Re-claim every non-terminal job on the ledger and drive it to a
    /// terminal state.
    ///
    /// `Submitted` jobs run the whole saga, `InProgress` jobs resume at
    /// payment release when an attestation is recorded and re-execute
    /// otherwise, `Failed` jobs resume compensation.
    pub async fn recover(&self) -> SagaResult<RecoveryReport> {
        let pending: Vec<_> = self
            .ctx
            .settlement
            .list_jobs(&JobFilter::default())
            .await?
            .into_iter()
            .filter(|job| {
                matches!(
                    job.status,
                    JobStatus::Submitted | JobStatus::InProgress | JobStatus::Failed
                )
            })
            .collect();

        if pending.is_empty() {
            debug!("Recovery sweep found no pending jobs");
            return Ok(RecoveryReport::default());
        }
        info!(jobs = pending.len(), "Recovery sweep started");
        let mut report = RecoveryReport {
            examined: pending.len(),
            ..RecoveryReport::default()
        };

        let mut handles = Vec::with_capacity(pending.len());
        for job in pending {
            let Some(claim) = self.claims.try_claim(job.job_id) else {
                debug!(job_id = job.job_id, "Job held by a running saga, skipping");
                report.skipped.push(job.job_id);
                continue;
            };
            let Ok(permit) = Arc::clone(&self.pool).acquire_owned().await else {
                warn!("Worker pool closed, ending recovery sweep");
                break;
            };
            let ctx = Arc::clone(&self.ctx);
            let job_id = job.job_id;
            handles.push((
                job_id,
                tokio::spawn(async move {
                    let outcome = ctx.run(claim, None).await;
                    drop(permit);
                    outcome
                }),
            ));
        }

        for (job_id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(job_id = job_id, error = %e, "Recovery saga aborted");
                    SagaOutcome::InvariantViolation {
                        reason: format!("saga task failed: {}", e),
                    }
                }
            };
            report.outcomes.insert(job_id, outcome);
        }

        info!(
            examined = report.examined,
            completed = report.count("completed"),
            refunded = report.count("refunded"),
            deferred = report.count("deferred"),
            needs_intervention = report.count("needs_intervention"),
            "Recovery sweep finished"
        );
        Ok(report)
    }

    fn discard_claimed(&self, job_id: JobId) -> SagaOutcome {
        let outcome = SagaOutcome::Discarded {
            reason: "saga already active".to_string(),
        };
        self.ctx.record_outcome(job_id, &outcome);
        outcome
    }

    async fn drain(&self) {
        let limit = self.config.concurrency_limit.max(1);
        let running = limit - self.pool.available_permits().min(limit);
        if running > 0 {
            info!(running = running, "Waiting for running sagas");
        }
        let permits = u32::try_from(limit).unwrap_or(u32::MAX);
        if let Ok(all) = self.pool.acquire_many(permits).await {
            drop(all);
        }
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
