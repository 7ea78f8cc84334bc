//! Read model for the request/response surface.

use std::sync::Arc;
use veritask_ledger::{SettlementGateway, SettlementResult};
use veritask_types::{Job, JobFilter, JobId, JobStatus, JobStatusView};

/// Answers status queries from committed ledger state.
///
/// Nothing is cached: a job reported `Completed` has that status on the
/// ledger. Result hash and attestation are only reported for completed
/// jobs.
#[derive(Clone)]
pub struct JobStatusService {
    settlement: Arc<dyn SettlementGateway>,
}

impl JobStatusService {
    /// Create a service reading through `settlement`.
    pub fn new(settlement: Arc<dyn SettlementGateway>) -> Self {
        Self { settlement }
    }

    /// Status of one job, `None` when the ledger has no such job.
    pub async fn get_job_status(&self, job_id: JobId) -> SettlementResult<Option<JobStatusView>> {
        let Some(job) = self.settlement.get_job(job_id).await? else {
            return Ok(None);
        };

        let (result_hash, attestation) = if job.status == JobStatus::Completed {
            let attestation = self.settlement.get_attestation(job_id).await?;
            let result_hash = job
                .result_hash
                .clone()
                .or_else(|| attestation.as_ref().map(|a| a.result_hash.clone()));
            (result_hash, attestation.map(|a| a.to_record()))
        } else {
            (None, None)
        };

        Ok(Some(JobStatusView {
            status: job.status,
            owner: job.owner,
            provider: job.provider,
            result_hash,
            attestation,
        }))
    }

    /// Jobs passing `filter`, in id order.
    pub async fn list_jobs(&self, filter: &JobFilter) -> SettlementResult<Vec<Job>> {
        let mut jobs = self.settlement.list_jobs(filter).await?;
        jobs.sort_by_key(|job| job.job_id);
        Ok(jobs)
    }
}
