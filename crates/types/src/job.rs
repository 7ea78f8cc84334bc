//! Job record, status graph and the read-only status views built on them.

use crate::attestation::AttestationRecord;
use crate::{AccountId, Balance};
use serde::{Serialize, Serializer};

/// Ledger-assigned job identifier.
pub type JobId = u64;

/// Lifecycle status of a job as recorded on the ledger.
///
/// ```text
/// Submitted → InProgress → Completed
///                        ↘ Failed → Refunded
/// ```
///
/// `Completed` and `Refunded` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JobStatus {
    /// Registered and funded, waiting for a worker.
    Submitted,
    /// A worker has started the saga.
    InProgress,
    /// Attested and paid.
    Completed,
    /// Execution or settlement failed; refund pending.
    Failed,
    /// Escrow returned to the owner.
    Refunded,
}

impl JobStatus {
    /// All statuses in graph order.
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Submitted,
        JobStatus::InProgress,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Refunded,
    ];

    /// Whether no transition leaves this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Refunded)
    }

    /// Whether `self → next` is an edge of the status graph.
    ///
    /// Self-loops are not edges; callers treat "already in target state"
    /// separately.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Submitted, JobStatus::InProgress)
                | (JobStatus::InProgress, JobStatus::Completed)
                | (JobStatus::InProgress, JobStatus::Failed)
                | (JobStatus::Failed, JobStatus::Refunded)
        )
    }

    /// Name used by the job-queue contract.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "Submitted",
            JobStatus::InProgress => "InProgress",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Refunded => "Refunded",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown job status: {}", s))
    }
}

/// State of the escrow backing a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EscrowStatus {
    /// Funds held by the escrow contract.
    Locked,
    /// Funds paid out to the provider.
    Released,
    /// Funds returned to the owner.
    Refunded,
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscrowStatus::Locked => write!(f, "Locked"),
            EscrowStatus::Released => write!(f, "Released"),
            EscrowStatus::Refunded => write!(f, "Refunded"),
        }
    }
}

/// A compute job as stored by the job-queue contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job identifier.
    pub job_id: JobId,
    /// Current ledger status.
    pub status: JobStatus,
    /// Account that submitted and funded the job.
    #[serde(serialize_with = "serialize_account")]
    pub owner: AccountId,
    /// Provider account, unset until a worker is assigned.
    #[serde(serialize_with = "serialize_optional_account")]
    pub provider: Option<AccountId>,
    /// Escrowed budget in the smallest denomination.
    pub budget: Balance,
    /// Opaque encrypted payload or a reference to it.
    #[serde(serialize_with = "serialize_bytes_hex")]
    pub payload_ref: Vec<u8>,
    /// Hex digest of the result, set once computed.
    pub result_hash: Option<String>,
    /// Creation time, unix milliseconds.
    pub created_at: u64,
    /// Last update time, unix milliseconds.
    pub updated_at: u64,
}

/// Filter for job listings. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    /// Only jobs submitted by this account.
    pub owner: Option<AccountId>,
    /// Only jobs in this status.
    pub status: Option<JobStatus>,
}

impl JobFilter {
    /// Filter on status only.
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            owner: None,
            status: Some(status),
        }
    }

    /// Whether `job` passes the filter.
    pub fn matches(&self, job: &Job) -> bool {
        self.owner.as_ref().map_or(true, |owner| *owner == job.owner)
            && self.status.map_or(true, |status| status == job.status)
    }
}

/// Status answer for a single job, built only from committed ledger state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    /// Committed status.
    pub status: JobStatus,
    /// Job owner.
    #[serde(serialize_with = "serialize_account")]
    pub owner: AccountId,
    /// Assigned provider, if any.
    #[serde(serialize_with = "serialize_optional_account")]
    pub provider: Option<AccountId>,
    /// Result digest, only reported for completed jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_hash: Option<String>,
    /// Attestation, only reported for completed jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<AttestationRecord>,
}

fn serialize_account<S: Serializer>(account: &AccountId, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(account)
}

fn serialize_optional_account<S: Serializer>(
    account: &Option<AccountId>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match account {
        Some(account) => serializer.collect_str(account),
        None => serializer.serialize_none(),
    }
}

fn serialize_bytes_hex<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(status: JobStatus, owner: [u8; 32]) -> Job {
        Job {
            job_id: 7,
            status,
            owner: AccountId::from(owner),
            provider: None,
            budget: 1_000,
            payload_ref: vec![1, 2, 3],
            result_hash: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn test_status_graph_edges() {
        use JobStatus::*;
        assert!(Submitted.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Refunded));

        // no skipped states
        assert!(!Submitted.can_transition_to(Completed));
        assert!(!Submitted.can_transition_to(Failed));
        assert!(!InProgress.can_transition_to(Refunded));
        assert!(!Submitted.can_transition_to(Submitted));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for terminal in JobStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for next in JobStatus::ALL {
                assert!(!terminal.can_transition_to(next), "{} -> {}", terminal, next);
            }
        }
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Refunded.is_terminal());
        assert!(!JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("inprogress".parse::<JobStatus>().unwrap(), JobStatus::InProgress);
        assert_eq!("Refunded".parse::<JobStatus>().unwrap(), JobStatus::Refunded);
        assert!("Cancelled".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_filter_matches() {
        let alice = job(JobStatus::Completed, [1u8; 32]);
        let bob = job(JobStatus::Failed, [2u8; 32]);

        let by_status = JobFilter::with_status(JobStatus::Failed);
        assert!(!by_status.matches(&alice));
        assert!(by_status.matches(&bob));

        let by_owner = JobFilter {
            owner: Some(AccountId::from([1u8; 32])),
            status: None,
        };
        assert!(by_owner.matches(&alice));
        assert!(!by_owner.matches(&bob));

        assert!(JobFilter::default().matches(&alice));
    }

    #[test]
    fn test_job_serializes_payload_as_hex() {
        let json = serde_json::to_value(job(JobStatus::Submitted, [1u8; 32])).unwrap();
        assert_eq!(json["payloadRef"], "0x010203");
        assert_eq!(json["status"], "Submitted");
        assert!(json["provider"].is_null());
    }
}
