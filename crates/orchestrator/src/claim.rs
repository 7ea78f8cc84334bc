//! Per-job claim table.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use veritask_types::JobId;

/// Identifier of one saga instance.
pub type SagaId = u64;

/// At most one active saga per job.
///
/// Claims are sharded by job id, so claiming one job never waits on
/// another.
#[derive(Debug, Default)]
pub struct ClaimTable {
    claims: Arc<DashMap<JobId, SagaId>>,
    next_saga: AtomicU64,
}

impl ClaimTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `job_id`, or `None` if a saga already holds it.
    pub fn try_claim(&self, job_id: JobId) -> Option<ClaimGuard> {
        match self.claims.entry(job_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let saga_id = self.next_saga.fetch_add(1, Ordering::Relaxed) + 1;
                slot.insert(saga_id);
                Some(ClaimGuard {
                    job_id,
                    saga_id,
                    claims: Arc::clone(&self.claims),
                })
            }
        }
    }

    /// Whether a saga holds `job_id`.
    pub fn is_claimed(&self, job_id: JobId) -> bool {
        self.claims.contains_key(&job_id)
    }

    /// Number of held claims.
    pub fn active(&self) -> usize {
        self.claims.len()
    }
}

/// A held claim. Dropping it releases the job.
#[derive(Debug)]
pub struct ClaimGuard {
    job_id: JobId,
    saga_id: SagaId,
    claims: Arc<DashMap<JobId, SagaId>>,
}

impl ClaimGuard {
    /// Claimed job.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Saga holding the claim.
    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        let saga_id = self.saga_id;
        self.claims.remove_if(&self.job_id, |_, holder| *holder == saga_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_is_refused() {
        let table = ClaimTable::new();
        let guard = table.try_claim(42).unwrap();
        assert!(table.try_claim(42).is_none());
        assert!(table.is_claimed(42));
        assert_eq!(guard.job_id(), 42);

        assert!(table.try_claim(43).is_some());
    }

    #[test]
    fn test_drop_releases_claim() {
        let table = ClaimTable::new();
        let first = table.try_claim(7).unwrap();
        drop(first);
        assert!(!table.is_claimed(7));

        let second = table.try_claim(7).unwrap();
        assert_eq!(second.saga_id(), 2);
        assert_eq!(table.active(), 1);
    }

    #[test]
    fn test_concurrent_claims_yield_one_winner() {
        let table = Arc::new(ClaimTable::new());
        let winners: Vec<Option<ClaimGuard>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let table = Arc::clone(&table);
                    scope.spawn(move || table.try_claim(1001))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(winners.iter().filter(|w| w.is_some()).count(), 1);
    }
}
