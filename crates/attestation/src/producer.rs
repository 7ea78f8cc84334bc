//! Attestation producer.

use crate::error::AttestationResult;
use crate::keys::KeyHolder;
use sp_core::{sr25519, Pair};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use veritask_types::{Attestation, JobId};

/// Signs execution results and verifies attestations.
#[derive(Clone)]
pub struct AttestationProducer {
    keys: Arc<dyn KeyHolder>,
}

impl AttestationProducer {
    /// Create a producer signing with `keys`.
    pub fn new(keys: Arc<dyn KeyHolder>) -> Self {
        Self { keys }
    }

    /// Public key of the signing worker.
    pub fn worker_pubkey(&self) -> [u8; 32] {
        self.keys.public_key()
    }

    /// Sign `(job_id, result_hash, execution_time_ms)`.
    ///
    /// Fails only when the key holder cannot sign.
    pub fn sign(
        &self,
        job_id: JobId,
        result_hash: &str,
        execution_time_ms: u64,
    ) -> AttestationResult<Attestation> {
        let message = Attestation::message_for(job_id, result_hash, execution_time_ms);
        let proof = self.keys.sign(message.as_bytes())?;

        debug!(job_id = job_id, result_hash = %result_hash, "Signed attestation");

        Ok(Attestation {
            job_id,
            result_hash: result_hash.to_string(),
            proof: proof.to_vec(),
            worker_pubkey: self.keys.public_key(),
            timestamp: now_millis(),
            execution_time_ms,
        })
    }

    /// Check `attestation.proof` against its own fields and claimed key.
    pub fn verify(attestation: &Attestation) -> bool {
        let Ok(raw) = <[u8; 64]>::try_from(attestation.proof.as_slice()) else {
            warn!(
                job_id = attestation.job_id,
                proof_len = attestation.proof.len(),
                "Attestation proof has wrong length"
            );
            return false;
        };

        let signature = sr25519::Signature::from_raw(raw);
        let public = sr25519::Public::from_raw(attestation.worker_pubkey);
        let message = attestation.signed_message();

        sr25519::Pair::verify(&signature, message.as_bytes(), &public)
    }
}

impl std::fmt::Debug for AttestationProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationProducer")
            .field("worker_pubkey", &hex::encode(self.worker_pubkey()))
            .finish()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AttestationError;
    use crate::keys::Sr25519KeyHolder;

    struct LockedKey;

    impl KeyHolder for LockedKey {
        fn public_key(&self) -> [u8; 32] {
            [0u8; 32]
        }

        fn sign(&self, _message: &[u8]) -> AttestationResult<[u8; 64]> {
            Err(AttestationError::KeyUnavailable("keystore locked".to_string()))
        }
    }

    fn producer(suri: &str) -> AttestationProducer {
        AttestationProducer::new(Arc::new(Sr25519KeyHolder::from_suri(suri).unwrap()))
    }

    #[test]
    fn test_signed_attestation_verifies() {
        let producer = producer("//Worker//TEE//Simulation");
        let hash = "1f".repeat(32);

        let attestation = producer.sign(1001, &hash, 120).unwrap();

        assert_eq!(attestation.result_hash, hash);
        assert_eq!(attestation.worker_pubkey, producer.worker_pubkey());
        assert!(AttestationProducer::verify(&attestation));
    }

    #[test]
    fn test_tampered_fields_fail_verification() {
        let producer = producer("//Worker");
        let attestation = producer.sign(7, &"aa".repeat(32), 10).unwrap();

        let mut wrong_hash = attestation.clone();
        wrong_hash.result_hash = "bb".repeat(32);
        assert!(!AttestationProducer::verify(&wrong_hash));

        let mut wrong_time = attestation.clone();
        wrong_time.execution_time_ms = 11;
        assert!(!AttestationProducer::verify(&wrong_time));

        let mut wrong_key = attestation.clone();
        wrong_key.worker_pubkey = producer_key("//Mallory");
        assert!(!AttestationProducer::verify(&wrong_key));
    }

    #[test]
    fn test_timestamp_is_not_part_of_signed_message() {
        let producer = producer("//Worker");
        let mut attestation = producer.sign(8, &"cc".repeat(32), 1).unwrap();
        attestation.timestamp += 1_000;
        assert!(AttestationProducer::verify(&attestation));
    }

    #[test]
    fn test_malformed_proof_returns_false() {
        let producer = producer("//Worker");
        let mut attestation = producer.sign(9, &"dd".repeat(32), 1).unwrap();
        attestation.proof.truncate(10);
        assert!(!AttestationProducer::verify(&attestation));
    }

    #[test]
    fn test_unavailable_key_fails_signing() {
        let producer = AttestationProducer::new(Arc::new(LockedKey));
        let err = producer.sign(1, &"ee".repeat(32), 1).unwrap_err();
        assert!(matches!(err, AttestationError::KeyUnavailable(_)));
    }

    fn producer_key(suri: &str) -> [u8; 32] {
        Sr25519KeyHolder::from_suri(suri).unwrap().public_key()
    }
}
