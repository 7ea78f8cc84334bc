//! Attestations and their persisted, hex-encoded record form.

use crate::job::JobId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Signed proof binding a job's result hash to the worker that produced it.
///
/// Immutable once recorded on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    /// Job the result belongs to.
    pub job_id: JobId,
    /// Hex SHA-256 digest of the canonical output.
    pub result_hash: String,
    /// Signature over [`Attestation::signed_message`].
    pub proof: Vec<u8>,
    /// Public key the proof verifies against.
    pub worker_pubkey: [u8; 32],
    /// Signing time, unix milliseconds.
    pub timestamp: u64,
    /// Execution time carried in the signed message.
    pub execution_time_ms: u64,
}

impl Attestation {
    /// Canonical message for a `(job_id, result_hash, execution_time_ms)` tuple.
    pub fn message_for(job_id: JobId, result_hash: &str, execution_time_ms: u64) -> String {
        format!("{}:{}:{}", job_id, result_hash, execution_time_ms)
    }

    /// The message this attestation's proof claims to sign, rebuilt from
    /// its own fields.
    pub fn signed_message(&self) -> String {
        Self::message_for(self.job_id, &self.result_hash, self.execution_time_ms)
    }

    /// Hex-encoded record form.
    pub fn to_record(&self) -> AttestationRecord {
        AttestationRecord::from(self)
    }
}

/// Errors converting a record back into an [`Attestation`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    /// A field was not valid hex.
    #[error("field {field} is not valid hex: {reason}")]
    InvalidHex {
        /// Offending field.
        field: &'static str,
        /// Decoder message.
        reason: String,
    },

    /// The worker public key had the wrong length.
    #[error("worker public key must be 32 bytes, got {0}")]
    InvalidPubkeyLength(usize),

    /// The result hash is not a 64-character hex digest.
    #[error("result hash must be 64 hex characters")]
    InvalidResultHash,
}

/// Attestation as persisted and exposed upward, with hex-encoded byte fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationRecord {
    /// Job the result belongs to.
    pub job_id: JobId,
    /// 64-character hex digest.
    pub result_hash: String,
    /// Hex signature, `0x`-prefixed.
    pub proof: String,
    /// Hex public key, `0x`-prefixed.
    pub worker_pubkey: String,
    /// Signing time, unix milliseconds.
    pub timestamp: u64,
    /// Execution time carried in the signed message.
    pub execution_time_ms: u64,
}

impl From<&Attestation> for AttestationRecord {
    fn from(attestation: &Attestation) -> Self {
        Self {
            job_id: attestation.job_id,
            result_hash: attestation.result_hash.clone(),
            proof: format!("0x{}", hex::encode(&attestation.proof)),
            worker_pubkey: format!("0x{}", hex::encode(attestation.worker_pubkey)),
            timestamp: attestation.timestamp,
            execution_time_ms: attestation.execution_time_ms,
        }
    }
}

impl TryFrom<AttestationRecord> for Attestation {
    type Error = RecordError;

    fn try_from(record: AttestationRecord) -> Result<Self, Self::Error> {
        let hash_ok = record.result_hash.len() == 64
            && record.result_hash.chars().all(|c| c.is_ascii_hexdigit());
        if !hash_ok {
            return Err(RecordError::InvalidResultHash);
        }

        let proof = decode_hex("proof", &record.proof)?;
        let pubkey = decode_hex("worker_pubkey", &record.worker_pubkey)?;
        let worker_pubkey: [u8; 32] = pubkey
            .as_slice()
            .try_into()
            .map_err(|_| RecordError::InvalidPubkeyLength(pubkey.len()))?;

        Ok(Self {
            job_id: record.job_id,
            result_hash: record.result_hash,
            proof,
            worker_pubkey,
            timestamp: record.timestamp,
            execution_time_ms: record.execution_time_ms,
        })
    }
}

fn decode_hex(field: &'static str, value: &str) -> Result<Vec<u8>, RecordError> {
    hex::decode(value.trim_start_matches("0x")).map_err(|e| RecordError::InvalidHex {
        field,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Attestation {
        Attestation {
            job_id: 1001,
            result_hash: "ab".repeat(32),
            proof: vec![0xde, 0xad, 0xbe, 0xef],
            worker_pubkey: [7u8; 32],
            timestamp: 1_700_000_000_000,
            execution_time_ms: 42,
        }
    }

    #[test]
    fn test_signed_message_format() {
        let attestation = sample();
        assert_eq!(
            attestation.signed_message(),
            format!("1001:{}:42", "ab".repeat(32))
        );
    }

    #[test]
    fn test_record_uses_camel_case_hex_fields() {
        let json = serde_json::to_value(sample().to_record()).unwrap();
        assert_eq!(json["jobId"], 1001);
        assert_eq!(json["proof"], "0xdeadbeef");
        assert!(json["workerPubkey"].as_str().unwrap().starts_with("0x0707"));
    }

    #[test]
    fn test_record_rejects_short_pubkey() {
        let mut record = sample().to_record();
        record.worker_pubkey = "0x0102".to_string();
        assert_eq!(
            Attestation::try_from(record),
            Err(RecordError::InvalidPubkeyLength(2))
        );
    }

    #[test]
    fn test_record_rejects_bad_result_hash() {
        let mut record = sample().to_record();
        record.result_hash = "xyz".to_string();
        assert_eq!(
            Attestation::try_from(record),
            Err(RecordError::InvalidResultHash)
        );
    }

    #[test]
    fn test_record_converts_back() {
        let original = sample();
        let restored = Attestation::try_from(original.to_record()).unwrap();
        assert_eq!(restored, original);
    }
}
