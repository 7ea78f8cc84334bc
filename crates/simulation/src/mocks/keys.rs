//! Faulty key holders.

use sp_core::{sr25519, Pair};
use veritask_attestation::{AttestationError, AttestationResult, KeyHolder, Sr25519KeyHolder};

/// Signs with one key but reports another, so every signature it makes
/// fails verification.
pub struct MismatchedKeyHolder {
    signer: Sr25519KeyHolder,
    claimed: [u8; 32],
}

impl MismatchedKeyHolder {
    /// Sign with the simulation worker key, claim an unrelated key.
    pub fn new() -> Self {
        let claimed = Sr25519KeyHolder::new(sr25519::Pair::from_seed(&[0x77; 32])).public_key();
        Self {
            signer: Sr25519KeyHolder::new(sr25519::Pair::from_seed(&[0x42; 32])),
            claimed,
        }
    }
}

impl Default for MismatchedKeyHolder {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyHolder for MismatchedKeyHolder {
    fn public_key(&self) -> [u8; 32] {
        self.claimed
    }

    fn sign(&self, message: &[u8]) -> AttestationResult<[u8; 64]> {
        self.signer.sign(message)
    }
}

/// A key holder whose key cannot be used.
#[derive(Debug, Default)]
pub struct UnavailableKeyHolder;

impl KeyHolder for UnavailableKeyHolder {
    fn public_key(&self) -> [u8; 32] {
        [0u8; 32]
    }

    fn sign(&self, _message: &[u8]) -> AttestationResult<[u8; 64]> {
        Err(AttestationError::KeyUnavailable("keystore locked".to_string()))
    }
}

/// Worker key used by default in simulations.
pub fn worker_key_holder() -> Sr25519KeyHolder {
    Sr25519KeyHolder::new(sr25519::Pair::from_seed(&[0x42; 32]))
}
