//! Key-holder abstraction.

use crate::error::{AttestationError, AttestationResult};
use sp_core::{sr25519, Pair};

/// Holds the worker's signing identity.
pub trait KeyHolder: Send + Sync {
    /// Public key attestations are verified against.
    fn public_key(&self) -> [u8; 32];

    /// Sign `message` with the worker key.
    fn sign(&self, message: &[u8]) -> AttestationResult<[u8; 64]>;
}

/// Key holder backed by an in-memory sr25519 keypair.
#[derive(Clone)]
pub struct Sr25519KeyHolder {
    pair: sr25519::Pair,
}

impl Sr25519KeyHolder {
    /// Wrap an existing keypair.
    pub fn new(pair: sr25519::Pair) -> Self {
        Self { pair }
    }

    /// Derive a keypair from a secret URI such as `//Worker//TEE` or a
    /// mnemonic phrase.
    pub fn from_suri(suri: &str) -> AttestationResult<Self> {
        let pair = sr25519::Pair::from_string(suri, None)
            .map_err(|e| AttestationError::InvalidKey(format!("{:?}", e)))?;
        Ok(Self { pair })
    }

    /// The underlying keypair.
    pub fn pair(&self) -> &sr25519::Pair {
        &self.pair
    }
}

impl std::fmt::Debug for Sr25519KeyHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sr25519KeyHolder")
            .field("public", &hex::encode(self.public_key()))
            .finish()
    }
}

impl KeyHolder for Sr25519KeyHolder {
    fn public_key(&self) -> [u8; 32] {
        let public = self.pair.public();
        let bytes: &[u8] = public.as_ref();
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        out
    }

    fn sign(&self, message: &[u8]) -> AttestationResult<[u8; 64]> {
        let signature = self.pair.sign(message);
        let bytes: &[u8] = signature.as_ref();
        bytes
            .try_into()
            .map_err(|_| AttestationError::KeyUnavailable("unexpected signature length".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_suri_is_deterministic() {
        let a = Sr25519KeyHolder::from_suri("//Worker//TEE").unwrap();
        let b = Sr25519KeyHolder::from_suri("//Worker//TEE").unwrap();
        let c = Sr25519KeyHolder::from_suri("//Alice").unwrap();

        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), c.public_key());
    }

    #[test]
    fn test_invalid_suri_is_rejected() {
        let err = Sr25519KeyHolder::from_suri("not a valid phrase at all").unwrap_err();
        assert!(matches!(err, AttestationError::InvalidKey(_)));
    }
}
