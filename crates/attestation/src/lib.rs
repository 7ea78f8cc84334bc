//! # Veritask Attestation Producer
//!
//! Binds a job's result hash to the worker identity that produced it.
//!
//! The signed message is `jobId:resultHash:executionTimeMs`. Verification
//! rebuilds that message from the attestation's own fields and checks the
//! proof against the claimed `workerPubkey`.
//!
//! Key material sits behind the [`KeyHolder`] trait so that signing can be
//! backed by a local keypair or an external signer.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod keys;
pub mod producer;

pub use error::{AttestationError, AttestationResult};
pub use keys::{KeyHolder, Sr25519KeyHolder};
pub use producer::AttestationProducer;
