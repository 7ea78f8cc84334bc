//! # Veritask Compute Executor
//!
//! Runs a job payload and produces an [`ExecutionResult`] carrying the
//! output and its SHA-256 content hash.
//!
//! ```text
//! payload bytes → envelope decode (lenient) → InferenceBackend → canonical JSON → sha256
//! ```
//!
//! Business failures (unknown model, bad parameters, timeout) come back as
//! `success: false` results. Only environment faults, such as a panicked
//! inference task, surface as [`ExecutorError`].
//!
//! [`ExecutionResult`]: veritask_types::ExecutionResult

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod executor;
pub mod hashing;

pub use backend::{InferenceBackend, InferenceFailure, TemplateBackend};
pub use error::{ExecutorError, ExecutorResult};
pub use executor::{ComputeExecutor, ExecutorConfig, PayloadExecutor};
pub use hashing::{canonical_json, result_hash};
