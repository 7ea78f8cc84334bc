//! # Veritask Simulation
//!
//! Explicit test doubles for the node's collaborators and a harness that
//! runs real sagas against them. Nothing here is used by the node binary.
//!
//! - [`mocks::MockSettlementGateway`]: in-memory ledger with the
//!   settlement gateway's idempotency rules and per-action fault injection
//! - [`mocks::ScriptedExecutor`]: per-job execution outcomes, optionally
//!   gated to hold sagas in flight
//! - [`mocks::MismatchedKeyHolder`], [`mocks::UnavailableKeyHolder`]:
//!   attestation keys that fail verification or signing
//! - [`mocks::MockLedgerClient`]: event source for subscriber tests
//! - [`SagaHarness`]: orchestrator wired to the mocks
//!
//! ```rust,ignore
//! let harness = SagaHarness::builder().build()?;
//! let outcome = harness.submit_and_run(1001).await;
//! assert_eq!(outcome, SagaOutcome::Completed);
//! ```

#![warn(missing_docs)]

pub mod harness;
pub mod mocks;

pub use harness::{fast_config, HarnessBuilder, SagaHarness, PROCESSOR_ADDRESS};
