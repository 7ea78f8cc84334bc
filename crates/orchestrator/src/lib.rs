//! # Veritask Orchestrator
//!
//! Drives each submitted job through execution, attestation and settlement,
//! and compensates with a refund when any step fails.
//!
//! ## Saga
//!
//! ```text
//! JobSubmitted ─► claim ─► Submitted→InProgress ─► execute ─► sign + self-verify
//!                                                     │              │
//!                                                  failure        failure
//!                                                     ▼              ▼
//!        Completed ◄─ release ◄─ record attestation   Failed ─► refund ─► Refunded
//! ```
//!
//! - [`ClaimTable`]: per-job mutual exclusion. A claim is taken with an
//!   atomic check-and-set and released when its [`ClaimGuard`] drops.
//! - [`JobOrchestrator`]: intake loop, bounded worker pool, saga steps and
//!   the start-up [recovery sweep](JobOrchestrator::recover).
//! - [`JobStatusService`]: read model for the request/response façade,
//!   answered from committed ledger state only.
//! - [`SagaMetrics`]: Prometheus counters for outcomes and settlement calls.
//!
//! The ledger status is the only checkpoint. Nothing about a saga is kept
//! in memory beyond its claim, so a restarted node resumes by reading job
//! status back from the ledger.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod claim;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod saga;
pub mod status;

pub use claim::{ClaimGuard, ClaimTable};
pub use error::{SagaError, SagaResult};
pub use metrics::SagaMetrics;
pub use orchestrator::{JobOrchestrator, OrchestratorConfig, RecoveryReport};
pub use saga::SagaOutcome;
pub use status::JobStatusService;
