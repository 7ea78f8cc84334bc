//! # Veritask Ledger
//!
//! Everything that talks to the chain.
//!
//! ## Layers
//!
//! ```text
//! SettlementGateway  (idempotent job/escrow/attestation operations, retries)
//!        │
//! ContractGateway<S> (one generic gateway per ink! contract schema)
//!        │
//! LedgerClient       (subscribe / query / execute; subxt in production)
//! ```
//!
//! - [`LedgerClient`]: transport capability. [`SubxtLedgerClient`] is the
//!   production implementation with an explicit connect/disconnect lifecycle.
//! - [`ContractGateway`]: typed access to one contract, parameterised by a
//!   [`ContractSchema`] ([`JobQueue`], [`PaymentEscrow`], [`JobProcessor`],
//!   [`MevProtection`]).
//! - [`SettlementGateway`]: the operations the orchestrator depends on.
//!   [`LedgerSettlementGateway`] checks ledger state before every write, so a
//!   repeated call against a ledger already in the target state succeeds as
//!   [`SettlementOutcome::AlreadyApplied`].
//!
//! Transient infrastructure errors are retried inside the settlement
//! adapter with bounded exponential backoff ([`RetryPolicy`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod contract;
pub mod error;
pub mod retry;
pub mod schema;
pub mod settlement;
pub mod subxt_client;

pub use client::{ContractCall, LedgerClient, RawEvent, RawEventStream, Receipt};
pub use contract::{ContractGateway, Message};
pub use error::{LedgerError, LedgerResult, SettlementAction, SettlementError, SettlementResult};
pub use retry::{RetryPolicy, Retryable};
pub use schema::{ContractSchema, JobProcessor, JobQueue, MevProtection, PaymentEscrow};
pub use settlement::{
    ContractAddresses, EscrowSettlement, LedgerSettlementGateway, SettlementGateway,
    SettlementOutcome,
};
pub use subxt_client::{SubxtLedgerClient, DEFAULT_MAX_BACKFILL_BLOCKS};
