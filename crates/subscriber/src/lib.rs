//! # Veritask Subscriber
//!
//! Consumes contract events from finalized ledger blocks and feeds job
//! submissions to the orchestrator.
//!
//! ```text
//! LedgerClient::subscribe → ContractRegistry (address → schema) → DecodedEvent
//!                                                                   │
//!                                             JobSubmitted ──► orchestrator intake
//! ```
//!
//! Events are forwarded in ledger block order. Events from unregistered
//! contracts are dropped, undecodable events are logged and skipped, and a
//! dropped subscription is re-opened after a fixed interval. Delivery is
//! at-least-once: the same submission may be forwarded again after a
//! resubscribe.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod registry;
pub mod subscriber;

pub use error::{SubscriberError, SubscriberResult};
pub use registry::ContractRegistry;
pub use subscriber::{ChainEventSubscriber, SubscriberConfig, SubscriberStats};
