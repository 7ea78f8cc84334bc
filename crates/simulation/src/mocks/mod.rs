//! Reusable mock implementations of the node's collaborators.

pub mod executor;
pub mod keys;
pub mod ledger;
pub mod settlement;

pub use executor::{ExecutionScript, ScriptedExecutor};
pub use keys::{worker_key_holder, MismatchedKeyHolder, UnavailableKeyHolder};
pub use ledger::MockLedgerClient;
pub use settlement::{MockLedgerState, MockSettlementGateway, SettlementCall};
