//! Ledger transport capability.

use crate::contract::Message;
use crate::error::LedgerResult;
use async_trait::async_trait;
use futures::stream::BoxStream;
use sp_core::sr25519;
use veritask_types::{AccountId, BlockRef};

/// A contract event as emitted on the ledger, before schema decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Emitting contract.
    pub contract: AccountId,
    /// SCALE-encoded event data.
    pub data: Vec<u8>,
    /// Finalized block that carried the event.
    pub block: BlockRef,
}

/// Ordered stream of raw events, in ledger block order.
pub type RawEventStream = BoxStream<'static, LedgerResult<RawEvent>>;

/// Proof that a state-changing call reached finality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Finalized block containing the extrinsic.
    pub block_hash: String,
    /// Extrinsic hash.
    pub extrinsic_hash: String,
}

/// A contract message invocation: message plus SCALE-encoded arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    /// Message being called.
    pub message: Message,
    /// SCALE-encoded arguments.
    pub args: Vec<u8>,
}

impl ContractCall {
    /// Build a call.
    pub fn new(message: Message, args: Vec<u8>) -> Self {
        Self { message, args }
    }

    /// Message label.
    pub fn method(&self) -> &'static str {
        self.message.label
    }

    /// Selector followed by the encoded arguments.
    pub fn input_data(&self) -> Vec<u8> {
        let mut input = Vec::with_capacity(4 + self.args.len());
        input.extend_from_slice(&self.message.selector());
        input.extend_from_slice(&self.args);
        input
    }
}

/// Capability interface over the ledger.
///
/// Shared by the subscriber, the contract gateways and the settlement
/// adapter. Implementations serialize their own reads and writes.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Subscribe to contract events from finalized blocks.
    ///
    /// `contracts` narrows the stream where the transport can; consumers
    /// still filter by address themselves. With `resume_from` set, events
    /// of finalized blocks numbered from it onward are replayed before the
    /// live stream, within the transport's backfill limit. Replayed events
    /// may repeat ones already delivered.
    async fn subscribe(
        &self,
        contracts: &[AccountId],
        resume_from: Option<u64>,
    ) -> LedgerResult<RawEventStream>;

    /// Dry-run a read-only message and return its SCALE-encoded output.
    async fn query(&self, contract: &AccountId, call: &ContractCall) -> LedgerResult<Vec<u8>>;

    /// Submit a state-changing message signed by `signer` and wait for
    /// finality. Dispatch failures surface as `ExtrinsicFailed`.
    async fn execute(
        &self,
        contract: &AccountId,
        call: &ContractCall,
        signer: &sr25519::Pair,
    ) -> LedgerResult<Receipt>;
}
