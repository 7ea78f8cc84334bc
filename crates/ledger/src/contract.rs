//! Generic contract gateway.

use crate::client::{ContractCall, LedgerClient, Receipt};
use crate::error::{LedgerError, LedgerResult};
use crate::schema::{wire::LangError, ContractSchema};
use parity_scale_codec::{Decode, Encode};
use sp_core::hashing::blake2_256;
use sp_core::sr25519;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;
use veritask_types::{AccountId, BlockRef, DecodedEvent};

/// An ink! contract message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    /// Message label as declared in the contract.
    pub label: &'static str,
    /// Whether the message changes contract state.
    pub mutates: bool,
}

impl Message {
    /// Read-only message.
    pub const fn query(label: &'static str) -> Self {
        Self {
            label,
            mutates: false,
        }
    }

    /// State-changing message.
    pub const fn transaction(label: &'static str) -> Self {
        Self {
            label,
            mutates: true,
        }
    }

    /// First four bytes of BLAKE2b-256 of the label.
    pub fn selector(&self) -> [u8; 4] {
        let hash = blake2_256(self.label.as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }
}

/// Typed access to one deployed contract.
///
/// One generic type serves every contract; per-contract operations are
/// inherent impls on `ContractGateway<Schema>` in [`crate::schema`].
pub struct ContractGateway<S> {
    client: Arc<dyn LedgerClient>,
    address: AccountId,
    _schema: PhantomData<fn() -> S>,
}

impl<S> Clone for ContractGateway<S> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            address: self.address.clone(),
            _schema: PhantomData,
        }
    }
}

impl<S: ContractSchema> ContractGateway<S> {
    /// Gateway for the contract at `address`.
    pub fn new(client: Arc<dyn LedgerClient>, address: AccountId) -> Self {
        Self {
            client,
            address,
            _schema: PhantomData,
        }
    }

    /// Contract address.
    pub fn address(&self) -> &AccountId {
        &self.address
    }

    /// Call a read-only message and decode its output.
    pub async fn query<A, R>(&self, message: Message, args: A) -> LedgerResult<R>
    where
        A: Encode,
        R: Decode,
    {
        let call = ContractCall::new(message, args.encode());
        debug!(contract = S::NAME, method = message.label, "Contract query");
        let output = self.client.query(&self.address, &call).await?;
        decode_message_output(message, &output)
    }

    /// Submit a state-changing message.
    pub async fn execute<A>(
        &self,
        message: Message,
        signer: &sr25519::Pair,
        args: A,
    ) -> LedgerResult<Receipt>
    where
        A: Encode,
    {
        let call = ContractCall::new(message, args.encode());
        debug!(contract = S::NAME, method = message.label, "Contract execute");
        self.client.execute(&self.address, &call, signer).await
    }

    /// Decode event data emitted by this contract.
    pub fn decode_event(&self, block: &BlockRef, data: &[u8]) -> LedgerResult<DecodedEvent> {
        S::decode_event(&self.address, block, data)
    }
}

/// Decode an ink! message output (`Result<R, LangError>`).
pub fn decode_message_output<R: Decode>(message: Message, output: &[u8]) -> LedgerResult<R> {
    let result = <Result<R, LangError>>::decode(&mut &output[..])
        .map_err(|e| LedgerError::Decode(format!("{} output: {}", message.label, e)))?;
    result.map_err(|lang| LedgerError::ContractReverted {
        method: message.label.to_string(),
        reason: format!("{:?}", lang),
    })
}
