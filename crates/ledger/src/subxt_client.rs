//! subxt-backed ledger client.
//!
//! Reads are dry-runs through the `ContractsApi_call` runtime API; writes
//! are `Contracts::call` extrinsics sized from a dry-run and watched until
//! finality.

use crate::client::{ContractCall, LedgerClient, RawEvent, RawEventStream, Receipt};
use crate::error::{LedgerError, LedgerResult};
use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use parity_scale_codec::{Decode, Encode};
use sp_core::sr25519;
use std::collections::HashSet;
use std::ops::RangeInclusive;
use subxt::{dynamic::Value, OnlineClient, PolkadotConfig};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use veritask_types::{AccountId, BlockRef};

const CONTRACTS_PALLET: &str = "Contracts";
const CONTRACT_EMITTED: &str = "ContractEmitted";
const CONTRACTS_CALL_API: &str = "ContractsApi_call";

/// Finalized blocks replayed on resume unless configured otherwise.
pub const DEFAULT_MAX_BACKFILL_BLOCKS: u64 = 1200;

/// `ReturnFlags::REVERT` of pallet-contracts.
const FLAG_REVERT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
struct Weight {
    #[codec(compact)]
    ref_time: u64,
    #[codec(compact)]
    proof_size: u64,
}

#[derive(Debug, Decode)]
#[allow(dead_code)]
enum StorageDeposit {
    Refund(u128),
    Charge(u128),
}

#[derive(Debug, Decode)]
struct ContractEmitted {
    contract: AccountId,
    data: Vec<u8>,
}

enum CallResult {
    Returned { flags: u32, data: Vec<u8> },
    DispatchFailed,
}

/// Leading fields of `ContractExecResult`. Trailing fields are not read.
struct ContractCallReply {
    gas_required: Weight,
    debug_message: Vec<u8>,
    result: CallResult,
}

impl Decode for ContractCallReply {
    fn decode<I: parity_scale_codec::Input>(
        input: &mut I,
    ) -> Result<Self, parity_scale_codec::Error> {
        let _gas_consumed = Weight::decode(input)?;
        let gas_required = Weight::decode(input)?;
        let _storage_deposit = StorageDeposit::decode(input)?;
        let debug_message = Vec::<u8>::decode(input)?;
        let result = match u8::decode(input)? {
            0 => CallResult::Returned {
                flags: u32::decode(input)?,
                data: Vec::<u8>::decode(input)?,
            },
            1 => CallResult::DispatchFailed,
            _ => return Err("invalid contract call result tag".into()),
        };
        Ok(Self {
            gas_required,
            debug_message,
            result,
        })
    }
}

struct DryRun {
    gas_required: Weight,
    data: Vec<u8>,
}

/// Ledger client over a subxt `OnlineClient`.
///
/// Constructed by [`SubxtLedgerClient::connect`] at boot and shared by
/// reference; [`SubxtLedgerClient::disconnect`] drops the connection at
/// shutdown, after which every call fails with `NotConnected`.
pub struct SubxtLedgerClient {
    endpoint: String,
    query_origin: AccountId,
    max_backfill_blocks: u64,
    client: RwLock<Option<OnlineClient<PolkadotConfig>>>,
}

impl SubxtLedgerClient {
    /// Connect to `endpoint`. Dry-run reads are issued from `query_origin`.
    pub async fn connect(endpoint: &str, query_origin: AccountId) -> LedgerResult<Self> {
        info!(rpc_url = %endpoint, "Connecting to ledger");

        let client = OnlineClient::<PolkadotConfig>::from_url(endpoint)
            .await
            .map_err(|e| LedgerError::Connection(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            query_origin,
            max_backfill_blocks: DEFAULT_MAX_BACKFILL_BLOCKS,
            client: RwLock::new(Some(client)),
        })
    }

    /// Cap the finalized blocks replayed when a subscription resumes.
    /// 0 disables replay.
    pub fn with_max_backfill_blocks(mut self, max_blocks: u64) -> Self {
        self.max_backfill_blocks = max_blocks;
        self
    }

    /// Drop the connection.
    pub async fn disconnect(&self) {
        if self.client.write().await.take().is_some() {
            info!(rpc_url = %self.endpoint, "Disconnected from ledger");
        }
    }

    /// Whether the client holds a live connection.
    pub async fn is_connected(&self) -> bool {
        self.client.read().await.is_some()
    }

    /// Ledger endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn online(&self) -> LedgerResult<OnlineClient<PolkadotConfig>> {
        self.client
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(LedgerError::NotConnected)
    }

    /// Finalized blocks from `resume_from` up to the current head, oldest
    /// first, and the head number they end at.
    async fn backfill(
        &self,
        client: &OnlineClient<PolkadotConfig>,
        resume_from: u64,
    ) -> LedgerResult<(Vec<FinalizedBlock>, Option<u64>)> {
        let head = client.blocks().at_latest().await.map_err(classify)?;
        let head_number: u64 = head.number().into();
        let Some(range) = backfill_range(resume_from, head_number, self.max_backfill_blocks) else {
            return Ok((Vec::new(), None));
        };
        if *range.start() > resume_from {
            warn!(
                resume_from,
                replay_from = *range.start(),
                "Backfill truncated, older blocks are left to the recovery sweep"
            );
        }

        let mut blocks = Vec::new();
        let mut block = head;
        loop {
            let number: u64 = block.number().into();
            let parent = block.header().parent_hash;
            blocks.push(block);
            if number <= *range.start() {
                break;
            }
            block = client.blocks().at(parent).await.map_err(classify)?;
        }
        blocks.reverse();
        info!(from = *range.start(), to = head_number, "Replaying finalized blocks");
        Ok((blocks, Some(head_number)))
    }

    async fn dry_run(
        &self,
        client: &OnlineClient<PolkadotConfig>,
        origin: &AccountId,
        contract: &AccountId,
        call: &ContractCall,
    ) -> LedgerResult<DryRun> {
        let params = (
            origin.clone(),
            contract.clone(),
            0u128,
            None::<Weight>,
            None::<u128>,
            call.input_data(),
        )
            .encode();

        let reply: ContractCallReply = client
            .runtime_api()
            .at_latest()
            .await
            .map_err(classify)?
            .call_raw(CONTRACTS_CALL_API, Some(params.as_slice()))
            .await
            .map_err(classify)?;

        match reply.result {
            CallResult::Returned { flags, data } if flags & FLAG_REVERT == 0 => Ok(DryRun {
                gas_required: reply.gas_required,
                data,
            }),
            CallResult::Returned { data, .. } => Err(LedgerError::ContractReverted {
                method: call.method().to_string(),
                reason: format!("0x{}", hex::encode(data)),
            }),
            CallResult::DispatchFailed => Err(LedgerError::ContractReverted {
                method: call.method().to_string(),
                reason: String::from_utf8_lossy(&reply.debug_message).into_owned(),
            }),
        }
    }
}

#[async_trait]
impl LedgerClient for SubxtLedgerClient {
    async fn subscribe(
        &self,
        contracts: &[AccountId],
        resume_from: Option<u64>,
    ) -> LedgerResult<RawEventStream> {
        let client = self.online().await?;
        let blocks = client
            .blocks()
            .subscribe_finalized()
            .await
            .map_err(|e| LedgerError::Subscription(e.to_string()))?;

        // The live subscription is open before the head is read, so no
        // block falls between the backfill and the live stream.
        let (backfill, replayed_to) = match resume_from {
            Some(from) => self.backfill(&client, from).await?,
            None => (Vec::new(), None),
        };

        let watched: HashSet<AccountId> = contracts.iter().cloned().collect();
        debug!(
            contracts = watched.len(),
            backfill_blocks = backfill.len(),
            "Subscribed to finalized blocks"
        );

        let live = blocks.filter(move |block| {
            let keep = match (block, replayed_to) {
                (Ok(block), Some(head)) => {
                    let number: u64 = block.number().into();
                    number > head
                }
                _ => true,
            };
            future::ready(keep)
        });
        let stream = stream::iter(backfill.into_iter().map(Ok))
            .chain(live)
            .then(move |block| {
                let watched = watched.clone();
                async move { contract_events(block, &watched).await }
            })
            .flat_map(stream::iter);

        Ok(stream.boxed())
    }

    async fn query(&self, contract: &AccountId, call: &ContractCall) -> LedgerResult<Vec<u8>> {
        let client = self.online().await?;
        let dry_run = self.dry_run(&client, &self.query_origin, contract, call).await?;
        Ok(dry_run.data)
    }

    async fn execute(
        &self,
        contract: &AccountId,
        call: &ContractCall,
        signer: &sr25519::Pair,
    ) -> LedgerResult<Receipt> {
        let client = self.online().await?;
        let origin = AccountId::from(sp_core::Pair::public(signer));
        let dry_run = self.dry_run(&client, &origin, contract, call).await?;

        let tx = subxt::dynamic::tx(
            CONTRACTS_PALLET,
            "call",
            vec![
                Value::unnamed_variant("Id", vec![Value::from_bytes(contract)]),
                Value::u128(0),
                Value::named_composite(vec![
                    ("ref_time", Value::u128(dry_run.gas_required.ref_time as u128)),
                    ("proof_size", Value::u128(dry_run.gas_required.proof_size as u128)),
                ]),
                Value::unnamed_variant("None", Vec::new()),
                Value::from_bytes(call.input_data()),
            ],
        );

        let pair_signer = subxt::tx::PairSigner::<PolkadotConfig, sr25519::Pair>::new(signer.clone());

        debug!(method = call.method(), "Submitting contract call");

        let in_block = client
            .tx()
            .sign_and_submit_then_watch_default(&tx, &pair_signer)
            .await
            .map_err(classify)?
            .wait_for_finalized()
            .await
            .map_err(classify)?;

        let receipt = Receipt {
            block_hash: format!("{:?}", in_block.block_hash()),
            extrinsic_hash: format!("{:?}", in_block.extrinsic_hash()),
        };

        in_block.wait_for_success().await.map_err(classify)?;

        Ok(receipt)
    }
}

fn classify(err: subxt::Error) -> LedgerError {
    match err {
        subxt::Error::Io(e) => LedgerError::Rpc(e.to_string()),
        subxt::Error::Rpc(e) => LedgerError::Rpc(e.to_string()),
        subxt::Error::Transaction(e) => LedgerError::Rpc(format!("transaction: {}", e)),
        subxt::Error::Runtime(e) => LedgerError::ExtrinsicFailed(e.to_string()),
        subxt::Error::Codec(e) => LedgerError::Decode(e.to_string()),
        subxt::Error::Decode(e) => LedgerError::Decode(e.to_string()),
        other => LedgerError::Client(other.to_string()),
    }
}

type FinalizedBlock = subxt::blocks::Block<PolkadotConfig, OnlineClient<PolkadotConfig>>;

/// Finalized block numbers to replay for a resume point, newest
/// `max_blocks` at most. `None` when there is nothing to replay.
fn backfill_range(resume_from: u64, head: u64, max_blocks: u64) -> Option<RangeInclusive<u64>> {
    if max_blocks == 0 || resume_from > head {
        return None;
    }
    let floor = head.saturating_sub(max_blocks - 1);
    Some(resume_from.max(floor)..=head)
}

/// Watched `ContractEmitted` events of one finalized block.
async fn contract_events(
    block: Result<FinalizedBlock, subxt::Error>,
    watched: &HashSet<AccountId>,
) -> Vec<LedgerResult<RawEvent>> {
    let block = match block {
        Ok(block) => block,
        Err(e) => return vec![Err(LedgerError::Subscription(e.to_string()))],
    };
    let number: u64 = block.number().into();
    let block_ref = BlockRef {
        number,
        hash: format!("{:?}", block.hash()),
    };
    let events = match block.events().await {
        Ok(events) => events,
        Err(e) => return vec![Err(classify(e))],
    };

    let mut out = Vec::new();
    for event in events.iter() {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!(block = %block_ref, error = %e, "Skipping undecodable runtime event");
                continue;
            }
        };
        if event.pallet_name() != CONTRACTS_PALLET || event.variant_name() != CONTRACT_EMITTED {
            continue;
        }
        match ContractEmitted::decode(&mut event.field_bytes()) {
            Ok(emitted) if watched.is_empty() || watched.contains(&emitted.contract) => {
                out.push(Ok(RawEvent {
                    contract: emitted.contract,
                    data: emitted.data,
                    block: block_ref.clone(),
                }));
            }
            Ok(_) => {}
            Err(e) => out.push(Err(LedgerError::Decode(format!(
                "ContractEmitted in {}: {}",
                block_ref, e
            )))),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_bytes(tag: u8, flags: u32, data: &[u8]) -> Vec<u8> {
        let weight = Weight {
            ref_time: 1_000,
            proof_size: 64,
        };
        let mut bytes = Vec::new();
        weight.encode_to(&mut bytes);
        weight.encode_to(&mut bytes);
        bytes.push(1); // StorageDeposit::Charge
        0u128.encode_to(&mut bytes);
        b"dbg".to_vec().encode_to(&mut bytes);
        bytes.push(tag);
        if tag == 0 {
            flags.encode_to(&mut bytes);
            data.to_vec().encode_to(&mut bytes);
        }
        bytes
    }

    #[test]
    fn test_decode_successful_reply() {
        let bytes = reply_bytes(0, 0, &[0, 7]);
        let reply = ContractCallReply::decode(&mut &bytes[..]).unwrap();
        assert_eq!(reply.gas_required.ref_time, 1_000);
        assert!(matches!(
            reply.result,
            CallResult::Returned { flags: 0, ref data } if data == &[0, 7]
        ));
    }

    #[test]
    fn test_decode_reverted_and_failed_replies() {
        let reverted = reply_bytes(0, FLAG_REVERT, &[1]);
        let reply = ContractCallReply::decode(&mut &reverted[..]).unwrap();
        assert!(matches!(reply.result, CallResult::Returned { flags, .. } if flags & FLAG_REVERT != 0));

        let failed = reply_bytes(1, 0, &[]);
        let reply = ContractCallReply::decode(&mut &failed[..]).unwrap();
        assert!(matches!(reply.result, CallResult::DispatchFailed));
        assert_eq!(reply.debug_message, b"dbg".to_vec());
    }

    #[test]
    fn test_io_errors_are_transient() {
        let err = classify(subxt::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert!(err.class().is_retryable());
    }

    #[test]
    fn test_backfill_range_bounds() {
        assert_eq!(backfill_range(95, 100, 1200), Some(95..=100));
        assert_eq!(backfill_range(100, 100, 1200), Some(100..=100));
        assert_eq!(backfill_range(10, 100, 20), Some(81..=100));
        assert_eq!(backfill_range(101, 100, 1200), None);
        assert_eq!(backfill_range(95, 100, 0), None);
        assert_eq!(backfill_range(0, 5, u64::MAX), Some(0..=5));
    }
}
