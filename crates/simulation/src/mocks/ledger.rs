//! Ledger client emitting injected contract events.

use async_trait::async_trait;
use futures::StreamExt;
use parity_scale_codec::Encode;
use sp_core::sr25519;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use veritask_ledger::{
    ContractCall, LedgerClient, LedgerError, LedgerResult, RawEvent, RawEventStream, Receipt,
};
use veritask_types::{AccountId, BlockRef, JobId};

type EventSender = mpsc::UnboundedSender<LedgerResult<RawEvent>>;
type EventReceiver = mpsc::UnboundedReceiver<LedgerResult<RawEvent>>;

/// Finalized events so far and the subscriptions they go to.
struct ChainLog {
    history: Vec<RawEvent>,
    live: Vec<EventSender>,
    first: Option<EventReceiver>,
    resume_points: Vec<Option<u64>>,
}

/// Ledger client whose event stream is fed by the test.
///
/// Events emitted before the first subscription are buffered for it.
/// [`MockLedgerClient::emit_error`] drops every open subscription, and
/// events emitted until the next one are only reachable by resuming.
/// Queries and transactions are not supported.
pub struct MockLedgerClient {
    chain: StdMutex<ChainLog>,
    block: AtomicU64,
}

impl MockLedgerClient {
    /// Client with an empty event stream.
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            chain: StdMutex::new(ChainLog {
                history: Vec::new(),
                live: vec![events_tx],
                first: Some(events_rx),
                resume_points: Vec::new(),
            }),
            block: AtomicU64::new(0),
        }
    }

    fn chain(&self) -> MutexGuard<'_, ChainLog> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emit raw event data from `contract` in the next block.
    pub fn emit(&self, contract: AccountId, data: Vec<u8>) {
        let number = self.block.fetch_add(1, Ordering::SeqCst) + 1;
        let event = RawEvent {
            contract,
            data,
            block: BlockRef {
                number,
                hash: format!("0x{:064x}", number),
            },
        };
        let mut chain = self.chain();
        chain.live.retain(|tx| tx.send(Ok(event.clone())).is_ok());
        chain.history.push(event);
    }

    /// Emit a job-processor `JobSubmitted` event.
    pub fn emit_job_submitted(&self, processor: AccountId, job_id: JobId, payload: Vec<u8>) {
        let mut data = vec![0u8];
        data.extend((job_id, payload).encode());
        self.emit(processor, data);
    }

    /// Fail every open subscription with `err` and drop it.
    pub fn emit_error(&self, err: LedgerError) {
        let live = std::mem::take(&mut self.chain().live);
        for tx in live {
            let _ = tx.send(Err(err.clone()));
        }
    }

    /// Resume point passed to each subscription, in order.
    pub fn resume_points(&self) -> Vec<Option<u64>> {
        self.chain().resume_points.clone()
    }
}

impl Default for MockLedgerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    async fn subscribe(
        &self,
        _contracts: &[AccountId],
        resume_from: Option<u64>,
    ) -> LedgerResult<RawEventStream> {
        let mut chain = self.chain();
        chain.resume_points.push(resume_from);

        let rx = match chain.first.take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                chain.live.push(tx);
                rx
            }
        };
        let replay: Vec<LedgerResult<RawEvent>> = match resume_from {
            Some(from) => chain
                .history
                .iter()
                .filter(|event| event.block.number >= from)
                .cloned()
                .map(Ok)
                .collect(),
            None => Vec::new(),
        };

        let live = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(futures::stream::iter(replay).chain(live).boxed())
    }

    async fn query(&self, _contract: &AccountId, call: &ContractCall) -> LedgerResult<Vec<u8>> {
        Err(LedgerError::Client(format!("query {} not supported", call.method())))
    }

    async fn execute(
        &self,
        _contract: &AccountId,
        call: &ContractCall,
        _signer: &sr25519::Pair,
    ) -> LedgerResult<Receipt> {
        Err(LedgerError::Client(format!("execute {} not supported", call.method())))
    }
}
