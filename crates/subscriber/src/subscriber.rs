//! Chain event subscriber.

use crate::error::{SubscriberError, SubscriberResult};
use crate::registry::ContractRegistry;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use veritask_ledger::{LedgerClient, LedgerResult, RawEvent};
use veritask_types::{DecodedEvent, ErrorClass, JobSubmitted};

/// Configuration for the chain event subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberConfig {
    /// Capacity of the intake channel to the orchestrator.
    pub event_buffer_size: usize,
    /// Delay before resubscribing after the stream drops (ms).
    pub reconnect_interval_ms: u64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 256,
            reconnect_interval_ms: 5000,
        }
    }
}

/// Counters over the subscriber's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    /// Raw events read from the stream.
    pub received: u64,
    /// Events from unregistered contracts.
    pub dropped_unknown_contract: u64,
    /// Events that failed schema decoding.
    pub decode_failures: u64,
    /// `JobSubmitted` events handed to the orchestrator.
    pub forwarded: u64,
    /// Subscriptions opened, including the first.
    pub subscriptions: u64,
}

enum Next {
    Shutdown,
    Item(Option<LedgerResult<RawEvent>>),
}

/// Subscribes to contract events and forwards job submissions.
pub struct ChainEventSubscriber {
    config: SubscriberConfig,
    registry: ContractRegistry,
    client: Arc<dyn LedgerClient>,
    intake_tx: mpsc::Sender<JobSubmitted>,
    shutdown_rx: Option<mpsc::Receiver<()>>,
    stats: SubscriberStats,
    resume_from: Option<u64>,
}

impl ChainEventSubscriber {
    /// Create a subscriber over `client` sending to `intake_tx`.
    pub fn new(
        config: SubscriberConfig,
        registry: ContractRegistry,
        client: Arc<dyn LedgerClient>,
        intake_tx: mpsc::Sender<JobSubmitted>,
    ) -> Self {
        Self {
            config,
            registry,
            client,
            intake_tx,
            shutdown_rx: None,
            stats: SubscriberStats::default(),
            resume_from: None,
        }
    }

    /// Set the shutdown receiver for graceful termination.
    pub fn with_shutdown(mut self, shutdown_rx: mpsc::Receiver<()>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    /// Get the subscriber configuration.
    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    /// Counters so far.
    pub fn stats(&self) -> SubscriberStats {
        self.stats
    }

    /// Block the next subscription replays from: the block of the last
    /// event read. Replay is inclusive, so events of that block may be
    /// delivered twice.
    pub fn resume_from(&self) -> Option<u64> {
        self.resume_from
    }

    /// Run until shutdown, resubscribing whenever the stream fails or ends.
    ///
    /// Returns an error only when the orchestrator intake has closed.
    pub async fn run(&mut self) -> SubscriberResult<()> {
        info!(
            contracts = self.registry.len(),
            "Starting chain event subscriber"
        );

        loop {
            match self.subscribe_and_listen().await {
                Ok(()) => {
                    info!(forwarded = self.stats.forwarded, "Chain event subscriber stopped");
                    return Ok(());
                }
                Err(SubscriberError::IntakeClosed) => {
                    warn!("Orchestrator intake closed, stopping subscriber");
                    return Err(SubscriberError::IntakeClosed);
                }
                Err(e) => {
                    warn!(error = %e, "Event subscription lost, resubscribing...");
                    let delay = Duration::from_millis(self.config.reconnect_interval_ms);
                    tokio::select! {
                        _ = wait_for_shutdown(&mut self.shutdown_rx) => {
                            info!("Chain event subscriber stopped during reconnect");
                            return Ok(());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn subscribe_and_listen(&mut self) -> SubscriberResult<()> {
        let mut stream = self
            .client
            .subscribe(&self.registry.addresses(), self.resume_from)
            .await?;
        self.stats.subscriptions += 1;
        debug!(
            subscription = self.stats.subscriptions,
            resume_from = ?self.resume_from,
            "Event subscription open"
        );

        loop {
            let next = tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown_rx) => Next::Shutdown,
                item = stream.next() => Next::Item(item),
            };

            match next {
                Next::Shutdown => return Ok(()),
                Next::Item(None) => return Err(SubscriberError::StreamEnded),
                Next::Item(Some(Ok(raw))) => self.process_event(raw).await?,
                Next::Item(Some(Err(e))) if e.class() == ErrorClass::DecodeFailure => {
                    self.stats.decode_failures += 1;
                    warn!(error = %e, "Skipping undecodable event");
                }
                Next::Item(Some(Err(e))) => return Err(e.into()),
            }
        }
    }

    /// Decode one raw event and forward it if it is a job submission.
    pub async fn process_event(&mut self, raw: RawEvent) -> SubscriberResult<()> {
        self.stats.received += 1;
        self.resume_from = Some(raw.block.number);

        let decoded = match self.registry.decode(&raw) {
            None => {
                self.stats.dropped_unknown_contract += 1;
                return Ok(());
            }
            Some(Ok(decoded)) => decoded,
            Some(Err(e)) => {
                self.stats.decode_failures += 1;
                warn!(
                    contract = %raw.contract,
                    block = %raw.block,
                    error = %e,
                    "Skipping undecodable contract event"
                );
                return Ok(());
            }
        };

        match decoded {
            DecodedEvent::JobSubmitted(event) => {
                debug!(
                    job_id = event.job_id,
                    block = %event.block,
                    "JobSubmitted event received"
                );
                self.intake_tx
                    .send(event)
                    .await
                    .map_err(|_| SubscriberError::IntakeClosed)?;
                self.stats.forwarded += 1;
            }
            DecodedEvent::JobStatusChanged(event) => {
                debug!(
                    job_id = event.job_id,
                    status = %event.status,
                    block = %event.block,
                    "JobStatusChanged event received"
                );
            }
            DecodedEvent::MevIntentBatched(event) => {
                info!(
                    batch_id = event.batch_id,
                    intent_count = event.intent_count,
                    block = %event.block,
                    "MEV intent batch sealed"
                );
            }
            DecodedEvent::Unknown(event) => {
                debug!(
                    contract = %event.contract,
                    variant = ?event.variant,
                    "Unrecognised contract event"
                );
            }
        }
        Ok(())
    }
}

async fn wait_for_shutdown(shutdown_rx: &mut Option<mpsc::Receiver<()>>) {
    match shutdown_rx {
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => std::future::pending().await,
    }
}
