//! Veritask worker node
//!
//! Watches the job-processor contract for submitted jobs, runs each one
//! through the executor, attests the result and settles the escrow.
//! Jobs left mid-saga are recovered at startup and by a periodic sweep.

mod config;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use config::NodeConfig;
use prometheus::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use veritask_attestation::{AttestationProducer, KeyHolder, Sr25519KeyHolder};
use veritask_executor::{PayloadExecutor, TemplateBackend};
use veritask_ledger::{LedgerSettlementGateway, SettlementGateway, SubxtLedgerClient};
use veritask_orchestrator::{JobOrchestrator, SagaMetrics};
use veritask_subscriber::{ChainEventSubscriber, ContractRegistry};
use veritask_types::AccountId;

#[derive(Parser)]
#[command(name = "veritask-node")]
#[command(about = "Veritask off-chain worker node", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    /// Chain RPC WebSocket endpoint
    #[arg(long, env = "RPC_URL")]
    rpc_url: Option<String>,

    #[arg(long, env = "JOB_QUEUE_ADDRESS")]
    job_queue_address: Option<String>,

    #[arg(long, env = "PAYMENT_ESCROW_ADDRESS")]
    payment_escrow_address: Option<String>,

    #[arg(long, env = "JOB_PROCESSOR_ADDRESS")]
    job_processor_address: Option<String>,

    #[arg(long, env = "MEV_PROTECTION_ADDRESS")]
    mev_protection_address: Option<String>,

    /// Worker key SURI (status updates and attestations)
    #[arg(long, env = "WORKER_SEED", hide_env_values = true)]
    worker_seed: Option<String>,

    /// Admin key SURI (escrow release and refund)
    #[arg(long, env = "ADMIN_SEED", hide_env_values = true)]
    admin_seed: Option<String>,

    /// Maximum number of sagas running at once
    #[arg(long, env = "CONCURRENCY_LIMIT")]
    concurrency_limit: Option<usize>,

    /// Skip the recovery sweep at startup
    #[arg(long)]
    no_recover: bool,
}

impl Cli {
    fn apply(&self, config: &mut NodeConfig) {
        if let Some(url) = &self.rpc_url {
            config.chain_endpoint = url.clone();
        }
        if let Some(addr) = &self.job_queue_address {
            config.contracts.job_queue = addr.clone();
        }
        if let Some(addr) = &self.payment_escrow_address {
            config.contracts.payment_escrow = addr.clone();
        }
        if let Some(addr) = &self.job_processor_address {
            config.contracts.job_processor = addr.clone();
        }
        if let Some(addr) = &self.mev_protection_address {
            config.contracts.mev_protection = Some(addr.clone());
        }
        if let Some(seed) = &self.worker_seed {
            config.keys.worker_suri = seed.clone();
        }
        if let Some(seed) = &self.admin_seed {
            config.keys.admin_suri = seed.clone();
        }
        if let Some(limit) = self.concurrency_limit {
            config.orchestrator.concurrency_limit = limit;
        }
        if self.no_recover {
            config.orchestrator.recover_on_start = false;
        }
    }
}

fn init_logging(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NodeConfig::default(),
    };
    cli.apply(&mut config);
    config.validate()?;
    let addresses = config.contract_addresses()?;

    info!("Starting Veritask node");
    info!(
        rpc_url = %config.chain_endpoint,
        job_processor = %addresses.job_processor,
        concurrency_limit = config.orchestrator.concurrency_limit,
        "Configuration loaded"
    );

    let worker = Sr25519KeyHolder::from_suri(&config.keys.worker_suri)
        .context("invalid worker key")?;
    let admin =
        Sr25519KeyHolder::from_suri(&config.keys.admin_suri).context("invalid admin key")?;
    let worker_account = AccountId::from(worker.public_key());
    info!(worker = %worker_account, "Worker key loaded");

    let registry = Arc::new(Registry::new());
    let saga_metrics = Arc::new(SagaMetrics::new(&registry)?);
    if config.metrics.enabled {
        let registry = Arc::clone(&registry);
        let port = config.metrics.port;
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(registry, port).await {
                error!("Metrics server failed: {}", e);
            }
        });
    }

    let client = Arc::new(
        SubxtLedgerClient::connect(&config.chain_endpoint, worker_account)
            .await
            .context("connecting to chain")?
            .with_max_backfill_blocks(config.subscriber.max_backfill_blocks),
    );
    let settlement: Arc<dyn SettlementGateway> = Arc::new(LedgerSettlementGateway::new(
        client.clone(),
        &addresses,
        worker.pair().clone(),
        admin.pair().clone(),
        config.retry_policy(),
    ));
    let executor = Arc::new(PayloadExecutor::new(
        config.executor_config(),
        TemplateBackend::default(),
    ));
    let orchestrator = JobOrchestrator::new(
        config.orchestrator_config(),
        settlement,
        executor,
        AttestationProducer::new(Arc::new(worker)),
        saga_metrics,
    );

    let (intake_tx, intake_rx) = mpsc::channel(config.subscriber.event_buffer_size);
    let (subscriber_shutdown_tx, subscriber_shutdown_rx) = mpsc::channel(1);
    let (orchestrator_shutdown_tx, orchestrator_shutdown_rx) = mpsc::channel(1);

    let mut subscriber = ChainEventSubscriber::new(
        config.subscriber_config(),
        ContractRegistry::from_addresses(&addresses),
        client.clone(),
        intake_tx,
    )
    .with_shutdown(subscriber_shutdown_rx);
    let mut subscriber_task = tokio::spawn(async move { subscriber.run().await });

    let runner = orchestrator.clone();
    let orchestrator_task =
        tokio::spawn(async move { runner.run(intake_rx, orchestrator_shutdown_rx).await });

    info!("Veritask node running");

    let subscriber_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for ctrl-c")?;
            info!("Shutdown signal received");
            let _ = subscriber_shutdown_tx.send(()).await;
            (&mut subscriber_task).await
        }
        result = &mut subscriber_task => {
            warn!("Chain event subscriber exited");
            result
        }
    };
    match subscriber_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Chain event subscriber failed"),
        Err(e) => error!(error = %e, "Chain event subscriber task panicked"),
    }

    let _ = orchestrator_shutdown_tx.send(()).await;
    if let Err(e) = orchestrator_task.await {
        error!(error = %e, "Orchestrator task panicked");
    }
    client.disconnect().await;

    info!("Veritask node stopped");
    Ok(())
}
