//! Saga test harness.
//!
//! Wires a [`JobOrchestrator`] to the in-memory mocks.

use crate::mocks::{worker_key_holder, MockSettlementGateway, ScriptedExecutor};
use prometheus::Registry;
use std::sync::Arc;
use veritask_attestation::{AttestationProducer, KeyHolder};
use veritask_ledger::SettlementGateway;
use veritask_orchestrator::{JobOrchestrator, OrchestratorConfig, SagaMetrics, SagaOutcome, SagaResult};
use veritask_types::{AccountId, BlockRef, JobId, JobSubmitted};

/// Job-processor address used in simulated events.
pub const PROCESSOR_ADDRESS: [u8; 32] = [0x33; 32];

/// Builder for [`SagaHarness`].
pub struct HarnessBuilder {
    config: OrchestratorConfig,
    keys: Arc<dyn KeyHolder>,
    gateway: MockSettlementGateway,
    executor: ScriptedExecutor,
}

impl HarnessBuilder {
    /// Orchestrator configuration.
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Attestation key holder.
    pub fn keys(mut self, keys: Arc<dyn KeyHolder>) -> Self {
        self.keys = keys;
        self
    }

    /// Settlement gateway.
    pub fn gateway(mut self, gateway: MockSettlementGateway) -> Self {
        self.gateway = gateway;
        self
    }

    /// Executor.
    pub fn executor(mut self, executor: ScriptedExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Build the harness on a fresh metrics registry.
    pub fn build(self) -> SagaResult<SagaHarness> {
        let registry = Registry::new();
        let metrics = Arc::new(SagaMetrics::new(&registry)?);
        let gateway = Arc::new(self.gateway);
        let executor = Arc::new(self.executor);

        let settlement: Arc<dyn SettlementGateway> = gateway.clone();
        let orchestrator = JobOrchestrator::new(
            self.config,
            settlement,
            executor.clone(),
            AttestationProducer::new(self.keys),
            metrics,
        );

        Ok(SagaHarness {
            gateway,
            executor,
            orchestrator,
            registry,
        })
    }
}

/// Orchestrator wired to mocks.
pub struct SagaHarness {
    /// In-memory ledger.
    pub gateway: Arc<MockSettlementGateway>,
    /// Scripted executor.
    pub executor: Arc<ScriptedExecutor>,
    /// Orchestrator under test.
    pub orchestrator: JobOrchestrator,
    /// Registry holding the saga metrics.
    pub registry: Registry,
}

impl SagaHarness {
    /// Builder with default configuration, worker key and mocks.
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            config: fast_config(),
            keys: Arc::new(worker_key_holder()),
            gateway: MockSettlementGateway::new(),
            executor: ScriptedExecutor::new(),
        }
    }

    /// The `JobSubmitted` event the processor contract would emit.
    pub fn submitted(job_id: JobId, payload: Vec<u8>) -> JobSubmitted {
        JobSubmitted {
            contract: AccountId::from(PROCESSOR_ADDRESS),
            block: BlockRef {
                number: job_id,
                hash: format!("0x{:064x}", job_id),
            },
            job_id,
            encrypted_payload: payload,
        }
    }

    /// Register `job_id` on the ledger and run its saga to the end.
    pub async fn submit_and_run(&self, job_id: JobId) -> SagaOutcome {
        self.gateway.submit_job(job_id, Vec::new()).await;
        self.orchestrator
            .handle_submitted(Self::submitted(job_id, Vec::new()))
            .await
    }
}

/// Orchestrator configuration with millisecond backoff and no periodic
/// sweep.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        concurrency_limit: 4,
        release_attempts: 3,
        release_backoff_ms: 1,
        recover_on_start: false,
        sweep_interval_ms: 0,
    }
}
