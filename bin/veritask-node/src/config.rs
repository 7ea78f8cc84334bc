//! Node configuration loaded from a TOML file.

use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use veritask_executor::ExecutorConfig;
use veritask_ledger::{ContractAddresses, RetryPolicy};
use veritask_orchestrator::OrchestratorConfig;
use veritask_subscriber::SubscriberConfig;
use veritask_types::AccountId;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for [`NodeConfig`].
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or missing.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level node configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Chain RPC WebSocket endpoint.
    #[serde(default = "default_chain_endpoint")]
    pub chain_endpoint: String,

    /// Contract addresses, SS58 or 0x-prefixed hex.
    #[serde(default)]
    pub contracts: ContractsSection,

    /// Signing keys.
    #[serde(default)]
    pub keys: KeysSection,

    #[serde(default)]
    pub orchestrator: OrchestratorSection,

    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub subscriber: SubscriberSection,

    #[serde(default)]
    pub metrics: MetricsSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractsSection {
    #[serde(default)]
    pub job_queue: String,
    #[serde(default)]
    pub payment_escrow: String,
    #[serde(default)]
    pub job_processor: String,
    pub mev_protection: Option<String>,
}

/// Secret URIs for the worker and admin keys.
#[derive(Clone, Deserialize)]
pub struct KeysSection {
    /// Signs status updates and attestations.
    #[serde(default = "default_worker_suri")]
    pub worker_suri: String,
    /// Signs escrow release and refund.
    #[serde(default = "default_admin_suri")]
    pub admin_suri: String,
}

impl Default for KeysSection {
    fn default() -> Self {
        Self {
            worker_suri: default_worker_suri(),
            admin_suri: default_admin_suri(),
        }
    }
}

impl std::fmt::Debug for KeysSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeysSection")
            .field("worker_suri", &"<redacted>")
            .field("admin_suri", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,
    #[serde(default = "default_release_attempts")]
    pub release_attempts: u32,
    #[serde(default = "default_release_backoff_ms")]
    pub release_backoff_ms: u64,
    #[serde(default = "default_true")]
    pub recover_on_start: bool,
    /// Recovery sweep period while running; 0 disables it.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            execution_timeout_ms: default_execution_timeout_ms(),
            release_attempts: default_release_attempts(),
            release_backoff_ms: default_release_backoff_ms(),
            recover_on_start: true,
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

/// Transport retry schedule for every ledger call.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberSection {
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Finalized blocks replayed after a resubscribe, at most.
    #[serde(default = "default_max_backfill_blocks")]
    pub max_backfill_blocks: u64,
}

impl Default for SubscriberSection {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_backfill_blocks: default_max_backfill_blocks(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

fn default_chain_endpoint() -> String {
    "ws://127.0.0.1:9944".to_string()
}

fn default_worker_suri() -> String {
    "//Alice".to_string()
}

fn default_admin_suri() -> String {
    "//Alice".to_string()
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_execution_timeout_ms() -> u64 {
    300_000
}

fn default_release_attempts() -> u32 {
    3
}

fn default_release_backoff_ms() -> u64 {
    1000
}

fn default_sweep_interval_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_event_buffer_size() -> usize {
    256
}

fn default_reconnect_interval_ms() -> u64 {
    5000
}

fn default_max_backfill_blocks() -> u64 {
    1200
}

fn default_metrics_port() -> u16 {
    9615
}

fn default_true() -> bool {
    true
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chain_endpoint: default_chain_endpoint(),
            contracts: ContractsSection::default(),
            keys: KeysSection::default(),
            orchestrator: OrchestratorSection::default(),
            retry: RetrySection::default(),
            subscriber: SubscriberSection::default(),
            metrics: MetricsSection::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Check ranges and that every contract address parses.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.chain_endpoint.starts_with("ws://") && !self.chain_endpoint.starts_with("wss://") {
            return Err(ConfigError::Invalid(
                "chain_endpoint must start with ws:// or wss://".to_string(),
            ));
        }
        if self.orchestrator.concurrency_limit == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.release_attempts == 0 || self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "attempt counts must be at least 1".to_string(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.subscriber.event_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "subscriber.event_buffer_size must be at least 1".to_string(),
            ));
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Invalid("metrics.port cannot be 0".to_string()));
        }
        self.contract_addresses().map(|_| ())
    }

    /// Parsed contract addresses.
    pub fn contract_addresses(&self) -> Result<ContractAddresses, ConfigError> {
        Ok(ContractAddresses {
            job_queue: parse_account("contracts.job_queue", &self.contracts.job_queue)?,
            payment_escrow: parse_account(
                "contracts.payment_escrow",
                &self.contracts.payment_escrow,
            )?,
            job_processor: parse_account("contracts.job_processor", &self.contracts.job_processor)?,
            mev_protection: self
                .contracts
                .mev_protection
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(|s| parse_account("contracts.mev_protection", s))
                .transpose()?,
        })
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            concurrency_limit: self.orchestrator.concurrency_limit,
            release_attempts: self.orchestrator.release_attempts,
            release_backoff_ms: self.orchestrator.release_backoff_ms,
            recover_on_start: self.orchestrator.recover_on_start,
            sweep_interval_ms: self.orchestrator.sweep_interval_ms,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            execution_timeout_ms: self.orchestrator.execution_timeout_ms,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff_ms: self.retry.initial_backoff_ms,
            max_backoff_ms: self.retry.max_backoff_ms,
            multiplier: self.retry.multiplier,
        }
    }

    pub fn subscriber_config(&self) -> SubscriberConfig {
        SubscriberConfig {
            event_buffer_size: self.subscriber.event_buffer_size,
            reconnect_interval_ms: self.subscriber.reconnect_interval_ms,
        }
    }
}

fn parse_account(key: &str, value: &str) -> Result<AccountId, ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Invalid(format!("{} is required", key)));
    }
    AccountId::from_str(value)
        .map_err(|e| ConfigError::Invalid(format!("{} is not a valid address: {}", key, e)))
}
