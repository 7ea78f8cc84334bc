//! Compute executor service.

use crate::backend::InferenceBackend;
use crate::error::ExecutorResult;
use crate::hashing::result_hash;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use veritask_types::{ComputePayload, ExecutionResult, JobId, PayloadDecoding};

/// Runs job payloads.
///
/// The orchestrator depends on this trait so that tests can script
/// execution outcomes.
#[async_trait]
pub trait ComputeExecutor: Send + Sync {
    /// Execute the payload of `job_id`.
    ///
    /// Business failures return `Ok` with `success: false`. `Err` is
    /// reserved for environment faults.
    async fn execute(&self, job_id: JobId, payload_ref: &[u8]) -> ExecutorResult<ExecutionResult>;
}

/// Configuration for the payload executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on a single execution, in milliseconds.
    pub execution_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            execution_timeout_ms: 300_000, // 5 minutes
        }
    }
}

/// Executor that decodes the payload envelope and hands it to an
/// [`InferenceBackend`].
pub struct PayloadExecutor<B: InferenceBackend> {
    config: ExecutorConfig,
    backend: Arc<B>,
}

impl<B: InferenceBackend> PayloadExecutor<B> {
    /// Create an executor over `backend`.
    pub fn new(config: ExecutorConfig, backend: B) -> Self {
        Self {
            config,
            backend: Arc::new(backend),
        }
    }

    /// Get the executor configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn decode(&self, job_id: JobId, payload_ref: &[u8]) -> ComputePayload {
        let (request, decoding) = ComputePayload::decode_lenient(payload_ref);
        match decoding {
            PayloadDecoding::Envelope => {}
            PayloadDecoding::BareJson => {
                debug!(job_id = job_id, "Payload was bare JSON, accepted without base64 wrapper");
            }
            PayloadDecoding::Defaulted { reason } => {
                warn!(
                    job_id = job_id,
                    reason = %reason,
                    policy = "lenient_payload",
                    "Payload undecodable, executing default envelope"
                );
            }
        }
        request
    }
}

#[async_trait]
impl<B: InferenceBackend> ComputeExecutor for PayloadExecutor<B> {
    async fn execute(&self, job_id: JobId, payload_ref: &[u8]) -> ExecutorResult<ExecutionResult> {
        let request = self.decode(job_id, payload_ref);
        let timeout_ms = self.config.execution_timeout_ms;

        debug!(
            job_id = job_id,
            model = %request.model,
            timeout_ms = timeout_ms,
            "Executing job"
        );

        let start = Instant::now();
        let backend = Arc::clone(&self.backend);
        let mut handle = tokio::spawn(async move { backend.infer(&request).await });

        let joined =
            match tokio::time::timeout(Duration::from_millis(timeout_ms), &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    let elapsed = start.elapsed().as_millis() as u64;
                    warn!(job_id = job_id, timeout_ms = timeout_ms, "Execution timed out");
                    return Ok(ExecutionResult::failed(
                        job_id,
                        format!("execution timed out after {}ms", timeout_ms),
                        elapsed,
                    ));
                }
            };

        let elapsed = start.elapsed().as_millis() as u64;
        match joined? {
            Ok(output) => {
                let hash = result_hash(&output)?;
                info!(
                    job_id = job_id,
                    execution_time_ms = elapsed,
                    result_hash = %hash,
                    "Execution succeeded"
                );
                Ok(ExecutionResult::succeeded(job_id, output, hash, elapsed))
            }
            Err(failure) => {
                warn!(
                    job_id = job_id,
                    execution_time_ms = elapsed,
                    error = %failure,
                    "Execution failed"
                );
                Ok(ExecutionResult::failed(job_id, failure.to_string(), elapsed))
            }
        }
    }
}
