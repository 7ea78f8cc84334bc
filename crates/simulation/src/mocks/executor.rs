//! Scripted compute executor.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use veritask_executor::{result_hash, ComputeExecutor, ExecutorError, ExecutorResult};
use veritask_types::{ExecutionResult, JobId};

/// Scripted outcome for one job.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionScript {
    /// Succeed with this output; the result hash is computed from it.
    Succeed(Value),
    /// Business failure with this error.
    Fail(String),
    /// Environment fault.
    Fault(String),
    /// Panic inside the executor.
    Panic(String),
}

/// Executor returning scripted results.
///
/// Jobs without a script succeed with a small deterministic output. An
/// optional gate holds every execution until a permit is added, so tests
/// can keep sagas in flight.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<JobId, ExecutionScript>>,
    executions: Mutex<HashMap<JobId, usize>>,
    gate: Option<Arc<Semaphore>>,
    execution_time_ms: u64,
}

impl ScriptedExecutor {
    /// Executor where every job succeeds.
    pub fn new() -> Self {
        Self {
            execution_time_ms: 1500,
            ..Self::default()
        }
    }

    /// Hold executions until `gate` grants a permit. Permits are consumed.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Script the outcome of `job_id`.
    pub async fn script(&self, job_id: JobId, script: ExecutionScript) {
        self.scripts.lock().await.insert(job_id, script);
    }

    /// Times `job_id` was executed.
    pub async fn executions(&self, job_id: JobId) -> usize {
        self.executions.lock().await.get(&job_id).copied().unwrap_or(0)
    }

    /// Output a job without a script produces.
    pub fn default_output(job_id: JobId) -> Value {
        json!({
            "jobId": job_id,
            "model": "llama-2-7b",
            "result": "Generated response for: Analyze data",
        })
    }

    /// Result hash a job without a script produces.
    pub fn default_hash(job_id: JobId) -> String {
        result_hash(&Self::default_output(job_id)).unwrap_or_default()
    }
}

#[async_trait]
impl ComputeExecutor for ScriptedExecutor {
    async fn execute(&self, job_id: JobId, _payload_ref: &[u8]) -> ExecutorResult<ExecutionResult> {
        *self.executions.lock().await.entry(job_id).or_insert(0) += 1;

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let script = self.scripts.lock().await.get(&job_id).cloned();
        let elapsed = self.execution_time_ms;
        match script {
            None => {
                let output = Self::default_output(job_id);
                let hash = result_hash(&output)?;
                Ok(ExecutionResult::succeeded(job_id, output, hash, elapsed))
            }
            Some(ExecutionScript::Succeed(output)) => {
                let hash = result_hash(&output)?;
                Ok(ExecutionResult::succeeded(job_id, output, hash, elapsed))
            }
            Some(ExecutionScript::Fail(error)) => Ok(ExecutionResult::failed(job_id, error, elapsed)),
            Some(ExecutionScript::Fault(reason)) => Err(ExecutorError::TaskPanicked(reason)),
            Some(ExecutionScript::Panic(message)) => panic!("{}", message),
        }
    }
}
