//! Output of one compute execution.

use crate::job::JobId;
use serde::Serialize;

/// Result of running a job payload.
///
/// Created by the executor, consumed once by the orchestrator and never
/// persisted beyond the attestation it feeds. `error` is set exactly when
/// `success` is false, and a failed result never carries a `result_hash`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Job that was executed.
    pub job_id: JobId,
    /// Whether the computation produced a usable output.
    pub success: bool,
    /// Hex SHA-256 digest of the canonical output.
    pub result_hash: Option<String>,
    /// Output value, `null` on failure.
    pub output_data: serde_json::Value,
    /// Wall-clock execution time.
    pub execution_time_ms: u64,
    /// Failure description.
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Successful execution.
    pub fn succeeded(
        job_id: JobId,
        output_data: serde_json::Value,
        result_hash: String,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            job_id,
            success: true,
            result_hash: Some(result_hash),
            output_data,
            execution_time_ms,
            error: None,
        }
    }

    /// Business-level failure.
    pub fn failed(job_id: JobId, error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            job_id,
            success: false,
            result_hash: None,
            output_data: serde_json::Value::Null,
            execution_time_ms,
            error: Some(error.into()),
        }
    }
}
