//! Inference backends.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use veritask_types::ComputePayload;

/// Business-level inference failures. These become `success: false` results.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InferenceFailure {
    /// The requested model is not served by this backend.
    #[error("model unavailable: {model}")]
    ModelUnavailable {
        /// Model identifier.
        model: String,
    },

    /// Request parameters are out of range.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The backend failed to produce an output.
    #[error("inference failed: {0}")]
    Backend(String),
}

/// Something that can turn a compute request into an output value.
///
/// Implementations run inside a spawned task, so they must be `'static`.
#[async_trait]
pub trait InferenceBackend: Send + Sync + 'static {
    /// Produce the output for `request`.
    async fn infer(&self, request: &ComputePayload) -> Result<Value, InferenceFailure>;
}

/// Deterministic backend that answers from a fixed template.
///
/// Stands in for a model server: identical requests always produce
/// identical outputs, so result hashes are reproducible.
#[derive(Debug, Clone)]
pub struct TemplateBackend {
    supported_models: Vec<String>,
    latency: Duration,
}

impl Default for TemplateBackend {
    fn default() -> Self {
        Self {
            supported_models: vec![
                "llama-2-7b".to_string(),
                "llama-2-13b".to_string(),
                "mistral-7b".to_string(),
            ],
            latency: Duration::ZERO,
        }
    }
}

impl TemplateBackend {
    /// Backend serving exactly `models`.
    pub fn with_models<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            supported_models: models.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add a fixed delay to every inference.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Models this backend serves.
    pub fn supported_models(&self) -> &[String] {
        &self.supported_models
    }
}

#[async_trait]
impl InferenceBackend for TemplateBackend {
    async fn infer(&self, request: &ComputePayload) -> Result<Value, InferenceFailure> {
        if !self.supported_models.iter().any(|m| m == &request.model) {
            return Err(InferenceFailure::ModelUnavailable {
                model: request.model.clone(),
            });
        }

        let params = &request.parameters;
        if !(0.0..=2.0).contains(&params.temperature) {
            return Err(InferenceFailure::InvalidParameters(format!(
                "temperature {} outside [0, 2]",
                params.temperature
            )));
        }
        if params.max_tokens == 0 {
            return Err(InferenceFailure::InvalidParameters(
                "max_tokens must be > 0".to_string(),
            ));
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        debug!(model = %request.model, max_tokens = params.max_tokens, "Template inference");

        Ok(json!({
            "model": request.model,
            "result": format!("Generated response for: {}", request.prompt),
            "confidence": 0.95,
            "tokens": params.max_tokens,
        }))
    }
}
