//! Compute payload envelope.
//!
//! Wire format: base64-wrapped JSON
//! `{ "model": .., "prompt": .., "parameters": { "temperature": .., "max_tokens": .. } }`.

use base64::Engine;
use serde::{Deserialize, Serialize};

const DEFAULT_MODEL: &str = "llama-2-7b";
const DEFAULT_PROMPT: &str = "Analyze data";

/// Sampling parameters of a generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    /// Sampling temperature.
    pub temperature: f64,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 150,
        }
    }
}

/// Versioned compute request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputePayload {
    /// Model identifier.
    pub model: String,
    /// Prompt text.
    pub prompt: String,
    /// Generation parameters; defaults apply when absent.
    #[serde(default)]
    pub parameters: GenerationParameters,
}

impl Default for ComputePayload {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            parameters: GenerationParameters::default(),
        }
    }
}

/// How a payload was turned into an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadDecoding {
    /// Base64-wrapped JSON, the canonical wire form.
    Envelope,
    /// Bare JSON without the base64 wrapper.
    BareJson,
    /// Undecodable payload replaced by the default envelope.
    Defaulted {
        /// Why the canonical and bare decodings failed.
        reason: String,
    },
}

impl ComputePayload {
    /// Decode a payload, falling back to the default envelope.
    ///
    /// Never fails; the returned [`PayloadDecoding`] says which path was
    /// taken so callers can report the fallback.
    pub fn decode_lenient(raw: &[u8]) -> (Self, PayloadDecoding) {
        let trimmed = raw.trim_ascii();

        let envelope_err = match base64::engine::general_purpose::STANDARD.decode(trimmed) {
            Ok(json) => match serde_json::from_slice::<ComputePayload>(&json) {
                Ok(payload) => return (payload, PayloadDecoding::Envelope),
                Err(e) => format!("envelope json: {}", e),
            },
            Err(e) => format!("base64: {}", e),
        };

        match serde_json::from_slice::<ComputePayload>(trimmed) {
            Ok(payload) => (payload, PayloadDecoding::BareJson),
            Err(e) => (
                Self::default(),
                PayloadDecoding::Defaulted {
                    reason: format!("{}; bare json: {}", envelope_err, e),
                },
            ),
        }
    }

    /// Encode into the canonical base64-wrapped wire form.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }
}
