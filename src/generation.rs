//! Generative model clients.
//!
//! [`GenerationError`] keeps a safety block apart from every other failure.
//! The orchestrator answers both with the same apology, but logs which one
//! happened.

use std::sync::Arc;

use thiserror::Error;

use crate::gemini::{GeminiClient, GeminiError};
use crate::ollama::{OllamaClientTrait, OllamaError};

#[derive(Debug, Error)]
pub enum GenerationError {
    /// Transport, quota, HTTP or malformed-response failure.
    #[error("Generation failed: {0}")]
    Failed(String),

    /// Content withheld by the provider's safety layer.
    #[error("Generation blocked by safety filter: {reason}")]
    Blocked { reason: String },
}

impl From<GeminiError> for GenerationError {
    fn from(error: GeminiError) -> Self {
        match error {
            GeminiError::Blocked { reason } => GenerationError::Blocked { reason },
            other => GenerationError::Failed(other.to_string()),
        }
    }
}

impl From<OllamaError> for GenerationError {
    fn from(error: OllamaError) -> Self {
        GenerationError::Failed(error.to_string())
    }
}

/// Produces a natural-language completion for a prompt.
pub trait GenerativeModel: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Model identifier used in logs and health output.
    fn model(&self) -> &str;
}

/// Gemini `generateContent` with permissive safety thresholds.
pub struct GeminiGenerator {
    client: Arc<GeminiClient>,
    model: String,
}

impl GeminiGenerator {
    pub const DEFAULT_MODEL: &'static str = "gemini-1.5-flash";

    pub fn new(client: Arc<GeminiClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

impl GenerativeModel for GeminiGenerator {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        Ok(self.client.generate_content(&self.model, prompt)?)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Generation through a local Ollama model.
pub struct OllamaGenerator {
    client: Arc<dyn OllamaClientTrait>,
    model: String,
}

impl OllamaGenerator {
    pub fn new(client: Arc<dyn OllamaClientTrait>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

impl GenerativeModel for OllamaGenerator {
    fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let text = self.client.generate(&self.model, prompt)?;
        if text.trim().is_empty() {
            return Err(GenerationError::Failed(
                "Model returned an empty response".to_string(),
            ));
        }
        Ok(text)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
