//! Query embedding providers.
//!
//! The orchestrator only sees [`EmbeddingProvider`]; which backend is active
//! (hosted Gemini embeddings or a model served by a local Ollama) is decided
//! at startup from configuration.

use std::sync::Arc;

use thiserror::Error;

use crate::gemini::{GeminiClient, GeminiError};
use crate::ollama::{OllamaClientTrait, OllamaError};

/// Dense query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

/// Errors raised while embedding a question.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Gemini embedding failed: {0}")]
    Gemini(#[from] GeminiError),

    #[error("Ollama embedding failed: {0}")]
    Ollama(#[from] OllamaError),

    #[error("Embedding backend returned an empty vector")]
    EmptyVector,

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Failure reported by a provider outside this crate.
    #[error("Embedding backend error: {0}")]
    Backend(String),
}

/// Converts text into a fixed-dimension vector.
///
/// Implementations must be safe to share between concurrent requests and
/// must never return a partial or empty vector.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError>;

    /// Short backend label used in logs and health output.
    fn name(&self) -> &str;

    /// Dimension this provider is configured to produce, if declared.
    fn dimension(&self) -> Option<usize> {
        None
    }
}

/// Validates a raw backend vector against the declared dimension.
fn checked_vector(values: Vec<f32>, expected: Option<usize>) -> Result<EmbeddingVector, EmbeddingError> {
    if values.is_empty() {
        return Err(EmbeddingError::EmptyVector);
    }
    if let Some(expected) = expected
        && values.len() != expected
    {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: values.len(),
        });
    }
    Ok(EmbeddingVector::new(values))
}

/// Hosted embeddings through the Gemini `embedContent` endpoint.
pub struct GeminiEmbedder {
    client: Arc<GeminiClient>,
    model: String,
    dimension: Option<usize>,
}

impl GeminiEmbedder {
    /// Default hosted embedding model (768 dimensions).
    pub const DEFAULT_MODEL: &'static str = "text-embedding-004";

    pub fn new(client: Arc<GeminiClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            dimension: None,
        }
    }

    /// Requests vectors of exactly `dimension` values (`outputDimensionality`)
    /// and rejects anything else.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }
}

impl EmbeddingProvider for GeminiEmbedder {
    fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        let values = self.client.embed_content(&self.model, text, self.dimension)?;
        checked_vector(values, self.dimension)
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

/// Embeddings from a model served by a local Ollama instance.
pub struct OllamaEmbedder {
    client: Arc<dyn OllamaClientTrait>,
    model: String,
    dimension: Option<usize>,
}

impl OllamaEmbedder {
    /// Same family as the sentence-transformer used at ingestion (384 dimensions).
    pub const DEFAULT_MODEL: &'static str = "all-minilm";

    pub fn new(client: Arc<dyn OllamaClientTrait>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            dimension: None,
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }
}

impl EmbeddingProvider for OllamaEmbedder {
    fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        let values = self.client.embed(&self.model, text)?;
        checked_vector(values, self.dimension)
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}
