use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::answerer::{Answer, BuildError, QueryEngine, QueryEngineBuilder, QueryError};
use crate::config::{Backend, ConfigError, RagConfig};
use crate::embedding::{EmbeddingProvider, GeminiEmbedder, OllamaEmbedder};
use crate::gemini::{GeminiClient, GeminiClientBuilder, GeminiError};
use crate::generation::{GeminiGenerator, GenerativeModel, OllamaGenerator};
use crate::index::PineconeIndex;
use crate::ollama::{OllamaClientBuilder, OllamaClientTrait, OllamaError};
use crate::pinecone::{PineconeClientBuilder, PineconeError};

/// Detail returned while the pipeline is not initialised.
pub const NOT_INITIALIZED_DETAIL: &str = "RAG Engine not initialized";
/// Detail returned for an empty question.
pub const EMPTY_QUESTION_DETAIL: &str = "Question must not be empty";
/// Detail returned for every request-time failure.
pub const INTERNAL_ERROR_DETAIL: &str = "Failed to answer the question. Please try again later.";

/// Why the pipeline could not be constructed.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Gemini client error: {0}")]
    Gemini(#[from] GeminiError),

    #[error("Ollama client error: {0}")]
    Ollama(#[from] OllamaError),

    #[error("Pinecone client error: {0}")]
    Pinecone(#[from] PineconeError),

    #[error("query engine error: {0}")]
    Engine(#[from] BuildError),

    #[error("dimension check failed: {0}")]
    DimensionProbe(#[from] QueryError),

    #[error("embedding dimension {embedding} does not match index dimension {index}")]
    DimensionMismatch { embedding: usize, index: usize },
}

/// Incoming chat request. The frontend sends the question as `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error payload: `{"detail": ...}` with an HTTP-style status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    #[serde(skip)]
    pub status: u16,
    pub detail: String,
}

impl ErrorResponse {
    pub fn service_unavailable() -> Self {
        Self {
            status: 503,
            detail: NOT_INITIALIZED_DETAIL.to_string(),
        }
    }

    pub fn bad_request() -> Self {
        Self {
            status: 400,
            detail: EMPTY_QUESTION_DETAIL.to_string(),
        }
    }

    pub fn internal() -> Self {
        Self {
            status: 500,
            detail: INTERNAL_ERROR_DETAIL.to_string(),
        }
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.detail, self.status)
    }
}

impl std::error::Error for ErrorResponse {}

enum State {
    Ready(QueryEngine),
    Unavailable { reason: String },
}

/// Request boundary in front of the query engine.
///
/// ChatService is constructed once at startup. If construction fails the
/// service stays up in an unavailable state and every request fails fast
/// with 503. Backend error details are logged and never returned.
///
/// # Examples
///
/// ```no_run
/// use studyrag::config::RagConfig;
/// use studyrag::service::{ChatRequest, ChatService};
///
/// # fn main() -> anyhow::Result<()> {
/// let config = RagConfig::from_env()?;
/// let service = ChatService::from_config(&config);
///
/// match service.handle(&ChatRequest::new("What is kinetic energy?")) {
///     Ok(answer) => println!("{}", answer.answer()),
///     Err(e) => eprintln!("{}", e.detail),
/// }
/// # Ok(())
/// # }
/// ```
pub struct ChatService {
    state: State,
}

impl ChatService {
    /// Wraps an already built engine.
    pub fn new(engine: QueryEngine) -> Self {
        Self {
            state: State::Ready(engine),
        }
    }

    /// A service that rejects every request with 503.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: State::Unavailable {
                reason: reason.into(),
            },
        }
    }

    /// Builds the pipeline from `config`, falling back to the unavailable
    /// state on failure.
    pub fn from_config(config: &RagConfig) -> Self {
        match build_engine(config) {
            Ok(engine) => {
                tracing::info!(
                    embedding = %config.embedding_backend,
                    generation = %config.generation_backend,
                    index = %config.pinecone_index,
                    top_k = config.top_k,
                    "RAG engine initialized"
                );
                Self::new(engine)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to initialize RAG engine");
                Self::unavailable(e.to_string())
            }
        }
    }

    /// Reads the configuration from the environment, then builds the pipeline.
    pub fn from_env() -> Self {
        match RagConfig::from_env() {
            Ok(config) => Self::from_config(&config),
            Err(e) => {
                tracing::error!(error = %e, "invalid RAG configuration");
                Self::unavailable(InitError::from(e).to_string())
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    pub fn engine(&self) -> Option<&QueryEngine> {
        match &self.state {
            State::Ready(engine) => Some(engine),
            State::Unavailable { .. } => None,
        }
    }

    /// Logged cause of the unavailable state.
    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.state {
            State::Ready(_) => None,
            State::Unavailable { reason } => Some(reason),
        }
    }

    /// Answers one chat request.
    pub fn handle(&self, request: &ChatRequest) -> Result<Answer, ErrorResponse> {
        let engine = self.engine().ok_or_else(ErrorResponse::service_unavailable)?;

        engine.answer(&request.message).map_err(|e| match e {
            QueryError::EmptyQuestion => ErrorResponse::bad_request(),
            other => {
                tracing::error!(
                    stage = ?other.stage().map(|s| s.to_string()),
                    error = %other,
                    "chat request failed"
                );
                ErrorResponse::internal()
            }
        })
    }
}

/// Constructs the clients and engine described by `config`.
///
/// With `verify_dimension` set, the query embedding dimension is compared
/// with the index dimension and a mismatch fails initialization.
pub fn build_engine(config: &RagConfig) -> Result<QueryEngine, InitError> {
    let gemini = match (config.embedding_backend, config.generation_backend) {
        (Backend::Ollama, Backend::Ollama) => None,
        _ => {
            let mut builder = GeminiClientBuilder::new()
                .base_url(config.gemini_base_url.clone())
                .timeout(config.request_timeout);
            if let Some(key) = &config.gemini_api_key {
                builder = builder.api_key(key.clone());
            }
            Some(Arc::new(builder.build()?))
        }
    };

    let ollama: Option<Arc<dyn OllamaClientTrait>> =
        match (config.embedding_backend, config.generation_backend) {
            (Backend::Gemini, Backend::Gemini) => None,
            _ => Some(Arc::new(
                OllamaClientBuilder::new()
                    .base_url(config.ollama_host.clone())
                    .model(config.generation_model())
                    .timeout(config.request_timeout)
                    .build()?,
            )),
        };

    let embedder = build_embedder(config, gemini.as_ref(), ollama.as_ref())?;
    let generator = build_generator(config, gemini.as_ref(), ollama.as_ref())?;

    let mut pinecone = PineconeClientBuilder::new()
        .api_key(config.pinecone_api_key.clone())
        .index_name(config.pinecone_index.clone())
        .timeout(config.request_timeout);
    if let Some(host) = &config.pinecone_index_host {
        pinecone = pinecone.index_host(host.clone());
    }
    if let Some(namespace) = &config.pinecone_namespace {
        pinecone = pinecone.namespace(namespace.clone());
    }
    let index = PineconeIndex::new(Arc::new(pinecone.build()?));

    let engine = QueryEngineBuilder::new()
        .embedder(embedder)
        .index(Arc::new(index))
        .generator(generator)
        .top_k(config.top_k)
        .max_context_chars(config.max_context_chars)
        .build()?;

    if config.verify_dimension {
        let report = engine.check_dimensions()?;
        if !report.is_compatible() {
            return Err(InitError::DimensionMismatch {
                embedding: report.embedding,
                index: report.index,
            });
        }
        tracing::debug!(dimension = report.index, "embedding dimension verified");
    }

    Ok(engine)
}

fn build_embedder(
    config: &RagConfig,
    gemini: Option<&Arc<GeminiClient>>,
    ollama: Option<&Arc<dyn OllamaClientTrait>>,
) -> Result<Arc<dyn EmbeddingProvider>, InitError> {
    let embedder: Arc<dyn EmbeddingProvider> = match config.embedding_backend {
        Backend::Gemini => {
            let client = gemini.ok_or(GeminiError::MissingApiKey)?;
            let mut embedder = GeminiEmbedder::new(client.clone(), config.gemini_embed_model.clone());
            if let Some(dimension) = config.embedding_dimension {
                embedder = embedder.with_dimension(dimension);
            }
            Arc::new(embedder)
        }
        Backend::Ollama => {
            let client = ollama.ok_or_else(|| {
                OllamaError::InvalidUrl(format!("no client for {}", config.ollama_host))
            })?;
            let mut embedder = OllamaEmbedder::new(client.clone(), config.ollama_embed_model.clone());
            if let Some(dimension) = config.embedding_dimension {
                embedder = embedder.with_dimension(dimension);
            }
            Arc::new(embedder)
        }
    };
    Ok(embedder)
}

fn build_generator(
    config: &RagConfig,
    gemini: Option<&Arc<GeminiClient>>,
    ollama: Option<&Arc<dyn OllamaClientTrait>>,
) -> Result<Arc<dyn GenerativeModel>, InitError> {
    let generator: Arc<dyn GenerativeModel> = match config.generation_backend {
        Backend::Gemini => {
            let client = gemini.ok_or(GeminiError::MissingApiKey)?;
            Arc::new(GeminiGenerator::new(client.clone(), config.gemini_model.clone()))
        }
        Backend::Ollama => {
            let client = ollama.ok_or_else(|| {
                OllamaError::InvalidUrl(format!("no client for {}", config.ollama_host))
            })?;
            Arc::new(OllamaGenerator::new(client.clone(), config.generation_model()))
        }
    };
    Ok(generator)
}
