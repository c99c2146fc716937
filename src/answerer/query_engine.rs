//! Retrieval-augmented answering.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::generation::{GenerationError, GenerativeModel};
use crate::index::{IndexQueryError, Match, VectorIndex};

use super::context::assemble;
use super::prompt::build_prompt;
use super::types::{Answer, FallbackReason, Stage};

/// Number of chunks retrieved per question unless configured otherwise.
pub const DEFAULT_TOP_K: usize = 3;

/// Request-level failures. Generation problems never appear here: they are
/// absorbed into the fallback [`Answer`].
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Question must not be empty")]
    EmptyQuestion,

    #[error("Embedding stage failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Retrieval stage failed: {0}")]
    Retrieval(#[from] IndexQueryError),
}

impl QueryError {
    /// Stage that failed, if the failure happened inside the pipeline.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            QueryError::EmptyQuestion => None,
            QueryError::Embedding(_) => Some(Stage::Embedding),
            QueryError::Retrieval(_) => Some(Stage::Retrieval),
        }
    }
}

/// Errors from [`QueryEngineBuilder::build`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("{0} must be set before building the query engine")]
    Missing(&'static str),

    #[error("top_k must be at least 1")]
    InvalidTopK,
}

/// Query-time embedding dimension next to the index's declared dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionReport {
    pub embedding: usize,
    pub index: usize,
}

impl DimensionReport {
    pub fn is_compatible(&self) -> bool {
        self.embedding == self.index
    }
}

/// Builder for constructing `QueryEngine` instances.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use studyrag::answerer::QueryEngineBuilder;
/// use studyrag::embedding::GeminiEmbedder;
/// use studyrag::gemini::GeminiClientBuilder;
/// use studyrag::generation::GeminiGenerator;
/// use studyrag::index::PineconeIndex;
/// use studyrag::pinecone::PineconeClientBuilder;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gemini = Arc::new(GeminiClientBuilder::new().api_key("...").build()?);
/// let pinecone = Arc::new(PineconeClientBuilder::new().api_key("...").build()?);
///
/// let engine = QueryEngineBuilder::new()
///     .embedder(Arc::new(GeminiEmbedder::new(gemini.clone(), "text-embedding-004")))
///     .index(Arc::new(PineconeIndex::new(pinecone)))
///     .generator(Arc::new(GeminiGenerator::new(gemini, "gemini-1.5-flash")))
///     .top_k(3)
///     .build()?;
///
/// let answer = engine.answer("What is kinetic energy?")?;
/// println!("{}", answer.answer());
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct QueryEngineBuilder {
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    index: Option<Arc<dyn VectorIndex>>,
    generator: Option<Arc<dyn GenerativeModel>>,
    top_k: Option<usize>,
    max_context_chars: Option<usize>,
}

impl QueryEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn GenerativeModel>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Chunks retrieved per question. Defaults to [`DEFAULT_TOP_K`].
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Optional character budget for the assembled context.
    pub fn max_context_chars(mut self, max: Option<usize>) -> Self {
        self.max_context_chars = max;
        self
    }

    pub fn build(self) -> Result<QueryEngine, BuildError> {
        let top_k = self.top_k.unwrap_or(DEFAULT_TOP_K);
        if top_k == 0 {
            return Err(BuildError::InvalidTopK);
        }

        Ok(QueryEngine {
            embedder: self.embedder.ok_or(BuildError::Missing("embedder"))?,
            index: self.index.ok_or(BuildError::Missing("index"))?,
            generator: self.generator.ok_or(BuildError::Missing("generator"))?,
            top_k,
            max_context_chars: self.max_context_chars,
        })
    }
}

/// Answers questions from the indexed textbook corpus.
///
/// Holds only shared read-only handles, so one engine can serve concurrent
/// callers. Each call runs its stages sequentially on the calling thread.
pub struct QueryEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    generator: Arc<dyn GenerativeModel>,
    top_k: usize,
    max_context_chars: Option<usize>,
}

impl QueryEngine {
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    /// Answers a question.
    ///
    /// Embedding and retrieval failures are returned as errors. An empty
    /// retrieval still goes through generation with an empty context. A failed
    /// or blocked generation yields [`Answer::fallback`].
    pub fn answer(&self, question: &str) -> Result<Answer, QueryError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }

        let span = tracing::info_span!("answer", question_len = question.len());
        let _guard = span.enter();
        let started = Instant::now();

        let matches = self.search(question, self.top_k)?;

        let assembled = assemble(&matches, self.max_context_chars);
        tracing::debug!(
            stage = %Stage::Assembly,
            used = assembled.used,
            context_chars = assembled.context.len(),
            sources = assembled.sources.len(),
            "context assembled"
        );

        let prompt = build_prompt(question, &assembled.context);
        tracing::debug!(stage = %Stage::Prompting, prompt_chars = prompt.len(), "prompt built");

        let answer = match self.generator.generate(&prompt) {
            Ok(text) if !text.trim().is_empty() => Answer::new(text, assembled.sources),
            Ok(_) => Self::fallback(GenerationError::Failed(
                "Model returned an empty response".to_string(),
            )),
            Err(error) => Self::fallback(error),
        };

        tracing::info!(
            matches = matches.len(),
            sources = answer.sources().len(),
            fallback = answer.is_fallback(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "question answered"
        );

        Ok(answer)
    }

    /// Embeds `question` and returns the `top_k` nearest chunks, best first.
    pub fn search(&self, question: &str, top_k: usize) -> Result<Vec<Match>, QueryError> {
        let vector = self.embedder.embed(question)?;
        tracing::debug!(
            stage = %Stage::Embedding,
            backend = self.embedder.name(),
            dimension = vector.dimension(),
            "question embedded"
        );

        let matches = self.index.query(&vector, top_k)?;
        tracing::debug!(
            stage = %Stage::Retrieval,
            top_k,
            matches = matches.len(),
            best_score = matches.first().map(|m| m.score),
            "chunks retrieved"
        );

        Ok(matches)
    }

    /// Compares the query embedding dimension with the index's dimension.
    ///
    /// Uses the provider's declared dimension when it has one, otherwise
    /// embeds a short probe text.
    pub fn check_dimensions(&self) -> Result<DimensionReport, QueryError> {
        let embedding = match self.embedder.dimension() {
            Some(dimension) => dimension,
            None => self.embedder.embed("dimension probe")?.dimension(),
        };
        let index = self.index.stats()?.dimension;

        Ok(DimensionReport { embedding, index })
    }

    fn fallback(error: GenerationError) -> Answer {
        let reason = match error {
            GenerationError::Blocked { reason } => {
                tracing::warn!(
                    stage = %Stage::Generation,
                    reason = %reason,
                    "generation blocked by safety filter, returning fallback answer"
                );
                FallbackReason::Blocked(reason)
            }
            GenerationError::Failed(message) => {
                tracing::warn!(
                    stage = %Stage::Generation,
                    error = %message,
                    "generation failed, returning fallback answer"
                );
                FallbackReason::Failed(message)
            }
        };
        Answer::fallback(reason)
    }
}
