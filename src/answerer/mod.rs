//! Question answering over the indexed textbook corpus.
//!
//! This module provides the `QueryEngine` which embeds a question, retrieves
//! the nearest chunks, assembles them into a context block and asks a
//! generative model for a simple, grounded explanation.

mod context;
mod prompt;
mod query_engine;
mod types;

pub use context::{AssembledContext, CHUNK_SEPARATOR, assemble};
pub use prompt::build_prompt;
pub use query_engine::{
    BuildError, DEFAULT_TOP_K, DimensionReport, QueryEngine, QueryEngineBuilder, QueryError,
};
pub use types::{Answer, FALLBACK_ANSWER, FallbackReason, Stage};
