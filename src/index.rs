//! Vector index access.
//!
//! [`VectorIndex`] is the read-only nearest-neighbour contract the query path
//! depends on. [`PineconeIndex`] adapts the Pinecone client to it and turns raw
//! scored vectors into [`Match`]es.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::embedding::EmbeddingVector;
use crate::pinecone::{PineconeClient, PineconeError, ScoredVector};

/// Source label used when a stored chunk carries no `source` metadata.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// One retrieved chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub id: String,
    pub score: f32,
    pub text: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u64>,
}

impl Match {
    pub fn new(
        id: impl Into<String>,
        score: f32,
        text: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            score,
            text: text.into(),
            source: source.into(),
            chunk_index: None,
        }
    }

    pub fn with_chunk_index(mut self, index: u64) -> Self {
        self.chunk_index = Some(index);
        self
    }
}

/// Declared shape of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub dimension: usize,
    pub total_vector_count: u64,
}

#[derive(Debug, Error)]
pub enum IndexQueryError {
    #[error("Pinecone query failed: {0}")]
    Pinecone(#[from] PineconeError),

    #[error("top_k must be at least 1")]
    InvalidTopK,

    /// Failure reported by an index implementation outside this crate.
    #[error("Vector index error: {0}")]
    Backend(String),
}

/// Pre-populated nearest-neighbour index. Never mutated by the query path.
pub trait VectorIndex: Send + Sync {
    /// Returns up to `top_k` matches sorted by non-increasing score.
    ///
    /// An empty result is a valid outcome, not an error.
    fn query(&self, vector: &EmbeddingVector, top_k: usize) -> Result<Vec<Match>, IndexQueryError>;

    /// Like [`query`](Self::query), restricted to chunks whose `source` is
    /// `source`.
    ///
    /// The default filters the unrestricted result, so it can miss chunks that
    /// rank below `top_k`. Backends with metadata filtering should override it.
    fn query_source(
        &self,
        vector: &EmbeddingVector,
        top_k: usize,
        source: &str,
    ) -> Result<Vec<Match>, IndexQueryError> {
        let mut matches = self.query(vector, top_k)?;
        matches.retain(|m| m.source == source);
        Ok(matches)
    }

    fn stats(&self) -> Result<IndexStats, IndexQueryError>;
}

/// Number of matches sampled when listing the sources present in an index.
pub const SOURCE_SAMPLE_SIZE: usize = 20;

/// Fixed query vector for inventory lookups: the first basis vector of the
/// index space.
///
/// Pinecone rejects all-zero vectors under the cosine metric.
pub fn probe_vector(dimension: usize) -> EmbeddingVector {
    let mut values = vec![0.0; dimension];
    if let Some(first) = values.first_mut() {
        *first = 1.0;
    }
    EmbeddingVector::new(values)
}

/// Unique sources among `sample` matches of the probe vector, sorted by name.
///
/// A sample, not a census: sources whose chunks all rank outside the sample
/// are not listed. Use [`contains_source`] to check a known document.
pub fn sample_sources(
    index: &dyn VectorIndex,
    dimension: usize,
    sample: usize,
) -> Result<Vec<String>, IndexQueryError> {
    if dimension == 0 || sample == 0 {
        return Ok(Vec::new());
    }

    let matches = index.query(&probe_vector(dimension), sample)?;
    let mut sources: Vec<String> = matches.into_iter().map(|m| m.source).collect();
    sources.sort();
    sources.dedup();
    Ok(sources)
}

/// Whether at least one chunk from `source` is stored in the index.
pub fn contains_source(
    index: &dyn VectorIndex,
    dimension: usize,
    source: &str,
) -> Result<bool, IndexQueryError> {
    if dimension == 0 {
        return Ok(false);
    }
    let matches = index.query_source(&probe_vector(dimension), 1, source)?;
    Ok(!matches.is_empty())
}

/// Sorts matches by descending score. Stable, so ties keep backend order.
pub fn sort_by_score(matches: &mut [Match]) {
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// [`VectorIndex`] backed by a Pinecone index.
pub struct PineconeIndex {
    client: Arc<PineconeClient>,
}

impl PineconeIndex {
    pub fn new(client: Arc<PineconeClient>) -> Self {
        Self { client }
    }

    fn search(
        &self,
        vector: &EmbeddingVector,
        top_k: usize,
        filter: Option<&serde_json::Value>,
    ) -> Result<Vec<Match>, IndexQueryError> {
        if top_k == 0 {
            return Err(IndexQueryError::InvalidTopK);
        }

        let scored = self.client.query(vector.as_slice(), top_k, filter)?;
        let mut matches: Vec<Match> = scored.into_iter().filter_map(to_match).collect();
        sort_by_score(&mut matches);
        Ok(matches)
    }
}

impl VectorIndex for PineconeIndex {
    fn query(&self, vector: &EmbeddingVector, top_k: usize) -> Result<Vec<Match>, IndexQueryError> {
        self.search(vector, top_k, None)
    }

    fn query_source(
        &self,
        vector: &EmbeddingVector,
        top_k: usize,
        source: &str,
    ) -> Result<Vec<Match>, IndexQueryError> {
        let filter = serde_json::json!({ "source": { "$eq": source } });
        self.search(vector, top_k, Some(&filter))
    }

    fn stats(&self) -> Result<IndexStats, IndexQueryError> {
        let stats = self.client.describe_index_stats()?;
        Ok(IndexStats {
            dimension: stats.dimension,
            total_vector_count: stats.total_vector_count,
        })
    }
}

/// Converts a scored vector into a match.
///
/// Vectors without chunk text cannot contribute context and are dropped.
fn to_match(scored: ScoredVector) -> Option<Match> {
    let metadata = scored.metadata.unwrap_or_default();

    let Some(text) = metadata.get("text").and_then(|v| v.as_str()) else {
        tracing::warn!(id = %scored.id, "skipping match without 'text' metadata");
        return None;
    };

    let source = metadata
        .get("source")
        .and_then(|v| v.as_str())
        .unwrap_or(UNKNOWN_SOURCE);

    let chunk_index = metadata.get("chunk_index").and_then(|v| {
        v.as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
    });

    Some(Match {
        id: scored.id,
        score: scored.score,
        text: text.to_string(),
        source: source.to_string(),
        chunk_index,
    })
}
