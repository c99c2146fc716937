//! Types for answered questions.

use serde::{Deserialize, Serialize};

/// Apology returned when the generative model fails or is blocked.
pub const FALLBACK_ANSWER: &str = "I'm sorry, I couldn't generate an answer due to safety filters or an API error. Please try rephrasing your question.";

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Embedding,
    Retrieval,
    Assembly,
    Prompting,
    Generation,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Embedding => write!(f, "embedding"),
            Self::Retrieval => write!(f, "retrieval"),
            Self::Assembly => write!(f, "assembly"),
            Self::Prompting => write!(f, "prompting"),
            Self::Generation => write!(f, "generation"),
        }
    }
}

/// Why an answer is the fallback apology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The safety layer withheld the completion.
    Blocked(String),
    /// Transport, quota or malformed-response failure.
    Failed(String),
}

/// Answer returned to the caller: `{"answer": ..., "sources": [...]}`.
///
/// `sources` holds unique document names; their order carries no meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    answer: String,
    sources: Vec<String>,
    #[serde(skip)]
    fallback: Option<FallbackReason>,
}

impl Answer {
    /// Creates a generated answer with its sources.
    pub fn new(answer: String, sources: Vec<String>) -> Self {
        Self {
            answer,
            sources,
            fallback: None,
        }
    }

    /// The fixed apology with no sources.
    pub fn fallback(reason: FallbackReason) -> Self {
        Self {
            answer: FALLBACK_ANSWER.to_string(),
            sources: Vec::new(),
            fallback: Some(reason),
        }
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Set when the answer is the apology rather than a generated explanation.
    pub fn fallback_reason(&self) -> Option<&FallbackReason> {
        self.fallback.as_ref()
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}
