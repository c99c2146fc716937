//! Runtime configuration read from the environment.
//!
//! `RagConfig` is constructed once at startup and passed by reference to
//! [`ChatService::from_config`](crate::service::ChatService::from_config).
//! Empty variables are treated as unset.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::answerer::DEFAULT_TOP_K;
use crate::embedding::{GeminiEmbedder, OllamaEmbedder};
use crate::gemini::DEFAULT_BASE_URL as DEFAULT_GEMINI_BASE_URL;
use crate::generation::GeminiGenerator;
use crate::pinecone::DEFAULT_INDEX_NAME;

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to load {path}: {message}")]
    EnvFile { path: String, message: String },
}

/// Provider behind the embedding or generation capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Gemini,
    Ollama,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(Backend::Gemini),
            "ollama" => Ok(Backend::Ollama),
            other => Err(format!("unknown backend '{other}', expected gemini or ollama")),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Gemini => write!(f, "gemini"),
            Backend::Ollama => write!(f, "ollama"),
        }
    }
}

/// Loads `path` into the process environment without overriding variables
/// that are already set.
pub fn load_env_file(path: &Path) -> Result<(), ConfigError> {
    dotenvy::from_path(path).map_err(|e| ConfigError::EnvFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

#[derive(Clone, PartialEq)]
pub struct RagConfig {
    pub embedding_backend: Backend,
    pub generation_backend: Backend,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gemini_embed_model: String,
    pub gemini_model: String,
    pub ollama_host: String,
    pub ollama_model: Option<String>,
    pub ollama_embed_model: String,
    /// Expected query-vector dimension. Also requested from Gemini as
    /// `outputDimensionality`.
    pub embedding_dimension: Option<usize>,
    pub pinecone_api_key: String,
    pub pinecone_index: String,
    pub pinecone_index_host: Option<String>,
    pub pinecone_namespace: Option<String>,
    pub top_k: usize,
    pub max_context_chars: Option<usize>,
    pub request_timeout: Duration,
    pub verify_dimension: bool,
    /// Documents `check` looks for individually, from the comma-separated
    /// `RAG_EXPECTED_SOURCES`.
    pub expected_sources: Vec<String>,
}

// Keys stay out of logs.
impl fmt::Debug for RagConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RagConfig")
            .field("embedding_backend", &self.embedding_backend)
            .field("generation_backend", &self.generation_backend)
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<redacted>"))
            .field("gemini_base_url", &self.gemini_base_url)
            .field("gemini_embed_model", &self.gemini_embed_model)
            .field("gemini_model", &self.gemini_model)
            .field("ollama_host", &self.ollama_host)
            .field("ollama_model", &self.ollama_model)
            .field("ollama_embed_model", &self.ollama_embed_model)
            .field("embedding_dimension", &self.embedding_dimension)
            .field("pinecone_api_key", &"<redacted>")
            .field("pinecone_index", &self.pinecone_index)
            .field("pinecone_index_host", &self.pinecone_index_host)
            .field("pinecone_namespace", &self.pinecone_namespace)
            .field("top_k", &self.top_k)
            .field("max_context_chars", &self.max_context_chars)
            .field("request_timeout", &self.request_timeout)
            .field("verify_dimension", &self.verify_dimension)
            .field("expected_sources", &self.expected_sources)
            .finish()
    }
}

impl RagConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads `path` into the process environment, then reads the configuration.
    ///
    /// Variables already set in the environment take precedence over the file.
    pub fn from_env_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_env_file(path.as_ref())?;
        Self::from_env()
    }

    /// Reads the configuration through `lookup`, which returns a variable's
    /// value if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let embedding_backend = parse_or(&get, "EMBEDDING_BACKEND", Backend::Gemini)?;
        let generation_backend = parse_or(&get, "GENERATION_BACKEND", Backend::Gemini)?;

        let gemini_api_key = get("GEMINI_API_KEY");
        let uses_gemini =
            embedding_backend == Backend::Gemini || generation_backend == Backend::Gemini;
        if uses_gemini && gemini_api_key.is_none() {
            return Err(ConfigError::Missing("GEMINI_API_KEY"));
        }

        let ollama_model = get("OLLAMA_MODEL");
        if generation_backend == Backend::Ollama && ollama_model.is_none() {
            return Err(ConfigError::Missing("OLLAMA_MODEL"));
        }

        let pinecone_api_key =
            get("PINECONE_API_KEY").ok_or(ConfigError::Missing("PINECONE_API_KEY"))?;

        let top_k = parse_or(&get, "RAG_TOP_K", DEFAULT_TOP_K)?;
        if top_k == 0 {
            return Err(ConfigError::Invalid {
                var: "RAG_TOP_K",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let embedding_dimension = parse_opt::<usize>(&get, "EMBEDDING_DIMENSION")?;
        if embedding_dimension == Some(0) {
            return Err(ConfigError::Invalid {
                var: "EMBEDDING_DIMENSION",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let timeout_secs = parse_or(&get, "RAG_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "RAG_REQUEST_TIMEOUT_SECS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            embedding_backend,
            generation_backend,
            gemini_api_key,
            gemini_base_url: get("GEMINI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            gemini_embed_model: get("GEMINI_EMBED_MODEL")
                .unwrap_or_else(|| GeminiEmbedder::DEFAULT_MODEL.to_string()),
            gemini_model: get("GEMINI_MODEL")
                .unwrap_or_else(|| GeminiGenerator::DEFAULT_MODEL.to_string()),
            ollama_host: get("OLLAMA_HOST").unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string()),
            ollama_model,
            ollama_embed_model: get("OLLAMA_EMBED_MODEL")
                .unwrap_or_else(|| OllamaEmbedder::DEFAULT_MODEL.to_string()),
            embedding_dimension,
            pinecone_api_key,
            pinecone_index: get("PINECONE_INDEX")
                .unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string()),
            pinecone_index_host: get("PINECONE_INDEX_HOST"),
            pinecone_namespace: get("PINECONE_NAMESPACE"),
            top_k,
            max_context_chars: parse_opt(&get, "RAG_MAX_CONTEXT_CHARS")?,
            request_timeout: Duration::from_secs(timeout_secs),
            verify_dimension: parse_bool_or(&get, "RAG_VERIFY_DIMENSION", true)?,
            expected_sources: get("RAG_EXPECTED_SOURCES")
                .map(|list| parse_list(&list))
                .unwrap_or_default(),
        })
    }

    /// Model name used for embeddings on the selected backend.
    pub fn embedding_model(&self) -> &str {
        match self.embedding_backend {
            Backend::Gemini => &self.gemini_embed_model,
            Backend::Ollama => &self.ollama_embed_model,
        }
    }

    /// Model name used for generation on the selected backend.
    pub fn generation_model(&self) -> &str {
        match self.generation_backend {
            Backend::Gemini => &self.gemini_model,
            Backend::Ollama => self.ollama_model.as_deref().unwrap_or_default(),
        }
    }
}

fn parse_opt<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    get(var)
        .map(|value| {
            value.parse::<T>().map_err(|e| ConfigError::Invalid {
                var,
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    Ok(parse_opt(get, var)?.unwrap_or(default))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool_or(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                var,
                value,
                reason: "expected true or false".to_string(),
            }),
        },
    }
}
