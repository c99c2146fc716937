/// Ollama HTTP client implementation.
///
/// This module provides `OllamaClient` for making synchronous HTTP requests to a
/// locally served Ollama instance, used both as a local embedding model and as a
/// local generative model.
use std::time::Duration;

use thiserror::Error;

use crate::retry::{RetryPolicy, Retryable, retry_with_backoff};

/// Default request timeout applied to every Ollama call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when interacting with the Ollama API.
#[derive(Debug, Error)]
pub enum OllamaError {
    /// Network-related errors (connection failures, DNS resolution, etc.)
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// Request or response timeout errors
    #[error("Request timed out")]
    Timeout(#[source] reqwest::Error),

    /// HTTP errors with status code
    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Ollama API-specific errors
    #[error("Ollama API error: {message}")]
    Api { message: String },

    /// Invalid URL configuration error
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl OllamaError {
    fn from_transport(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            OllamaError::Timeout(error)
        } else {
            OllamaError::Network(error)
        }
    }
}

impl Retryable for OllamaError {
    fn is_transient(&self) -> bool {
        match self {
            OllamaError::Network(_) | OllamaError::Timeout(_) => true,
            OllamaError::Http { status } => *status == 429 || (500..600).contains(status),
            OllamaError::Serialization(_) | OllamaError::Api { .. } | OllamaError::InvalidUrl(_) => {
                false
            }
        }
    }
}

/// Builder for constructing `OllamaClient` instances.
///
/// # Examples
///
/// ```
/// use studyrag::ollama::OllamaClientBuilder;
///
/// let client = OllamaClientBuilder::new()
///     .base_url("http://localhost:11434")
///     .build()
///     .expect("Failed to create client");
/// ```
#[derive(Debug, Default)]
pub struct OllamaClientBuilder {
    base_url: Option<String>,
    model: Option<String>,
    timeout: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
}

impl OllamaClientBuilder {
    /// Creates a new `OllamaClientBuilder` with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL for the Ollama API.
    ///
    /// # Arguments
    ///
    /// * `url` - The base URL (e.g., "http://localhost:11434")
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the default generation model name.
    ///
    /// # Arguments
    ///
    /// * `model` - The model name (e.g., "gemma3:4b" or "llama3.2")
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the per-request timeout. Defaults to [`DEFAULT_TIMEOUT`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the retry policy used for embedding requests.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Builds the `OllamaClient` with the configured settings.
    ///
    /// # Environment Variables
    ///
    /// If `base_url()` was not called, this method will check the `OLLAMA_HOST`
    /// environment variable. If not set, it defaults to `http://localhost:11434`.
    ///
    /// If `model()` was not called, this method will check the `OLLAMA_MODEL`
    /// environment variable. If not set, it defaults to an empty string.
    pub fn build(self) -> Result<OllamaClient, OllamaError> {
        let base_url = match self.base_url {
            Some(url) => url,
            None => std::env::var("OLLAMA_HOST")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
        };

        let model = match self.model {
            Some(m) => m,
            None => std::env::var("OLLAMA_MODEL").unwrap_or_default(),
        };

        reqwest::Url::parse(&base_url)
            .map_err(|e| OllamaError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(OllamaError::Network)?;

        Ok(OllamaClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            retry_policy: self.retry_policy.unwrap_or_default(),
        })
    }
}

/// Synchronous HTTP client for interacting with the Ollama API.
///
/// It should be constructed using `OllamaClientBuilder`.
pub struct OllamaClient {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
    retry_policy: RetryPolicy,
}

/// Trait for Ollama API client operations.
///
/// This trait enables mocking in unit tests and provides a clean interface
/// for interacting with the Ollama API.
pub trait OllamaClientTrait: Send + Sync {
    /// Generates text using the `/api/generate` endpoint.
    ///
    /// # Arguments
    ///
    /// * `model` - The name of the model to use
    /// * `prompt` - The prompt text to send to the model
    fn generate(&self, model: &str, prompt: &str) -> Result<String, OllamaError>;

    /// Embeds a single input using the `/api/embed` endpoint.
    ///
    /// # Arguments
    ///
    /// * `model` - The name of the embedding model (e.g., "all-minilm")
    /// * `input` - The text to embed
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, OllamaError>;
}

impl OllamaClient {
    /// Returns the base URL configured for this client.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the model name configured for this client.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Lists available models from the Ollama API, sorted by size (largest first).
    pub fn list_models(&self) -> Result<Vec<String>, OllamaError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(OllamaError::from_transport)?;

        if !response.status().is_success() {
            return Err(OllamaError::Http {
                status: response.status().as_u16(),
            });
        }

        let json: serde_json::Value = response.json().map_err(OllamaError::from_transport)?;

        let mut models: Vec<(String, u64)> = json
            .get("models")
            .and_then(|m| m.as_array())
            .map(|models| {
                models
                    .iter()
                    .filter_map(|model| {
                        let name = model.get("name").and_then(|n| n.as_str())?;
                        let size = model.get("size").and_then(|s| s.as_u64()).unwrap_or(0);
                        Some((name.to_string(), size))
                    })
                    .collect()
            })
            .unwrap_or_default();

        models.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(models.into_iter().map(|(name, _)| name).collect())
    }

    fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, OllamaError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(OllamaError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(OllamaError::Http {
                status: status.as_u16(),
            });
        }

        let text = response.text().map_err(OllamaError::from_transport)?;
        serde_json::from_str(&text).map_err(OllamaError::Serialization)
    }
}

impl OllamaClientTrait for OllamaClient {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, OllamaError> {
        let request_body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": false
        });

        // Generation is not idempotent from a billing point of view: single attempt.
        let json = self.post_json("/api/generate", &request_body)?;
        parse_generate_response(&json)
    }

    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, OllamaError> {
        let request_body = serde_json::json!({
            "model": model,
            "input": input
        });

        retry_with_backoff(&self.retry_policy, || {
            let json = self.post_json("/api/embed", &request_body)?;
            parse_embed_response(&json)
        })
    }
}

/// Extracts the "response" field from an `/api/generate` reply.
fn parse_generate_response(json: &serde_json::Value) -> Result<String, OllamaError> {
    if let Some(message) = json.get("error").and_then(|v| v.as_str()) {
        return Err(OllamaError::Api {
            message: message.to_string(),
        });
    }

    json.get("response")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| OllamaError::Api {
            message: "Missing 'response' field in API response".to_string(),
        })
}

/// Extracts the first vector of `embeddings` from an `/api/embed` reply.
fn parse_embed_response(json: &serde_json::Value) -> Result<Vec<f32>, OllamaError> {
    if let Some(message) = json.get("error").and_then(|v| v.as_str()) {
        return Err(OllamaError::Api {
            message: message.to_string(),
        });
    }

    let first = json
        .get("embeddings")
        .and_then(|v| v.as_array())
        .and_then(|vectors| vectors.first())
        .and_then(|v| v.as_array())
        .ok_or_else(|| OllamaError::Api {
            message: "Missing 'embeddings' field in API response".to_string(),
        })?;

    first
        .iter()
        .map(|value| {
            value.as_f64().map(|f| f as f32).ok_or_else(|| OllamaError::Api {
                message: "Non-numeric value in embedding".to_string(),
            })
        })
        .collect()
}
