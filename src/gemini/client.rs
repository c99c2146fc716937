/// Gemini (Generative Language API) HTTP client.
///
/// Covers the two endpoints the query path needs: `embedContent` for query
/// vectors and `generateContent` for answers.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::{RetryPolicy, Retryable, retry_with_backoff};

/// Public Generative Language API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Harm categories relaxed for curriculum content.
///
/// Biology and chemistry chapters trip the default filters (reproduction,
/// toxic compounds), so every category is set to `BLOCK_NONE`.
pub const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

const BLOCKING_FINISH_REASONS: [&str; 4] = ["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT", "SPII"];

/// Errors that can occur when interacting with the Gemini API.
#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Request timed out")]
    Timeout(#[source] reqwest::Error),

    /// Non-success status; `message` is the API's own error message, if any.
    #[error("HTTP error: status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("Gemini API error: {message}")]
    Api { message: String },

    /// Content withheld by the safety layer.
    #[error("Response blocked: {reason}")]
    Blocked { reason: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Gemini API key is missing")]
    MissingApiKey,
}

impl GeminiError {
    fn from_transport(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            GeminiError::Timeout(error)
        } else {
            GeminiError::Network(error)
        }
    }
}

impl Retryable for GeminiError {
    fn is_transient(&self) -> bool {
        match self {
            GeminiError::Network(_) | GeminiError::Timeout(_) => true,
            GeminiError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

/// Builder for `GeminiClient`.
///
/// # Examples
///
/// ```
/// use studyrag::gemini::GeminiClientBuilder;
///
/// let client = GeminiClientBuilder::new()
///     .api_key("test-key")
///     .build()
///     .expect("Failed to create client");
/// assert_eq!(client.base_url(), "https://generativelanguage.googleapis.com");
/// ```
#[derive(Debug, Default)]
pub struct GeminiClientBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    timeout: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
}

impl GeminiClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Overrides the API endpoint (useful for proxies and tests).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Retry policy for `embedContent`. `generateContent` is never retried.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn build(self) -> Result<GeminiClient, GeminiError> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(GeminiError::MissingApiKey)?;

        let base_url = self.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        reqwest::Url::parse(&base_url)
            .map_err(|e| GeminiError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout.unwrap_or(Duration::from_secs(30)))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(GeminiError::Network)?;

        Ok(GeminiClient {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_policy: self.retry_policy.unwrap_or_default(),
        })
    }
}

/// Blocking client for the Gemini REST API.
pub struct GeminiClient {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    retry_policy: RetryPolicy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: Option<ContentEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

fn safety_settings() -> Vec<SafetySetting> {
    SAFETY_CATEGORIES
        .iter()
        .map(|&category| SafetySetting {
            category,
            threshold: "BLOCK_NONE",
        })
        .collect()
}

/// Qualifies a bare model id with the `models/` prefix the API expects.
fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

impl GeminiClient {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Embeds `text` for retrieval (`taskType = RETRIEVAL_QUERY`).
    ///
    /// Transient failures are retried with the client's retry policy.
    pub fn embed_content(
        &self,
        model: &str,
        text: &str,
        output_dimensionality: Option<usize>,
    ) -> Result<Vec<f32>, GeminiError> {
        let model = model_path(model);
        let url = format!("{}/v1beta/{}:embedContent", self.base_url, model);
        let body = EmbedContentRequest {
            model: model.clone(),
            content: Content {
                parts: vec![Part { text }],
            },
            task_type: "RETRIEVAL_QUERY",
            output_dimensionality,
        };

        retry_with_backoff(&self.retry_policy, || {
            let text = self.post(&url, &body)?;
            parse_embed_response(&text)
        })
    }

    /// Generates a completion for `prompt` with every safety category relaxed.
    ///
    /// Single attempt: a generation may already have been billed when it fails.
    pub fn generate_content(&self, model: &str, prompt: &str) -> Result<String, GeminiError> {
        let url = format!("{}/v1beta/{}:generateContent", self.base_url, model_path(model));
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            safety_settings: safety_settings(),
        };

        let text = self.post(&url, &body)?;
        parse_generate_response(&text)
    }

    fn post<B: Serialize>(&self, url: &str, body: &B) -> Result<String, GeminiError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .map_err(GeminiError::from_transport)?;

        let status = response.status();
        let text = response.text().map_err(GeminiError::from_transport)?;

        if !status.is_success() {
            return Err(GeminiError::Http {
                status: status.as_u16(),
                message: api_error_message(&text),
            });
        }

        Ok(text)
    }
}

/// Pulls `error.message` out of a Google API error body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "no error message".to_string())
}

fn parse_embed_response(body: &str) -> Result<Vec<f32>, GeminiError> {
    let response: EmbedContentResponse =
        serde_json::from_str(body).map_err(GeminiError::Serialization)?;

    response
        .embedding
        .map(|e| e.values)
        .ok_or_else(|| GeminiError::Api {
            message: "Missing 'embedding' field in API response".to_string(),
        })
}

fn parse_generate_response(body: &str) -> Result<String, GeminiError> {
    let response: GenerateContentResponse =
        serde_json::from_str(body).map_err(GeminiError::Serialization)?;

    if let Some(reason) = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(GeminiError::Blocked { reason });
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GeminiError::Api {
            message: "Response contained no candidates".to_string(),
        })?;

    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if !text.trim().is_empty() {
        return Ok(text);
    }

    match candidate.finish_reason {
        Some(reason) if BLOCKING_FINISH_REASONS.iter().any(|r| *r == reason) => {
            Err(GeminiError::Blocked { reason })
        }
        reason => Err(GeminiError::Api {
            message: format!(
                "Empty response (finish reason: {})",
                reason.as_deref().unwrap_or("unknown")
            ),
        }),
    }
}
