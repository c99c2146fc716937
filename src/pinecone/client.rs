/// Pinecone data-plane client.
///
/// Only read operations are implemented: similarity `query` and
/// `describe_index_stats`. The index is populated by the offline ingestion job.
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::{RetryPolicy, Retryable, retry_with_backoff};

/// Control plane used to resolve an index name to its data-plane host.
pub const DEFAULT_CONTROL_PLANE_URL: &str = "https://api.pinecone.io";

/// Index the ingestion job writes to.
pub const DEFAULT_INDEX_NAME: &str = "neet-knowledge-base";

const API_VERSION: &str = "2024-07";

#[derive(Debug, Error)]
pub enum PineconeError {
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Request timed out")]
    Timeout(#[source] reqwest::Error),

    #[error("HTTP error: status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("Pinecone API error: {message}")]
    Api { message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Pinecone API key is missing")]
    MissingApiKey,
}

impl PineconeError {
    fn from_transport(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            PineconeError::Timeout(error)
        } else {
            PineconeError::Network(error)
        }
    }
}

impl Retryable for PineconeError {
    fn is_transient(&self) -> bool {
        match self {
            PineconeError::Network(_) | PineconeError::Timeout(_) => true,
            PineconeError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

/// One scored vector returned by `query`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScoredVector {
    pub id: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Index-level statistics.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeIndexStats {
    #[serde(default)]
    pub dimension: usize,
    #[serde(default)]
    pub total_vector_count: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<ScoredVector>,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    host: Option<String>,
}

/// Builder for `PineconeClient`.
///
/// Either give the data-plane host directly with [`index_host`](Self::index_host)
/// or let `build` resolve it from the index name through the control plane.
#[derive(Debug, Default)]
pub struct PineconeClientBuilder {
    api_key: Option<String>,
    index_name: Option<String>,
    index_host: Option<String>,
    control_plane_url: Option<String>,
    namespace: Option<String>,
    timeout: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
}

impl PineconeClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    /// Data-plane host, with or without the `https://` scheme.
    pub fn index_host(mut self, host: impl Into<String>) -> Self {
        self.index_host = Some(host.into());
        self
    }

    pub fn control_plane_url(mut self, url: impl Into<String>) -> Self {
        self.control_plane_url = Some(url.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Builds the client, resolving the index host if none was given.
    ///
    /// Host resolution is a network call; its failure is an initialization
    /// failure for the whole pipeline.
    pub fn build(self) -> Result<PineconeClient, PineconeError> {
        let api_key = self
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(PineconeError::MissingApiKey)?;

        let http = reqwest::blocking::Client::builder()
            .timeout(self.timeout.unwrap_or(Duration::from_secs(30)))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(PineconeError::Network)?;

        let host = match self.index_host {
            Some(host) => host,
            None => {
                let control = self
                    .control_plane_url
                    .unwrap_or_else(|| DEFAULT_CONTROL_PLANE_URL.to_string());
                let name = self
                    .index_name
                    .unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string());
                resolve_index_host(&http, &api_key, &control, &name)?
            }
        };

        let base_url = normalize_host(&host);
        reqwest::Url::parse(&base_url)
            .map_err(|e| PineconeError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        Ok(PineconeClient {
            http,
            api_key,
            base_url,
            namespace: self.namespace.filter(|ns| !ns.is_empty()),
            retry_policy: self.retry_policy.unwrap_or_default(),
        })
    }
}

/// Blocking client bound to one Pinecone index.
pub struct PineconeClient {
    http: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    namespace: Option<String>,
    retry_policy: RetryPolicy,
}

impl PineconeClient {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Returns the `top_k` nearest vectors with their metadata.
    ///
    /// `filter` is a Pinecone metadata filter such as
    /// `{"source": {"$eq": "physics_class11_part1.pdf"}}`.
    pub fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&serde_json::Value>,
    ) -> Result<Vec<ScoredVector>, PineconeError> {
        let body = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            include_values: false,
            namespace: self.namespace.as_deref(),
            filter,
        };

        retry_with_backoff(&self.retry_policy, || {
            let text = self.post("/query", &body)?;
            let response: QueryResponse =
                serde_json::from_str(&text).map_err(PineconeError::Serialization)?;
            Ok(response.matches)
        })
    }

    /// Returns the index dimension and vector count.
    pub fn describe_index_stats(&self) -> Result<DescribeIndexStats, PineconeError> {
        let body = serde_json::json!({});
        retry_with_backoff(&self.retry_policy, || {
            let text = self.post("/describe_index_stats", &body)?;
            serde_json::from_str(&text).map_err(PineconeError::Serialization)
        })
    }

    fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<String, PineconeError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(body)
            .send()
            .map_err(PineconeError::from_transport)?;

        read_body(response)
    }
}

fn resolve_index_host(
    http: &reqwest::blocking::Client,
    api_key: &str,
    control_plane_url: &str,
    index_name: &str,
) -> Result<String, PineconeError> {
    let url = format!(
        "{}/indexes/{}",
        control_plane_url.trim_end_matches('/'),
        index_name
    );
    reqwest::Url::parse(&url).map_err(|e| PineconeError::InvalidUrl(format!("{}: {}", url, e)))?;

    tracing::debug!(index = index_name, "resolving pinecone index host");
    let response = http
        .get(&url)
        .header("Api-Key", api_key)
        .header("X-Pinecone-API-Version", API_VERSION)
        .send()
        .map_err(PineconeError::from_transport)?;

    let text = read_body(response)?;
    let description: IndexDescription =
        serde_json::from_str(&text).map_err(PineconeError::Serialization)?;

    description.host.ok_or_else(|| PineconeError::Api {
        message: format!("Index '{}' has no host", index_name),
    })
}

fn read_body(response: reqwest::blocking::Response) -> Result<String, PineconeError> {
    let status = response.status();
    let text = response.text().map_err(PineconeError::from_transport)?;

    if !status.is_success() {
        return Err(PineconeError::Http {
            status: status.as_u16(),
            message: api_error_message(&text),
        });
    }
    Ok(text)
}

/// Pinecone errors come as `{"error": {"message": ..}}` or `{"message": ..}`.
fn api_error_message(body: &str) -> String {
    let json: Option<serde_json::Value> = serde_json::from_str(body).ok();
    json.as_ref()
        .and_then(|j| {
            j.get("error")
                .and_then(|e| e.get("message"))
                .or_else(|| j.get("message"))
        })
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| "no error message".to_string())
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}
