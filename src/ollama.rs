/// Ollama HTTP client module.
///
/// This module provides a blocking HTTP client for a locally served Ollama
/// instance, including error handling, retry logic, and timeout configuration.
mod client;

pub use client::{DEFAULT_TIMEOUT, OllamaClient, OllamaClientBuilder, OllamaClientTrait, OllamaError};
