/// Gemini HTTP client module.
///
/// Hosted embedding (`embedContent`) and generation (`generateContent`) calls.
mod client;

pub use client::{
    DEFAULT_BASE_URL, GeminiClient, GeminiClientBuilder, GeminiError, SAFETY_CATEGORIES,
};
