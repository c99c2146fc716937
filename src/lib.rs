pub mod answerer;
pub mod config;
pub mod doctor;
pub mod embedding;
pub mod gemini;
pub mod generation;
pub mod index;
pub mod ollama;
pub mod pinecone;
pub mod retry;
pub mod service;

pub use answerer::{Answer, QueryEngine, QueryEngineBuilder, QueryError};
pub use config::{Backend, RagConfig};
pub use service::{ChatRequest, ChatService, ErrorResponse};
