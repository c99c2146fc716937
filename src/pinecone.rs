/// Pinecone HTTP client module.
mod client;

pub use client::{
    DEFAULT_CONTROL_PLANE_URL, DEFAULT_INDEX_NAME, DescribeIndexStats, PineconeClient,
    PineconeClientBuilder, PineconeError, ScoredVector,
};
