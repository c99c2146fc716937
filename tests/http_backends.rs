//! Wire-level tests for the Gemini, Pinecone and Ollama clients against a
//! local fake server, plus the full service built from configuration.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{FakeServer, route, silent};
use serde_json::json;
use studyrag::answerer::FALLBACK_ANSWER;
use studyrag::embedding::{EmbeddingProvider, GeminiEmbedder, OllamaEmbedder};
use studyrag::gemini::GeminiClientBuilder;
use studyrag::generation::{GeminiGenerator, GenerationError, GenerativeModel};
use studyrag::doctor::collect_health;
use studyrag::index::{
    PineconeIndex, SOURCE_SAMPLE_SIZE, VectorIndex, contains_source, sample_sources,
};
use studyrag::ollama::OllamaClientBuilder;
use studyrag::pinecone::PineconeClientBuilder;
use studyrag::retry::RetryPolicy;
use studyrag::service::INTERNAL_ERROR_DETAIL;
use studyrag::{ChatRequest, ChatService, QueryEngineBuilder, RagConfig};

fn embedding(values: &[f32]) -> serde_json::Value {
    json!({ "embedding": { "values": values } })
}

fn completion(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": { "parts": [{ "text": text }], "role": "model" },
            "finishReason": "STOP"
        }]
    })
}

fn quota_exceeded() -> serde_json::Value {
    json!({
        "error": {
            "code": 429,
            "message": "Resource has been exhausted (e.g. check quota).",
            "status": "RESOURCE_EXHAUSTED"
        }
    })
}

fn physics_matches() -> serde_json::Value {
    json!({
        "matches": [
            {
                "id": "physics-12",
                "score": 0.71,
                "metadata": {
                    "text": "The work-energy theorem relates work to kinetic energy.",
                    "source": "physics_class11_part1.pdf",
                    "chunk_index": 12.0
                }
            },
            {
                "id": "physics-11",
                "score": 0.89,
                "metadata": {
                    "text": "Kinetic energy K = 1/2 mv^2 is the energy of motion.",
                    "source": "physics_class11_part1.pdf",
                    "chunk_index": 11
                }
            },
            { "id": "broken", "score": 0.95, "metadata": { "source": "x.pdf" } }
        ],
        "namespace": ""
    })
}

#[test]
fn gemini_embedding_requests_retrieval_query_vectors() {
    let server = FakeServer::start(vec![route(":embedContent", 200, embedding(&[0.1, 0.2, 0.3]))]);
    let client = GeminiClientBuilder::new()
        .api_key("test-key")
        .base_url(server.url.clone())
        .retry_policy(RetryPolicy::none())
        .build()
        .unwrap();
    let embedder = GeminiEmbedder::new(Arc::new(client), "text-embedding-004").with_dimension(3);

    let vector = embedder.embed("What is kinetic energy?").unwrap();

    assert_eq!(vector.into_inner(), vec![0.1f32, 0.2, 0.3]);
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].path,
        "/v1beta/models/text-embedding-004:embedContent"
    );
    assert_eq!(requests[0].header("x-goog-api-key"), Some("test-key"));
    let body = requests[0].json();
    assert_eq!(body["taskType"], "RETRIEVAL_QUERY");
    assert_eq!(body["outputDimensionality"], 3);
    assert_eq!(body["content"]["parts"][0]["text"], "What is kinetic energy?");
}

#[test]
fn gemini_embedding_of_wrong_size_is_rejected() {
    let server = FakeServer::start(vec![route(":embedContent", 200, embedding(&[0.1, 0.2]))]);
    let client = GeminiClientBuilder::new()
        .api_key("k")
        .base_url(server.url.clone())
        .build()
        .unwrap();
    let embedder = GeminiEmbedder::new(Arc::new(client), "text-embedding-004").with_dimension(768);

    assert!(embedder.embed("q").is_err());
}

#[test]
fn gemini_generation_relaxes_every_safety_category() {
    let server = FakeServer::start(vec![route(
        ":generateContent",
        200,
        completion("Energy of motion."),
    )]);
    let client = GeminiClientBuilder::new()
        .api_key("k")
        .base_url(server.url.clone())
        .build()
        .unwrap();
    let generator = GeminiGenerator::new(Arc::new(client), "gemini-1.5-flash");

    assert_eq!(generator.generate("prompt").unwrap(), "Energy of motion.");

    let body = server.requests()[0].json();
    let settings = body["safetySettings"].as_array().unwrap();
    assert_eq!(settings.len(), 4);
    assert!(settings.iter().all(|s| s["threshold"] == "BLOCK_NONE"));
    assert_eq!(body["contents"][0]["parts"][0]["text"], "prompt");
}

#[test]
fn gemini_quota_error_is_not_retried() {
    let server = FakeServer::start(vec![route(":generateContent", 429, quota_exceeded())]);
    let client = GeminiClientBuilder::new()
        .api_key("k")
        .base_url(server.url.clone())
        .build()
        .unwrap();
    let generator = GeminiGenerator::new(Arc::new(client), "gemini-1.5-flash");

    let err = generator.generate("prompt").unwrap_err();

    assert!(matches!(err, GenerationError::Failed(_)));
    assert_eq!(server.requests_to(":generateContent").len(), 1);
}

#[test]
fn gemini_prompt_block_is_reported_as_blocked() {
    let server = FakeServer::start(vec![route(
        ":generateContent",
        200,
        json!({ "promptFeedback": { "blockReason": "SAFETY" } }),
    )]);
    let client = GeminiClientBuilder::new()
        .api_key("k")
        .base_url(server.url.clone())
        .build()
        .unwrap();
    let generator = GeminiGenerator::new(Arc::new(client), "gemini-1.5-flash");

    assert!(matches!(
        generator.generate("prompt"),
        Err(GenerationError::Blocked { .. })
    ));
}

#[test]
fn pinecone_query_returns_sorted_matches_with_metadata() {
    let server = FakeServer::start(vec![route("/query", 200, physics_matches())]);
    let client = PineconeClientBuilder::new()
        .api_key("pc-key")
        .index_host(server.url.clone())
        .namespace("ncert")
        .retry_policy(RetryPolicy::none())
        .build()
        .unwrap();
    let index = PineconeIndex::new(Arc::new(client));

    let vector = studyrag::embedding::EmbeddingVector::new(vec![0.1, 0.2, 0.3]);
    let matches = index.query(&vector, 3).unwrap();

    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].id, "physics-11");
    assert!(matches[0].score >= matches[1].score);
    assert_eq!(matches[0].chunk_index, Some(11));
    assert_eq!(matches[1].chunk_index, Some(12));

    let requests = server.requests();
    let request = &requests[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.header("api-key"), Some("pc-key"));
    assert!(request.header("x-pinecone-api-version").is_some());
    let body = request.json();
    assert_eq!(body["topK"], 3);
    assert_eq!(body["includeMetadata"], true);
    assert_eq!(body["namespace"], "ncert");
}

#[test]
fn pinecone_host_is_resolved_through_control_plane() {
    let data = FakeServer::start(vec![route(
        "/describe_index_stats",
        200,
        json!({ "dimension": 768, "totalVectorCount": 4200, "namespaces": {} }),
    )]);
    let control = FakeServer::start(vec![route(
        "/indexes/neet-knowledge-base",
        200,
        json!({ "name": "neet-knowledge-base", "host": data.url.clone() }),
    )]);

    let client = PineconeClientBuilder::new()
        .api_key("pc-key")
        .control_plane_url(control.url.clone())
        .build()
        .unwrap();
    let stats = PineconeIndex::new(Arc::new(client)).stats().unwrap();

    assert_eq!(stats.dimension, 768);
    assert_eq!(stats.total_vector_count, 4200);
    assert_eq!(control.requests()[0].method, "GET");
}

#[test]
fn ollama_embedding_uses_embed_endpoint() {
    let server = FakeServer::start(vec![route(
        "/api/embed",
        200,
        json!({ "model": "all-minilm", "embeddings": [[0.5, 0.25, 0.125, 0.0625]] }),
    )]);
    let client = OllamaClientBuilder::new()
        .base_url(server.url.clone())
        .model("unused")
        .retry_policy(RetryPolicy::none())
        .build()
        .unwrap();
    let embedder = OllamaEmbedder::new(Arc::new(client), "all-minilm");

    let vector = embedder.embed("osmosis").unwrap();

    assert_eq!(vector.dimension(), 4);
    let body = server.requests()[0].json();
    assert_eq!(body["model"], "all-minilm");
    assert_eq!(body["input"], "osmosis");
}

fn service_config(url: &str) -> RagConfig {
    let url = url.to_string();
    RagConfig::from_lookup(move |key| match key {
        "GEMINI_API_KEY" => Some("g-key".to_string()),
        "PINECONE_API_KEY" => Some("p-key".to_string()),
        "GEMINI_BASE_URL" | "PINECONE_INDEX_HOST" => Some(url.clone()),
        _ => None,
    })
    .unwrap()
}

fn stats(dimension: usize) -> common::Route {
    route(
        "/describe_index_stats",
        200,
        json!({ "dimension": dimension, "totalVectorCount": 2 }),
    )
}

#[test]
fn service_answers_kinetic_energy_question_end_to_end() {
    let server = FakeServer::start(vec![
        route(":embedContent", 200, embedding(&[0.1, 0.2, 0.3])),
        route(":generateContent", 200, completion("Kinetic energy is the energy of motion.")),
        route("/query", 200, physics_matches()),
        stats(3),
    ]);

    let service = ChatService::from_config(&service_config(&server.url));
    assert!(service.is_ready(), "{:?}", service.unavailable_reason());

    let answer = service
        .handle(&ChatRequest::new("What is kinetic energy?"))
        .unwrap();

    assert_eq!(answer.answer(), "Kinetic energy is the energy of motion.");
    assert!(answer.sources().contains(&"physics_class11_part1.pdf".to_string()));

    let generate = server.requests_to(":generateContent");
    let body = generate[0].json();
    let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
    assert!(prompt.contains("Kinetic energy K = 1/2 mv^2"));
    assert!(prompt.contains("Student's Question: What is kinetic energy?"));
    // Highest score first in the context block.
    let first = prompt.find("Kinetic energy K").unwrap();
    let second = prompt.find("The work-energy theorem").unwrap();
    assert!(first < second);
}

#[test]
fn service_returns_exact_fallback_on_quota_error() {
    let server = FakeServer::start(vec![
        route(":embedContent", 200, embedding(&[0.1, 0.2, 0.3])),
        route(":generateContent", 429, quota_exceeded()),
        route("/query", 200, physics_matches()),
        stats(3),
    ]);

    let service = ChatService::from_config(&service_config(&server.url));
    let answer = service
        .handle(&ChatRequest::new("What is kinetic energy?"))
        .unwrap();

    assert_eq!(
        serde_json::to_value(&answer).unwrap(),
        json!({ "answer": FALLBACK_ANSWER, "sources": [] })
    );
}

#[test]
fn service_is_unavailable_when_dimensions_disagree() {
    let server = FakeServer::start(vec![
        route(":embedContent", 200, embedding(&[0.1, 0.2, 0.3])),
        stats(768),
    ]);

    let service = ChatService::from_config(&service_config(&server.url));

    assert!(!service.is_ready());
    assert!(service.unavailable_reason().unwrap().contains("768"));
    let err = service.handle(&ChatRequest::new("q")).unwrap_err();
    assert_eq!(err.status, 503);
    assert_eq!(err.detail, "RAG Engine not initialized");
}

#[test]
fn retrieval_failure_surfaces_as_generic_500() {
    let server = FakeServer::start(vec![
        route(":embedContent", 200, embedding(&[0.1, 0.2, 0.3])),
        route(
            "/query",
            400,
            json!({ "code": 3, "message": "Vector dimension 3 does not match the dimension of the index 768" }),
        ),
    ]);
    let config = RagConfig {
        verify_dimension: false,
        ..service_config(&server.url)
    };

    let service = ChatService::from_config(&config);
    let err = service.handle(&ChatRequest::new("q")).unwrap_err();

    assert_eq!(err.status, 500);
    assert!(!err.detail.contains("dimension"));
    assert!(server.requests_to(":generateContent").is_empty());
}

#[test]
fn pinecone_source_lookup_sends_metadata_filter() {
    let server = FakeServer::start(vec![route("/query", 200, physics_matches())]);
    let client = PineconeClientBuilder::new()
        .api_key("pc-key")
        .index_host(server.url.clone())
        .retry_policy(RetryPolicy::none())
        .build()
        .unwrap();
    let index = PineconeIndex::new(Arc::new(client));

    assert!(contains_source(&index, 3, "physics_class11_part1.pdf").unwrap());
    let sources = sample_sources(&index, 3, SOURCE_SAMPLE_SIZE).unwrap();
    assert_eq!(sources, vec!["physics_class11_part1.pdf"]);

    let requests = server.requests_to("/query");
    assert_eq!(requests.len(), 2);
    let lookup = requests[0].json();
    assert_eq!(
        lookup["filter"],
        json!({ "source": { "$eq": "physics_class11_part1.pdf" } })
    );
    assert_eq!(lookup["topK"], 1);
    assert_eq!(lookup["vector"], json!([1.0, 0.0, 0.0]));
    let listing = requests[1].json();
    assert!(listing.get("filter").is_none());
    assert_eq!(listing["topK"], SOURCE_SAMPLE_SIZE);
}

#[test]
fn health_report_lists_index_sources() {
    let server = FakeServer::start(vec![
        route(":embedContent", 200, embedding(&[0.1, 0.2, 0.3])),
        route("/query", 200, physics_matches()),
        route(
            "/describe_index_stats",
            200,
            json!({ "dimension": 3, "totalVectorCount": 3 }),
        ),
    ]);
    let config = RagConfig {
        expected_sources: vec!["physics_class11_part1.pdf".to_string()],
        ..service_config(&server.url)
    };

    let report = collect_health(&config);

    assert!(report.sources.status.is_ok(), "{:?}", report.sources.status);
    assert_eq!(report.sources.sampled, vec!["physics_class11_part1.pdf"]);
    assert_eq!(
        report.sources.expected,
        vec![("physics_class11_part1.pdf".to_string(), true)]
    );
    let filtered = server
        .requests_to("/query")
        .into_iter()
        .filter(|r| r.json().get("filter").is_some())
        .count();
    assert_eq!(filtered, 1);
}

#[test]
fn generation_timeout_yields_exact_fallback() {
    let server = FakeServer::start(vec![
        route(":embedContent", 200, embedding(&[0.1, 0.2, 0.3])),
        silent(":generateContent"),
        route("/query", 200, physics_matches()),
        stats(3),
    ]);
    let config = RagConfig {
        request_timeout: Duration::from_secs(1),
        ..service_config(&server.url)
    };
    let service = ChatService::from_config(&config);
    assert!(service.is_ready(), "{:?}", service.unavailable_reason());

    let started = Instant::now();
    let answer = service
        .handle(&ChatRequest::new("What is kinetic energy?"))
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(
        serde_json::to_value(&answer).unwrap(),
        json!({ "answer": FALLBACK_ANSWER, "sources": [] })
    );
    assert_eq!(server.requests_to(":generateContent").len(), 1);
}

/// Engine over the fake server with a one-second timeout on every client.
fn timed_service(url: &str, retry: RetryPolicy) -> ChatService {
    let gemini = Arc::new(
        GeminiClientBuilder::new()
            .api_key("g-key")
            .base_url(url.to_string())
            .timeout(Duration::from_secs(1))
            .retry_policy(retry.clone())
            .build()
            .unwrap(),
    );
    let pinecone = PineconeClientBuilder::new()
        .api_key("p-key")
        .index_host(url.to_string())
        .timeout(Duration::from_secs(1))
        .retry_policy(retry)
        .build()
        .unwrap();

    let engine = QueryEngineBuilder::new()
        .embedder(Arc::new(GeminiEmbedder::new(gemini.clone(), "text-embedding-004")))
        .index(Arc::new(PineconeIndex::new(Arc::new(pinecone))))
        .generator(Arc::new(GeminiGenerator::new(gemini, "gemini-1.5-flash")))
        .build()
        .unwrap();
    ChatService::new(engine)
}

#[test]
fn embedding_timeout_surfaces_as_generic_500() {
    let server = FakeServer::start(vec![
        silent(":embedContent"),
        route("/query", 200, physics_matches()),
        route(":generateContent", 200, completion("unused")),
    ]);
    let service = timed_service(&server.url, RetryPolicy::none());

    let started = Instant::now();
    let err = service.handle(&ChatRequest::new("q")).unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(err.status, 500);
    assert_eq!(err.detail, INTERNAL_ERROR_DETAIL);
    assert!(server.requests_to("/query").is_empty());
    assert!(server.requests_to(":generateContent").is_empty());
}

#[test]
fn index_timeout_is_retried_then_surfaces_as_500() {
    let server = FakeServer::start(vec![
        route(":embedContent", 200, embedding(&[0.1, 0.2, 0.3])),
        silent("/query"),
        route(":generateContent", 200, completion("unused")),
    ]);
    let retry = RetryPolicy::new(vec![Duration::from_millis(10)]);
    let service = timed_service(&server.url, retry);

    let err = service.handle(&ChatRequest::new("q")).unwrap_err();

    assert_eq!(err.status, 500);
    assert_eq!(server.requests_to("/query").len(), 2);
    assert!(server.requests_to(":generateContent").is_empty());
}
