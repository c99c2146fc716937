//! Health check for the studyrag pipeline.
//!
//! Provides the `check` command functionality:
//! - Configuration summary (backends, models, index)
//! - Index statistics from Pinecone
//! - Query embedding dimension vs index dimension
//! - Source documents present in the index
//! - Generation backend readiness

use anyhow::Result;

use crate::answerer::{DimensionReport, QueryEngine};
use crate::config::{Backend, RagConfig};
use crate::index::{IndexStats, SOURCE_SAMPLE_SIZE, contains_source, sample_sources};
use crate::ollama::OllamaClientBuilder;
use crate::service::build_engine;

// ANSI color codes for terminal output
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

/// Health status for a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Component is healthy
    Ok,
    /// Component has a warning but is functional
    Warning(String),
    /// Component is not functional
    Error(String),
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, HealthStatus::Ok)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, HealthStatus::Error(_))
    }
}

/// Index connectivity and size.
#[derive(Debug)]
pub struct IndexHealth {
    pub status: HealthStatus,
    pub name: String,
    pub stats: Option<IndexStats>,
}

/// Embedding vs index dimension.
#[derive(Debug)]
pub struct DimensionHealth {
    pub status: HealthStatus,
    pub report: Option<DimensionReport>,
}

/// Documents found in the index.
#[derive(Debug)]
pub struct SourcesHealth {
    pub status: HealthStatus,
    /// Unique sources among a sample of stored chunks.
    pub sampled: Vec<String>,
    /// Each expected source and whether any chunk of it was found.
    pub expected: Vec<(String, bool)>,
}

/// Generation backend readiness.
#[derive(Debug)]
pub struct GenerationHealth {
    pub status: HealthStatus,
    pub backend: Backend,
    pub model: String,
}

/// Everything `check` found.
#[derive(Debug)]
pub struct HealthReport {
    pub init: HealthStatus,
    pub index: IndexHealth,
    pub dimension: DimensionHealth,
    pub sources: SourcesHealth,
    pub generation: GenerationHealth,
}

impl HealthReport {
    /// True when no component is in the error state.
    pub fn is_healthy(&self) -> bool {
        !(self.init.is_error()
            || self.index.status.is_error()
            || self.dimension.status.is_error()
            || self.sources.status.is_error()
            || self.generation.status.is_error())
    }
}

// ============================================================================
// Health Check Functions
// ============================================================================

/// Performs all health checks, prints the report and returns it.
pub fn run_health_checks(config: &RagConfig) -> Result<HealthReport> {
    let report = collect_health(config);
    print_health_report(config, &report);
    Ok(report)
}

/// Runs every check without printing.
///
/// The engine is built with the startup dimension check disabled so that a
/// mismatch shows up in the report instead of hiding the other sections.
pub fn collect_health(config: &RagConfig) -> HealthReport {
    let unchecked = RagConfig {
        verify_dimension: false,
        ..config.clone()
    };
    let generation = check_generation_health(config);

    match build_engine(&unchecked) {
        Ok(engine) => {
            let index = check_index_health(&config.pinecone_index, &engine);
            let sources = match &index.stats {
                Some(stats) => check_sources_health(&engine, stats, &config.expected_sources),
                None => SourcesHealth {
                    status: HealthStatus::Warning("Skipped: index stats unavailable".to_string()),
                    sampled: Vec::new(),
                    expected: Vec::new(),
                },
            };
            HealthReport {
                init: HealthStatus::Ok,
                index,
                dimension: check_dimension_health(&engine),
                sources,
                generation,
            }
        }
        Err(e) => {
            let skipped = || HealthStatus::Warning("Skipped: engine not initialized".to_string());
            HealthReport {
                init: HealthStatus::Error(e.to_string()),
                index: IndexHealth {
                    status: skipped(),
                    name: config.pinecone_index.clone(),
                    stats: None,
                },
                dimension: DimensionHealth {
                    status: skipped(),
                    report: None,
                },
                sources: SourcesHealth {
                    status: skipped(),
                    sampled: Vec::new(),
                    expected: Vec::new(),
                },
                generation,
            }
        }
    }
}

pub fn check_index_health(name: &str, engine: &QueryEngine) -> IndexHealth {
    match engine.index().stats() {
        Ok(stats) => IndexHealth {
            status: if stats.total_vector_count == 0 {
                HealthStatus::Warning("Index is empty".to_string())
            } else {
                HealthStatus::Ok
            },
            name: name.to_string(),
            stats: Some(stats),
        },
        Err(e) => IndexHealth {
            status: HealthStatus::Error(format!("Stats request failed: {}", e)),
            name: name.to_string(),
            stats: None,
        },
    }
}

pub fn check_dimension_health(engine: &QueryEngine) -> DimensionHealth {
    match engine.check_dimensions() {
        Ok(report) if report.is_compatible() => DimensionHealth {
            status: HealthStatus::Ok,
            report: Some(report),
        },
        Ok(report) => DimensionHealth {
            status: HealthStatus::Error(format!(
                "Query embeddings have {} dimensions but the index expects {}",
                report.embedding, report.index
            )),
            report: Some(report),
        },
        Err(e) => DimensionHealth {
            status: HealthStatus::Error(format!("Probe failed: {}", e)),
            report: None,
        },
    }
}

/// Lists sources from a sample of stored chunks, then looks up each expected
/// source with a metadata-filtered query.
pub fn check_sources_health(
    engine: &QueryEngine,
    stats: &IndexStats,
    expected: &[String],
) -> SourcesHealth {
    let index = engine.index();
    let sampled = match sample_sources(index, stats.dimension, SOURCE_SAMPLE_SIZE) {
        Ok(sampled) => sampled,
        Err(e) => {
            return SourcesHealth {
                status: HealthStatus::Error(format!("Source query failed: {}", e)),
                sampled: Vec::new(),
                expected: Vec::new(),
            };
        }
    };

    let mut found = Vec::with_capacity(expected.len());
    for source in expected {
        match contains_source(index, stats.dimension, source) {
            Ok(present) => found.push((source.clone(), present)),
            Err(e) => {
                return SourcesHealth {
                    status: HealthStatus::Error(format!("Lookup of '{}' failed: {}", source, e)),
                    sampled,
                    expected: found,
                };
            }
        }
    }

    let missing = found.iter().filter(|(_, present)| !present).count();
    let status = if missing > 0 {
        HealthStatus::Warning(format!("{} expected source(s) not found", missing))
    } else if sampled.is_empty() && stats.total_vector_count > 0 {
        HealthStatus::Warning("No chunk carries source metadata".to_string())
    } else {
        HealthStatus::Ok
    };

    SourcesHealth {
        status,
        sampled,
        expected: found,
    }
}

/// Gemini is only checked for a configured key, so `check` spends no quota.
/// Ollama is asked for its installed models.
pub fn check_generation_health(config: &RagConfig) -> GenerationHealth {
    let backend = config.generation_backend;
    let model = config.generation_model().to_string();

    let status = match backend {
        Backend::Gemini => match &config.gemini_api_key {
            Some(_) => HealthStatus::Ok,
            None => HealthStatus::Error("GEMINI_API_KEY is not set".to_string()),
        },
        Backend::Ollama => {
            let client = OllamaClientBuilder::new()
                .base_url(config.ollama_host.clone())
                .model(model.clone())
                .timeout(config.request_timeout)
                .build();
            match client {
                Err(e) => HealthStatus::Error(format!("Failed to build client: {}", e)),
                Ok(client) => match client.list_models() {
                    Ok(models) if models.iter().any(|m| m == &model) => HealthStatus::Ok,
                    Ok(_) => HealthStatus::Warning(format!("Model '{}' is not installed", model)),
                    Err(e) => HealthStatus::Error(format!("Connection failed: {}", e)),
                },
            }
        }
    };

    GenerationHealth {
        status,
        backend,
        model,
    }
}

// ============================================================================
// Pretty Printing
// ============================================================================

fn status_symbol(status: &HealthStatus) -> &'static str {
    match status {
        HealthStatus::Ok => "\u{2713}",
        HealthStatus::Warning(_) => "!",
        HealthStatus::Error(_) => "\u{2717}",
    }
}

fn status_color(status: &HealthStatus) -> &'static str {
    match status {
        HealthStatus::Ok => GREEN,
        HealthStatus::Warning(_) => YELLOW,
        HealthStatus::Error(_) => RED,
    }
}

fn status_line(label: &str, status: &HealthStatus, ok_text: &str) {
    let text = match status {
        HealthStatus::Ok => ok_text,
        HealthStatus::Warning(w) => w.as_str(),
        HealthStatus::Error(e) => e.as_str(),
    };
    println!(
        "  {}{}{} {}: {}",
        status_color(status),
        status_symbol(status),
        RESET,
        label,
        text
    );
}

fn print_health_report(config: &RagConfig, report: &HealthReport) {
    println!("{}studyrag check{}", BOLD, RESET);
    println!();

    // Configuration section
    println!("{}Configuration{}", BOLD, RESET);
    status_line("Engine", &report.init, "Initialized");
    println!(
        "    {}Embedding: {} ({}){}",
        DIM,
        config.embedding_backend,
        config.embedding_model(),
        RESET
    );
    println!("    {}Top K: {}{}", DIM, config.top_k, RESET);
    if let Some(max) = config.max_context_chars {
        println!("    {}Context budget: {} chars{}", DIM, max, RESET);
    }
    println!();

    // Index section
    println!("{}Index{}", BOLD, RESET);
    status_line("Pinecone", &report.index.status, "Connected");
    println!("    {}Name: {}{}", DIM, report.index.name, RESET);
    if let Some(ns) = &config.pinecone_namespace {
        println!("    {}Namespace: {}{}", DIM, ns, RESET);
    }
    if let Some(stats) = &report.index.stats {
        println!("    {}Vectors: {}{}", DIM, stats.total_vector_count, RESET);
        println!("    {}Dimension: {}{}", DIM, stats.dimension, RESET);
    }
    println!();

    // Dimension section
    println!("{}Embeddings{}", BOLD, RESET);
    status_line("Dimension", &report.dimension.status, "Compatible");
    if let Some(dims) = &report.dimension.report {
        println!(
            "    {}Query: {}  Index: {}{}",
            DIM, dims.embedding, dims.index, RESET
        );
    }
    println!();

    // Sources section
    println!("{}Sources{}", BOLD, RESET);
    let sampled = format!("{} found in sample", report.sources.sampled.len());
    status_line("Documents", &report.sources.status, &sampled);
    for source in &report.sources.sampled {
        println!("    {}\u{2022} {}{}", DIM, source, RESET);
    }
    for (source, present) in &report.sources.expected {
        let (color, symbol, text) = if *present {
            (GREEN, "\u{2713}", "found")
        } else {
            (RED, "\u{2717}", "not found")
        };
        println!("    {}{}{} {}: {}", color, symbol, RESET, source, text);
    }
    println!();

    // Generation section
    println!("{}Generation{}", BOLD, RESET);
    status_line("Backend", &report.generation.status, "Ready");
    println!(
        "    {}{}: {}{}",
        DIM, report.generation.backend, report.generation.model, RESET
    );
    if report.generation.backend == Backend::Ollama {
        println!("    {}URL: {}{}", DIM, config.ollama_host, RESET);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answerer::QueryEngineBuilder;
    use crate::embedding::{EmbeddingError, EmbeddingProvider, EmbeddingVector};
    use crate::generation::{GenerationError, GenerativeModel};
    use crate::index::{IndexQueryError, Match, VectorIndex};
    use std::sync::Arc;

    struct Embedder(usize);

    impl EmbeddingProvider for Embedder {
        fn embed(&self, _text: &str) -> Result<EmbeddingVector, EmbeddingError> {
            Ok(EmbeddingVector::new(vec![0.0; self.0]))
        }

        fn name(&self) -> &str {
            "test"
        }
    }

    struct Index {
        dimension: usize,
        count: u64,
    }

    impl VectorIndex for Index {
        fn query(
            &self,
            _vector: &EmbeddingVector,
            _top_k: usize,
        ) -> Result<Vec<Match>, IndexQueryError> {
            Ok(Vec::new())
        }

        fn stats(&self) -> Result<IndexStats, IndexQueryError> {
            Ok(IndexStats {
                dimension: self.dimension,
                total_vector_count: self.count,
            })
        }
    }

    struct Generator;

    impl GenerativeModel for Generator {
        fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            Ok("ok".to_string())
        }

        fn model(&self) -> &str {
            "test"
        }
    }

    fn engine(embedding: usize, dimension: usize, count: u64) -> QueryEngine {
        QueryEngineBuilder::new()
            .embedder(Arc::new(Embedder(embedding)))
            .index(Arc::new(Index { dimension, count }))
            .generator(Arc::new(Generator))
            .build()
            .unwrap()
    }

    #[test]
    fn test_health_status_is_ok() {
        assert!(HealthStatus::Ok.is_ok());
        assert!(!HealthStatus::Warning("test".to_string()).is_ok());
        assert!(HealthStatus::Error("test".to_string()).is_error());
    }

    #[test]
    fn test_matching_dimensions_are_healthy() {
        let health = check_dimension_health(&engine(768, 768, 10));
        assert!(health.status.is_ok());
        assert_eq!(
            health.report,
            Some(DimensionReport {
                embedding: 768,
                index: 768
            })
        );
    }

    #[test]
    fn test_mismatched_dimensions_are_an_error() {
        let health = check_dimension_health(&engine(384, 768, 10));
        assert!(health.status.is_error());
    }

    #[test]
    fn test_empty_index_is_a_warning() {
        let health = check_index_health("neet-knowledge-base", &engine(4, 4, 0));
        assert!(matches!(health.status, HealthStatus::Warning(_)));
        assert_eq!(health.stats.map(|s| s.total_vector_count), Some(0));
    }

    #[test]
    fn test_missing_expected_source_is_a_warning() {
        let engine = engine(4, 4, 10);
        let stats = engine.index().stats().unwrap();
        let expected = vec!["physics_class11_part1.pdf".to_string()];

        let health = check_sources_health(&engine, &stats, &expected);

        assert!(matches!(health.status, HealthStatus::Warning(_)));
        assert_eq!(
            health.expected,
            vec![("physics_class11_part1.pdf".to_string(), false)]
        );
        assert!(health.sampled.is_empty());
    }

    #[test]
    fn test_empty_index_has_no_source_warning() {
        let engine = engine(4, 4, 0);
        let stats = engine.index().stats().unwrap();

        let health = check_sources_health(&engine, &stats, &[]);
        assert!(health.status.is_ok());
    }

    #[test]
    fn test_gemini_generation_needs_key() {
        let config = RagConfig::from_lookup(|key| match key {
            "GEMINI_API_KEY" => Some("g".to_string()),
            "PINECONE_API_KEY" => Some("p".to_string()),
            _ => None,
        })
        .unwrap();
        assert!(check_generation_health(&config).status.is_ok());

        let config = RagConfig {
            gemini_api_key: None,
            ..config
        };
        assert!(check_generation_health(&config).status.is_error());
    }

    #[test]
    fn test_failed_init_skips_remaining_checks() {
        let config = RagConfig::from_lookup(|key| match key {
            "GEMINI_API_KEY" => Some("g".to_string()),
            "PINECONE_API_KEY" => Some("p".to_string()),
            "PINECONE_INDEX_HOST" => Some("https://bad host".to_string()),
            _ => None,
        })
        .unwrap();

        let report = collect_health(&config);
        assert!(report.init.is_error());
        assert!(matches!(report.index.status, HealthStatus::Warning(_)));
        assert!(matches!(report.sources.status, HealthStatus::Warning(_)));
        assert!(!report.is_healthy());
    }
}
