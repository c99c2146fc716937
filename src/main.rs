use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use studyrag::config::{self, ConfigError, RagConfig};
use studyrag::doctor;
use studyrag::service::{ChatRequest, ChatService, ErrorResponse};
use tracing_subscriber::EnvFilter;

/// Characters of chunk text shown per search result.
const PREVIEW_CHARS: usize = 150;

/// studyrag - answer NEET study questions from indexed NCERT textbooks
#[derive(Parser)]
#[command(name = "studyrag")]
#[command(about = "Retrieval-augmented answers from indexed NCERT textbooks")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    /// Load environment variables from this file instead of ./.env
    #[arg(long, global = true, value_name = "PATH")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Answer a question from the indexed textbooks
    Ask(AskCommand),
    /// Show the chunks retrieved for a query
    Search(SearchCommand),
    /// Check configuration, index and backend health
    Check,
}

/// Answer a question
#[derive(Parser)]
struct AskCommand {
    /// The question to answer
    #[arg(value_name = "QUESTION")]
    question: String,

    /// Print the response as JSON
    #[arg(long)]
    json: bool,
}

/// Search the index
#[derive(Parser)]
struct SearchCommand {
    /// The text to search for
    #[arg(value_name = "QUERY")]
    query: String,

    /// Number of matches to show
    #[arg(short = 'k', long = "top-k", value_name = "N", default_value_t = 5,
          value_parser = clap::value_parser!(u16).range(1..))]
    top_k: u16,
}

fn main() {
    let cli = Cli::parse();

    let env_error = load_env_file(cli.env_file.as_deref());
    init_tracing(cli.log_json);
    if let Some(error) = env_error {
        tracing::warn!(error = %error, "failed to load env file");
    }

    let result = match &cli.command {
        Commands::Ask(cmd) => handle_ask(cmd),
        Commands::Search(cmd) => handle_search(cmd),
        Commands::Check => handle_check(),
    };

    if let Err(e) = result {
        let exit_code = exit_code(&e);
        match e.downcast_ref::<ErrorResponse>() {
            Some(response) => eprintln!("Error: {}", response.detail),
            None => eprintln!("Error: {e:#}"),
        }
        std::process::exit(exit_code);
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("studyrag=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Loads `.env` (or `--env-file`) into the process environment before the
/// subscriber reads `RUST_LOG`.
///
/// A missing default `.env` is normal. A failed explicit file is returned so
/// it can be logged once tracing is up.
fn load_env_file(path: Option<&std::path::Path>) -> Option<ConfigError> {
    match path {
        Some(path) => config::load_env_file(path).err(),
        None => {
            dotenvy::dotenv().ok();
            None
        }
    }
}

/// Maps an error to the process exit code.
///
/// 1 for bad requests, 3 when the service is unavailable, 2 for everything else.
fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<ErrorResponse>().map(|r| r.status) {
        Some(400) => 1,
        Some(503) => 3,
        _ => 2,
    }
}

/// Handles the ask command.
fn handle_ask(cmd: &AskCommand) -> Result<()> {
    let service = ChatService::from_env();
    let answer = service.handle(&ChatRequest::new(cmd.question.as_str()))?;

    if cmd.json {
        let json = serde_json::to_string_pretty(&answer).context("Failed to serialize answer")?;
        println!("{json}");
        return Ok(());
    }

    println!("{}", answer.answer());
    if !answer.sources().is_empty() {
        println!();
        println!("Sources:");
        for source in answer.sources() {
            println!("  - {source}");
        }
    }
    Ok(())
}

/// Handles the search command.
fn handle_search(cmd: &SearchCommand) -> Result<()> {
    if cmd.query.trim().is_empty() {
        return Err(ErrorResponse::bad_request().into());
    }

    let service = ChatService::from_env();
    let engine = service.engine().ok_or_else(ErrorResponse::service_unavailable)?;

    let matches = engine
        .search(cmd.query.trim(), usize::from(cmd.top_k))
        .context("Search failed")?;

    if matches.is_empty() {
        println!("No matches found.");
        return Ok(());
    }

    for (rank, m) in matches.iter().enumerate() {
        println!("{}. [{:.4}] {}", rank + 1, m.score, m.source);
        println!("   {}", preview(&m.text, PREVIEW_CHARS));
    }
    Ok(())
}

/// Handles the check command.
fn handle_check() -> Result<()> {
    let config = RagConfig::from_env().context("Invalid configuration")?;
    let report = doctor::run_health_checks(&config)?;
    if !report.is_healthy() {
        anyhow::bail!("One or more checks failed");
    }
    Ok(())
}

/// First `max` characters of `text` on one line, with an ellipsis if cut.
fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}
