//! Dataloom CLI
//!
//! Loads data sources into an in-memory store, from a descriptor manifest
//! or by ingesting CSV, log and JSON files, and answers questions about
//! them, either one from the command line or a stream of them from stdin.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use dataloom::agent::{ProgressFn, TaskExecutor};
use dataloom::llm::backend_from_config;
use dataloom::sources::{add_source, ingest_file, DataSource, InMemoryStore};
use dataloom::{Analyst, AnalystConfig, AppResult, Session};

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "dataloom")]
#[command(version)]
#[command(about = "Ask questions about CSV, log and JSON data", long_about = None)]
struct Cli {
    /// JSON file holding an array of data source descriptors
    #[arg(long, value_name = "MANIFEST")]
    sources: Option<PathBuf>,

    /// CSV, log or JSON file to ingest as a source (repeatable)
    #[arg(long = "file", value_name = "PATH")]
    files: Vec<PathBuf>,

    /// Override the model name
    #[arg(long)]
    model: Option<String>,

    /// Override the worker pool width
    #[arg(long)]
    max_workers: Option<usize>,

    /// Print Prometheus metrics before exiting
    #[arg(long)]
    metrics: bool,

    /// Question to answer; reads questions from stdin when omitted
    question: Option<String>,
}

async fn load_sources(cli: &Cli, config: &AnalystConfig, store: &InMemoryStore) -> CliResult<usize> {
    let mut loaded = 0;

    if let Some(manifest) = &cli.sources {
        let raw = tokio::fs::read_to_string(manifest).await?;
        let sources: Vec<DataSource> = serde_json::from_str(&raw)?;
        for source in &sources {
            add_source(store, source).await?;
            loaded += 1;
        }
    }

    if !cli.files.is_empty() {
        let executor = TaskExecutor::new(backend_from_config(config), config.llm_timeout());
        for (idx, path) in cli.files.iter().enumerate() {
            let source = ingest_file(&executor, &format!("upload-{}", idx), path).await?;
            add_source(store, &source).await?;
            loaded += 1;
        }
    }

    Ok(loaded)
}

fn print_result(result: &AppResult) {
    if !result.message.is_empty() {
        println!("{}", result.message);
    }
    if let Some(value) = result.value_text() {
        println!("\n[RESULT]\n{}", value);
    }
    if let Some(code) = &result.code {
        println!("\n[CODE]");
        println!("┌─────────────────────────────────────────");
        for line in code.lines() {
            println!("│ {}", line);
        }
        println!("└─────────────────────────────────────────");
    }
    if result.retries_used > 0 {
        println!("[RETRIES] {}", result.retries_used);
    }
    println!("[TRACE] {}", result.trace_id);
}

async fn ask(session: &mut Session, analyst: &Analyst, prompt: &str) {
    match session.ask(analyst, prompt).await {
        Ok(result) => print_result(result),
        Err(e) => eprintln!("[ERROR] {}", e),
    }
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    let (mut config, warnings) = AnalystConfig::from_env();
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(width) = cli.max_workers {
        config.max_workers = width.max(1);
    }

    dataloom::tracing::init_tracing("dataloom", config.otlp_endpoint.as_deref(), config.log_json)?;
    for warning in &warnings {
        warn!(key = %warning.key, value = %warning.value, reason = warning.reason, "Ignoring setting");
    }

    let store = Arc::new(InMemoryStore::new());
    let loaded = load_sources(&cli, &config, &store).await?;
    info!(sources = loaded, model = %config.model, "Sources loaded");

    let progress: ProgressFn = Arc::new(|fraction| debug!(progress = fraction, "Relevance checks"));
    let analyst = Analyst::from_config(config, store).with_progress(progress);
    let mut session = Session::new();

    match &cli.question {
        Some(question) => ask(&mut session, &analyst, question).await,
        None => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let prompt = line.trim();
                if prompt.is_empty() {
                    continue;
                }
                ask(&mut session, &analyst, prompt).await;
                println!();
            }
        }
    }

    let summary = session.summary();
    info!(
        session_id = %summary.id,
        turns = summary.turns,
        answered = summary.answered,
        last_prompt = %summary.last_prompt,
        "Session finished"
    );

    if cli.metrics {
        print!("{}", dataloom::metrics::gather_text());
    }

    dataloom::tracing::shutdown_tracing();
    Ok(())
}
