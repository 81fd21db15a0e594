//! xlnc-rag command line
//!
//! Run with: cargo run -p xlnc-rag --features cli -- <command>

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;
use walkdir::WalkDir;

use xlnc_rag::security::{ClamAvScanner, MalwareScanner};
use xlnc_rag::types::ContentKind;
use xlnc_rag::{AppState, Metadata, RagConfig, UploadRequest};

#[derive(Parser)]
#[command(name = "xlnc-rag")]
#[command(about = "Knowledge-base ingestion and retrieval-augmented answering", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files or directories and wait for processing
    Ingest {
        /// Files or directories (walked recursively)
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Owner of the documents
        #[arg(short, long, default_value = "default")]
        tenant: String,

        /// Candidate category, repeatable
        #[arg(long = "category")]
        categories: Vec<String>,
    },

    /// Ask a question against a tenant's knowledge base
    Ask {
        query: String,

        #[arg(short, long, default_value = "default")]
        tenant: String,

        #[arg(long, default_value = "cli")]
        session: String,
    },

    /// List a tenant's documents, newest first
    List {
        #[arg(short, long, default_value = "default")]
        tenant: String,

        #[arg(long, default_value_t = 50)]
        take: usize,
    },

    /// Scan one file with ClamAV
    Scan { file: PathBuf },

    /// Check that the scanner, Ollama and the vector store are reachable
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xlnc_rag=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = RagConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Ingest {
            paths,
            tenant,
            categories,
        } => ingest(config, &paths, &tenant, categories).await,
        Commands::Ask {
            query,
            tenant,
            session,
        } => ask(config, &query, &tenant, &session).await,
        Commands::List { tenant, take } => list(config, &tenant, take).await,
        Commands::Scan { file } => scan(config, &file).await,
        Commands::Ping => ping(config).await,
    }
}

/// Supported files under the given paths
fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    paths
        .iter()
        .flat_map(|root| WalkDir::new(root).follow_links(true))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Skipping unreadable path: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| ContentKind::from_extension(ext).is_supported())
        })
        .collect()
}

async fn ingest(config: RagConfig, paths: &[PathBuf], tenant: &str, categories: Vec<String>) -> Result<()> {
    let files = collect_files(paths);
    if files.is_empty() {
        bail!("No PDF, DOC or DOCX files found");
    }

    let state = AppState::new(config).await?;
    let mut jobs: Vec<(String, Uuid)> = Vec::new();

    for path in &files {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let content_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or_default()
            .to_string();

        let request = UploadRequest {
            filename: filename.clone(),
            content_type,
            data,
            tenant: tenant.to_string(),
            categories: categories.clone(),
            title: None,
        };
        match state.documents().accept_upload(request).await {
            Ok(receipt) => jobs.push((filename, receipt.job_id)),
            Err(e) => eprintln!("✗ {}: {}", filename, e),
        }
    }

    let progress = ProgressBar::new(jobs.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {pos}/{len} documents {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    progress.enable_steady_tick(Duration::from_millis(120));

    let mut remaining = jobs;
    let mut failures = 0usize;
    while !remaining.is_empty() {
        tokio::time::sleep(Duration::from_millis(500)).await;

        let mut still_running = Vec::new();
        for (filename, job_id) in remaining {
            match state.documents().job_status(job_id)? {
                Some(job) if job.status.is_terminal() => {
                    progress.inc(1);
                    match job.error {
                        Some(error) => {
                            failures += 1;
                            progress.println(format!("✗ {}: {}", filename, error));
                        }
                        None => progress.println(format!("✓ {}", filename)),
                    }
                }
                Some(_) => still_running.push((filename, job_id)),
                None => progress.inc(1),
            }
        }
        remaining = still_running;
    }
    progress.finish_with_message("done");

    state.shutdown().await?;
    if failures > 0 {
        bail!("{} of {} documents failed", failures, files.len());
    }
    Ok(())
}

async fn ask(config: RagConfig, query: &str, tenant: &str, session: &str) -> Result<()> {
    let state = AppState::new(config).await?;
    let response = state
        .engine()
        .answer(query, tenant, session, &Metadata::new())
        .await;

    println!("{}\n", response.text);
    println!(
        "source: {}  confidence: {:.2}",
        response.source.as_str(),
        response.confidence
    );
    for action in response.actions.unwrap_or_default() {
        println!("  {} {}", action.icon.unwrap_or_default(), action.text);
    }

    state.shutdown().await?;
    if !response.ok {
        bail!(response.error.unwrap_or_else(|| "query failed".to_string()));
    }
    Ok(())
}

async fn list(config: RagConfig, tenant: &str, take: usize) -> Result<()> {
    let state = AppState::new(config).await?;
    for doc in state.documents().list_documents(tenant, 0, take)? {
        println!(
            "{}  {:<15} {:>4} chunks  {}",
            doc.id,
            doc.status.as_str(),
            doc.chunk_count,
            doc.filename
        );
    }
    state.shutdown().await?;
    Ok(())
}

async fn scan(config: RagConfig, file: &Path) -> Result<()> {
    let scanner = ClamAvScanner::new(config.scanner);
    let result = scanner.scan_file(file).await?;
    println!("{}: {}", file.display(), result.label());
    if !result.is_clean {
        bail!("{} is not clean ({})", file.display(), result.raw_response);
    }
    Ok(())
}

async fn ping(config: RagConfig) -> Result<()> {
    let state = AppState::new(config).await?;
    let health = state.health().await;
    let mark = |ok: bool| if ok { "ok" } else { "unreachable" };

    println!("scanner:      {}", mark(health.scanner));
    println!("embeddings:   {}", mark(health.embeddings));
    println!("llm:          {}", mark(health.llm));
    println!("vector store: {}", mark(health.vector_store));

    state.shutdown().await?;
    if !health.all_healthy() {
        bail!("Some providers are unreachable");
    }
    Ok(())
}
