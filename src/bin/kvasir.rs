//! Kvasir CLI: serve the API, submit repositories, and run the
//! pre-commit gate check.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use kvasir_rs::core::config::KvasirConfig;
use kvasir_rs::providers::{HttpEmbeddingProvider, HttpLlmProvider};
use kvasir_rs::scheduler::pipeline::IngestPipeline;
use kvasir_rs::scheduler::{JobScheduler, SchedulerConfig};
use kvasir_rs::search::EmbeddingIndex;
use kvasir_rs::server::{self, AppState};
use kvasir_rs::storage::SqliteStore;
use kvasir_rs::QualityGateEngine;

#[derive(Parser)]
#[command(name = "kvasir", version, about = "Code intelligence engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server and job workers
    Serve,

    /// Submit a repository for ingestion
    Submit {
        /// Remote repository URL (clones the requested branch)
        #[arg(long, conflicts_with = "archive")]
        url: Option<String>,

        /// Branch to clone
        #[arg(long, requires = "url")]
        branch: Option<String>,

        /// Path to an uploaded zip archive
        #[arg(long)]
        archive: Option<String>,

        /// Display name for the repository
        #[arg(long)]
        name: Option<String>,

        /// Kvasir server base URL
        #[arg(long, env = "KVASIR_SERVER", default_value = "http://127.0.0.1:8400")]
        server: String,
    },

    /// Pre-commit helper: evaluate the quality gate for a repository.
    ///
    /// Exit codes: 0 pass, 1 gate failed, 2 configuration missing,
    /// 3 network error.
    Check {
        /// Repository id to check
        #[arg(long, env = "KVASIR_REPO")]
        repo: Option<String>,

        /// Kvasir server base URL
        #[arg(long, env = "KVASIR_SERVER")]
        server: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve => match serve().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        },
        Command::Submit {
            url,
            branch,
            archive,
            name,
            server,
        } => match submit(url, branch, archive, name, &server).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        },
        Command::Check { repo, server } => check(repo, server).await,
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = KvasirConfig::from_env().context("loading configuration")?;
    let store = SqliteStore::connect(&config.database_url)
        .await
        .context("connecting to the database")?;

    let embedding = if config.embeddings_enabled() {
        Some(Arc::new(HttpEmbeddingProvider::from_config(&config)?)
            as Arc<dyn kvasir_rs::providers::EmbeddingProvider>)
    } else {
        info!("embedding provider not configured; semantic search disabled");
        None
    };
    let llm = if config.llm_enabled() {
        Some(Arc::new(HttpLlmProvider::from_config(&config)?)
            as Arc<dyn kvasir_rs::providers::LlmProvider>)
    } else {
        None
    };

    let pipeline = Arc::new(IngestPipeline::new(
        store.clone(),
        config.clone(),
        embedding.clone(),
        llm,
    ));
    let scheduler = Arc::new(JobScheduler::start(
        pipeline,
        SchedulerConfig {
            workers: config.workers,
            ingest_timeout: config.ingest_timeout,
            ..Default::default()
        },
    ));

    let index = embedding.map(|provider| {
        Arc::new(EmbeddingIndex::new(
            store.clone(),
            provider,
            config.embedding_concurrency,
            config.provider_timeout,
        ))
    });

    let state = AppState {
        store: store.clone(),
        scheduler,
        gate: Arc::new(QualityGateEngine::new(store)),
        index,
        config: Arc::new(config),
    };
    server::serve(state).await
}

async fn submit(
    url: Option<String>,
    branch: Option<String>,
    archive: Option<String>,
    name: Option<String>,
    server: &str,
) -> anyhow::Result<()> {
    let source = if url.is_some() { "remote" } else { "upload" };
    if url.is_none() && archive.is_none() {
        anyhow::bail!("provide either --url or --archive");
    }

    let body = serde_json::json!({
        "name": name,
        "source": source,
        "origin_url": url,
        "branch": branch,
        "archive_path": archive,
    });

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{server}/repos/submit"))
        .json(&body)
        .send()
        .await
        .context("reaching the kvasir server")?;

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if !status.is_success() {
        anyhow::bail!("submission rejected ({status}): {text}");
    }
    println!("{text}");
    Ok(())
}

async fn check(repo: Option<String>, server: Option<String>) -> ExitCode {
    let (Some(repo), Some(server)) = (repo, server) else {
        eprintln!("configuration missing: set --repo/--server or KVASIR_REPO/KVASIR_SERVER");
        return ExitCode::from(2);
    };

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{server}/quality-gate/{repo}/check"))
        .send()
        .await;

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            eprintln!("network error: {e}");
            return ExitCode::from(3);
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        eprintln!("gate check failed ({status}): {text}");
        return ExitCode::from(3);
    }

    let body: serde_json::Value = match response.json().await {
        Ok(body) => body,
        Err(e) => {
            eprintln!("malformed response: {e}");
            return ExitCode::from(3);
        }
    };

    let passed = body
        .get("passed")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let summary = body
        .get("summary")
        .and_then(|v| v.as_str())
        .unwrap_or("no summary");
    println!("{summary}");

    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
