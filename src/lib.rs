//! # Kvasir-RS: Code Intelligence Engine
//!
//! Kvasir ingests source-code repositories (uploaded archives or remote
//! clones), parses them into a structured symbol database, computes
//! quality metrics and call-graph relationships, generates vector
//! embeddings for semantic search, and evaluates configurable quality
//! gates that can gate external CI pipelines.
//!
//! - **Ingestion**: asynchronous jobs that clone/extract, discover
//!   files, parse them into symbols, and persist results
//! - **Analysis**: complexity and maintainability metrics, call-graph
//!   construction with dead-code and cycle detection, duplication,
//!   vulnerability scanning, docstring coverage
//! - **Semantic search**: embedding generation and cosine-similarity
//!   retrieval over a persistent vector index
//! - **Quality gates**: threshold evaluation, run history, webhook
//!   integration with external CI
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use kvasir_rs::core::config::KvasirConfig;
//! use kvasir_rs::storage::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = KvasirConfig::from_env()?;
//!     let store = SqliteStore::connect(&config.database_url).await?;
//!     let repos = store.list_repositories().await?;
//!     println!("{} repositories tracked", repos.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

// Core types and configuration
pub mod core {
    //! Errors, configuration, and the data model.

    pub mod config;
    pub mod errors;
    pub mod models;
}

// Language detection and symbol parsers
pub mod lang;

// Analysis engine
pub mod analysis;

// Provider seams (embeddings, LLM)
pub mod providers;

// Persistence
pub mod storage;

// Semantic search
pub mod search;

// Source fetching and discovery
pub mod ingest;

// Job scheduling and the ingest pipeline
pub mod scheduler;

// Quality gates, CI runs, webhooks, reports
pub mod gate;

// HTTP surface
pub mod server;

// Re-export primary types for convenience
pub use crate::core::config::KvasirConfig;
pub use crate::core::errors::{KvasirError, Result};
pub use crate::gate::QualityGateEngine;
pub use crate::scheduler::{JobScheduler, SchedulerConfig};
pub use crate::storage::SqliteStore;

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
