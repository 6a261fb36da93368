//! Runtime configuration loaded from the environment.
//!
//! Every knob has a serde-compatible default so a bare `KvasirConfig::default()`
//! is usable in tests; `from_env` overlays the deployment environment
//! (`DATABASE_URL`, `VECTOR_DIM`, `WORKERS`, `INGEST_SIZE_CAP`,
//! `PROVIDER_TIMEOUT`, `WEBHOOK_SIGNING_SECRET`).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{KvasirError, Result};

/// Top-level configuration for the kvasir engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvasirConfig {
    /// Database connection string (sqlite URL)
    pub database_url: String,

    /// Embedding vector dimensionality; global and fixed per deployment
    pub vector_dim: usize,

    /// Worker pool size for the job scheduler (default: 2 x CPU)
    pub workers: usize,

    /// Maximum uncompressed ingest size in bytes
    pub ingest_size_cap: u64,

    /// Per-request timeout for provider calls
    pub provider_timeout: Duration,

    /// Shared secret for CI webhook signature verification (optional)
    pub webhook_signing_secret: Option<String>,

    /// Root directory for scratch space (clones, archive extraction)
    pub scratch_root: PathBuf,

    /// Bind address for the HTTP server
    pub bind_addr: String,

    /// Files larger than this are skipped by the language detector
    pub max_file_bytes: u64,

    /// Wall-clock budget for parsing/analysing a single file
    pub per_file_budget: Duration,

    /// Overall ingest job timeout
    pub ingest_timeout: Duration,

    /// Gate check timeout
    pub gate_timeout: Duration,

    /// Bounded concurrency for embedding provider calls
    pub embedding_concurrency: usize,

    /// Embedding provider endpoint (OpenAI-compatible); empty disables embeddings
    pub embedding_endpoint: String,

    /// Embedding model identifier sent to the provider
    pub embedding_model: String,

    /// API key for the embedding/LLM provider
    pub provider_api_key: Option<String>,

    /// LLM endpoint for smell detection; empty disables the LLM path
    pub llm_endpoint: String,
}

impl Default for KvasirConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            database_url: "sqlite::memory:".to_string(),
            vector_dim: 1536,
            workers: cpus * 2,
            ingest_size_cap: 100 * 1024 * 1024,
            provider_timeout: Duration::from_secs(30),
            webhook_signing_secret: None,
            scratch_root: env::temp_dir().join("kvasir"),
            bind_addr: "127.0.0.1:8400".to_string(),
            max_file_bytes: 1024 * 1024,
            per_file_budget: Duration::from_secs(120),
            ingest_timeout: Duration::from_secs(30 * 60),
            gate_timeout: Duration::from_secs(5 * 60),
            embedding_concurrency: 4,
            embedding_endpoint: String::new(),
            embedding_model: "text-embedding-3-small".to_string(),
            provider_api_key: None,
            llm_endpoint: String::new(),
        }
    }
}

impl KvasirConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(dim) = parse_env("VECTOR_DIM")? {
            config.vector_dim = dim;
        }
        if let Some(workers) = parse_env("WORKERS")? {
            config.workers = workers;
        }
        if let Some(cap) = parse_env("INGEST_SIZE_CAP")? {
            config.ingest_size_cap = cap;
        }
        if let Some(secs) = parse_env::<u64>("PROVIDER_TIMEOUT")? {
            config.provider_timeout = Duration::from_secs(secs);
        }
        if let Ok(secret) = env::var("WEBHOOK_SIGNING_SECRET") {
            if !secret.is_empty() {
                config.webhook_signing_secret = Some(secret);
            }
        }
        if let Ok(key) = env::var("PROVIDER_API_KEY") {
            if !key.is_empty() {
                config.provider_api_key = Some(key);
            }
        }
        if let Ok(endpoint) = env::var("EMBEDDING_ENDPOINT") {
            config.embedding_endpoint = endpoint;
        }
        if let Ok(endpoint) = env::var("LLM_ENDPOINT") {
            config.llm_endpoint = endpoint;
        }
        if let Ok(addr) = env::var("BIND_ADDR") {
            config.bind_addr = addr;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(KvasirError::config_field(
                "database URL must not be empty",
                "database_url",
            ));
        }
        if self.vector_dim == 0 {
            return Err(KvasirError::config_field(
                "vector dimension must be positive",
                "vector_dim",
            ));
        }
        if self.workers == 0 {
            return Err(KvasirError::config_field(
                "worker pool must have at least one worker",
                "workers",
            ));
        }
        if self.ingest_size_cap == 0 {
            return Err(KvasirError::config_field(
                "ingest size cap must be positive",
                "ingest_size_cap",
            ));
        }
        if self.embedding_concurrency == 0 {
            return Err(KvasirError::config_field(
                "embedding concurrency must be positive",
                "embedding_concurrency",
            ));
        }
        Ok(())
    }

    /// Whether an embedding provider is configured.
    pub fn embeddings_enabled(&self) -> bool {
        !self.embedding_endpoint.is_empty()
    }

    /// Whether an LLM provider is configured for smell detection.
    pub fn llm_enabled(&self) -> bool {
        !self.llm_endpoint.is_empty()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) if !raw.is_empty() => raw.parse::<T>().map(Some).map_err(|_| {
            KvasirError::config_field(format!("could not parse {name}={raw}"), name)
        }),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = KvasirConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.vector_dim, 1536);
        assert!(config.workers >= 2);
        assert!(!config.embeddings_enabled());
        assert!(!config.llm_enabled());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = KvasirConfig::default();
        config.vector_dim = 0;
        assert!(config.validate().is_err());

        let mut config = KvasirConfig::default();
        config.workers = 0;
        assert!(config.validate().is_err());

        let mut config = KvasirConfig::default();
        config.database_url = String::new();
        assert!(config.validate().is_err());
    }
}
