//! Opaque provider seams: embedding generation and LLM smell detection.
//!
//! Both providers are constructor-injected collaborators with explicit
//! lifecycle; the engine never reaches for global state. HTTP-backed
//! implementations retry transient failures (429/5xx, timeouts) with
//! exponential backoff and fail fast on client errors.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::config::KvasirConfig;
use crate::core::errors::{KvasirError, Result};
use crate::core::models::Severity;

/// Maximum transient-failure retries for provider calls.
const MAX_RETRIES: u32 = 3;

/// Embedding generation: `embed(texts) -> vectors`, one vector per input.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, preserving order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector dimensionality this provider produces.
    fn dim(&self) -> usize;
}

/// A smell reported by the LLM for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSmell {
    pub smell_type: String,
    pub severity: Severity,
    pub description: String,
    pub suggestion: String,
}

/// LLM-assisted smell detection over a symbol's source.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Analyse one symbol; failures are non-fatal for the caller.
    async fn detect_smells(&self, symbol_name: &str, source: &str) -> Result<Vec<LlmSmell>>;
}

// ============ HTTP embedding provider ============

/// OpenAI-compatible embeddings endpoint client.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dim: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    /// Build from configuration; errors when no endpoint is configured.
    pub fn from_config(config: &KvasirConfig) -> Result<Self> {
        if !config.embeddings_enabled() {
            return Err(KvasirError::config_field(
                "embedding endpoint not configured",
                "embedding_endpoint",
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.provider_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: config.embedding_endpoint.clone(),
            model: config.embedding_model.clone(),
            api_key: config.provider_api_key.clone(),
            dim: config.vector_dim,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let mut last_err: Option<KvasirError> = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }

            let mut request = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: EmbeddingResponse = response.json().await?;
                        let vectors: Vec<Vec<f32>> =
                            parsed.data.into_iter().map(|d| d.embedding).collect();
                        if vectors.len() != texts.len() {
                            return Err(KvasirError::provider_fatal(
                                "embedding",
                                format!(
                                    "expected {} vectors, got {}",
                                    texts.len(),
                                    vectors.len()
                                ),
                            ));
                        }
                        return Ok(vectors);
                    }

                    let text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(KvasirError::provider_transient(
                            "embedding",
                            format!("{status}: {text}"),
                        ));
                        continue;
                    }
                    return Err(KvasirError::provider_fatal(
                        "embedding",
                        format!("{status}: {text}"),
                    ));
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| KvasirError::provider_transient("embedding", "retries exhausted")))
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

// ============ HTTP LLM provider ============

/// JSON LLM endpoint client for smell detection.
pub struct HttpLlmProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct SmellRequest<'a> {
    symbol: &'a str,
    source: &'a str,
}

#[derive(Deserialize)]
struct SmellResponse {
    smells: Vec<LlmSmell>,
}

impl HttpLlmProvider {
    /// Build from configuration; errors when no endpoint is configured.
    pub fn from_config(config: &KvasirConfig) -> Result<Self> {
        if !config.llm_enabled() {
            return Err(KvasirError::config_field(
                "LLM endpoint not configured",
                "llm_endpoint",
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.provider_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: config.llm_endpoint.clone(),
            api_key: config.provider_api_key.clone(),
        })
    }
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn detect_smells(&self, symbol_name: &str, source: &str) -> Result<Vec<LlmSmell>> {
        let body = SmellRequest {
            symbol: symbol_name,
            source,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = if status.as_u16() == 429 || status.is_server_error() {
                KvasirError::provider_transient("llm", format!("{status}: {text}"))
            } else {
                KvasirError::provider_fatal("llm", format!("{status}: {text}"))
            };
            return Err(err);
        }

        let parsed: SmellResponse = response.json().await.map_err(|e| {
            warn!("malformed LLM smell response: {e}");
            KvasirError::provider_fatal("llm", format!("malformed response: {e}"))
        })?;
        Ok(parsed.smells)
    }
}

/// Exponential backoff: 1s, 2s, 4s, ... capped at 32s.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progression() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(10), Duration::from_secs(32));
    }

    #[test]
    fn test_providers_require_endpoints() {
        let config = KvasirConfig::default();
        assert!(HttpEmbeddingProvider::from_config(&config).is_err());
        assert!(HttpLlmProvider::from_config(&config).is_err());
    }

    #[test]
    fn test_llm_smell_deserialisation() {
        let json = r#"{"smells": [{"smell_type": "duplicated_logic",
            "severity": "medium", "description": "Repeated branch",
            "suggestion": "Extract a helper"}]}"#;
        let parsed: SmellResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.smells.len(), 1);
        assert_eq!(parsed.smells[0].severity, Severity::Medium);
    }
}
