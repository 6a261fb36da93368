//! Embedding generation and cosine-similarity retrieval.
//!
//! Vectors are unit-normalised before storage, so cosine similarity is a
//! plain dot product at query time. Provider calls run under a semaphore
//! sized to the provider's rate limit; queries are bounded by a
//! per-request deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::errors::{KvasirError, Result};
use crate::core::models::Symbol;
use crate::providers::EmbeddingProvider;
use crate::storage::{EmbeddingFilter, SqliteStore};

/// Body lines included in the embedded text per symbol.
const MAX_BODY_LINES: usize = 12;

/// Provider batch size for embedding generation.
const BATCH_SIZE: usize = 32;

/// One ranked search result.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub symbol_id: Uuid,
    pub similarity: f32,
}

/// Persistent vector index over symbol embeddings.
pub struct EmbeddingIndex {
    store: SqliteStore,
    provider: Arc<dyn EmbeddingProvider>,
    dim: usize,
    limiter: Arc<Semaphore>,
    query_deadline: Duration,
}

impl EmbeddingIndex {
    /// Create an index bound to a store and provider.
    pub fn new(
        store: SqliteStore,
        provider: Arc<dyn EmbeddingProvider>,
        concurrency: usize,
        query_deadline: Duration,
    ) -> Self {
        let dim = provider.dim();
        Self {
            store,
            provider,
            dim,
            limiter: Arc::new(Semaphore::new(concurrency.max(1))),
            query_deadline,
        }
    }

    /// The system-wide vector dimensionality.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Text embedded for a symbol: name, signature, docstring, and the
    /// first body lines.
    pub fn embedding_text(symbol: &Symbol, file_content: &str) -> String {
        let mut parts = vec![symbol.name.clone(), symbol.signature.clone()];
        if let Some(doc) = &symbol.docstring {
            parts.push(doc.clone());
        }

        let start = (symbol.line_start.max(1) - 1) as usize;
        let body: Vec<&str> = file_content
            .lines()
            .skip(start)
            .take(
                ((symbol.line_end - symbol.line_start + 1) as usize).min(MAX_BODY_LINES),
            )
            .collect();
        if !body.is_empty() {
            parts.push(body.join("\n"));
        }

        parts.join("\n")
    }

    /// Generate and upsert embeddings for symbols; idempotent per symbol.
    ///
    /// Returns the number of symbols indexed. Individual batch failures
    /// propagate so the scheduler can retry the phase.
    pub async fn index_symbols(&self, entries: &[(Symbol, String)]) -> Result<usize> {
        let mut indexed = 0usize;

        for batch in entries.chunks(BATCH_SIZE) {
            let texts: Vec<String> = batch
                .iter()
                .map(|(symbol, content)| Self::embedding_text(symbol, content))
                .collect();

            let _permit = self
                .limiter
                .acquire()
                .await
                .map_err(|_| KvasirError::internal("embedding limiter closed"))?;
            let vectors = self.provider.embed(&texts).await?;

            for ((symbol, _), vector) in batch.iter().zip(vectors) {
                if vector.len() != self.dim {
                    return Err(KvasirError::provider_fatal(
                        "embedding",
                        format!(
                            "provider returned dim {} for symbol {}, expected {}",
                            vector.len(),
                            symbol.name,
                            self.dim
                        ),
                    ));
                }
                let unit = normalize(&vector);
                self.store.upsert_embedding(symbol.id, &unit).await?;
                indexed += 1;
            }
            debug!("indexed embedding batch of {}", batch.len());
        }

        Ok(indexed)
    }

    /// Rank stored vectors against a query vector.
    ///
    /// Results have `similarity >= threshold`, sorted descending with ties
    /// broken by symbol id, truncated to `k`. The whole call is bounded by
    /// the per-request deadline.
    pub async fn query(
        &self,
        query_vector: &[f32],
        threshold: f32,
        filter: &EmbeddingFilter,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        if query_vector.len() != self.dim {
            return Err(KvasirError::validation(format!(
                "query vector has dim {}, index dim is {}",
                query_vector.len(),
                self.dim
            )));
        }
        let unit_query = normalize(query_vector);

        let fetch = self.store.embeddings(filter);
        let stored = tokio::time::timeout(self.query_deadline, fetch)
            .await
            .map_err(|_| KvasirError::provider_transient("search", "query deadline exceeded"))??;

        let mut hits: Vec<SearchHit> = stored
            .into_iter()
            .filter_map(|record| {
                if record.vector.len() != unit_query.len() {
                    warn!(
                        "stored vector for {} has wrong dimension, skipping",
                        record.symbol_id
                    );
                    return None;
                }
                let similarity = dot(&unit_query, &record.vector);
                (similarity >= threshold).then_some(SearchHit {
                    symbol_id: record.symbol_id,
                    similarity,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol_id.cmp(&b.symbol_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Embed a query string and rank stored vectors against it.
    pub async fn search_text(
        &self,
        query: &str,
        threshold: f32,
        filter: &EmbeddingFilter,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| KvasirError::internal("embedding limiter closed"))?;
        let mut vectors = self.provider.embed(&[query.to_string()]).await?;
        drop(_permit);

        let vector = vectors
            .pop()
            .ok_or_else(|| KvasirError::provider_fatal("embedding", "empty response"))?;
        self.query(&vector, threshold, filter, k).await
    }
}

/// Scale a vector to unit length; zero vectors pass through unchanged.
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return vector.to_vec();
    }
    vector.iter().map(|v| v / norm).collect()
}

/// Dot product; cosine similarity on unit vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{RepoSource, RepositorySpec, SymbolKind};
    use async_trait::async_trait;

    /// Deterministic test provider: maps known texts to fixed vectors.
    struct StubProvider {
        dim: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for StubProvider {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|text| {
                    let mut vector = vec![0.0f32; self.dim];
                    // Cheap locality: bucket by first byte so related names
                    // land near each other.
                    let bucket = text.bytes().next().unwrap_or(0) as usize % self.dim;
                    vector[bucket] = 1.0;
                    vector[(bucket + 1) % self.dim] = 0.5;
                    vector
                })
                .collect())
        }

        fn dim(&self) -> usize {
            self.dim
        }
    }

    fn symbol(name: &str, file_id: Uuid) -> Symbol {
        Symbol {
            id: Uuid::new_v4(),
            file_id,
            name: name.to_string(),
            kind: SymbolKind::Function,
            line_start: 1,
            line_end: 2,
            signature: format!("def {name}()"),
            docstring: Some("does things".to_string()),
            has_docstring: true,
            docstring_length: 11,
            cyclomatic_complexity: 1,
            maintainability_index: 90.0,
            mi_approximated: true,
            loc: 2,
            comment_lines: 0,
        }
    }

    async fn seeded_index() -> (EmbeddingIndex, Vec<Symbol>, Uuid) {
        let store = SqliteStore::in_memory().await.unwrap();
        let repo = store
            .create_repository(&RepositorySpec {
                name: "s".to_string(),
                source: RepoSource::Remote,
                origin_url: Some("https://example.com/s.git".to_string()),
                branch: Some("main".to_string()),
                archive_path: None,
            })
            .await
            .unwrap();

        let file = crate::core::models::FileRecord {
            id: Uuid::new_v4(),
            repo_id: repo.id,
            path: "a.py".to_string(),
            language: "python".to_string(),
            byte_size: 10,
            line_count: 4,
            sha256: "x".to_string(),
            parse_error: None,
        };
        let symbols = vec![symbol("alpha", file.id), symbol("beta", file.id)];
        store
            .replace_repository_files(
                repo.id,
                &[(file, "def alpha(): pass\ndef beta(): pass\n".to_string())],
                &symbols,
            )
            .await
            .unwrap();

        let index = EmbeddingIndex::new(
            store,
            Arc::new(StubProvider { dim: 8 }),
            2,
            Duration::from_secs(5),
        );
        (index, symbols, repo.id)
    }

    #[test]
    fn test_normalize_unit_length() {
        let unit = normalize(&[3.0, 4.0]);
        let norm: f32 = unit.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_embedding_text_includes_parts() {
        let sym = symbol("score", Uuid::new_v4());
        let text = EmbeddingIndex::embedding_text(&sym, "def score(): pass\nreturn 1\n");
        assert!(text.contains("score"));
        assert!(text.contains("def score()"));
        assert!(text.contains("does things"));
    }

    #[tokio::test]
    async fn test_index_and_query_roundtrip() {
        let (index, symbols, repo_id) = seeded_index().await;
        let entries: Vec<(Symbol, String)> = symbols
            .iter()
            .map(|s| (s.clone(), "def alpha(): pass\n".to_string()))
            .collect();

        let indexed = index.index_symbols(&entries).await.unwrap();
        assert_eq!(indexed, 2);

        // Query with the exact text of "alpha"; it must rank first.
        let hits = index
            .search_text(
                &EmbeddingIndex::embedding_text(&symbols[0], "def alpha(): pass\n"),
                0.1,
                &EmbeddingFilter {
                    repo_id: Some(repo_id),
                    language: None,
                },
                10,
            )
            .await
            .unwrap();

        assert!(!hits.is_empty());
        assert_eq!(hits[0].symbol_id, symbols[0].id);
        assert!(hits[0].similarity > 0.99);
        // Descending order throughout.
        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[tokio::test]
    async fn test_threshold_filters_results() {
        let (index, symbols, repo_id) = seeded_index().await;
        let entries: Vec<(Symbol, String)> = symbols
            .iter()
            .map(|s| (s.clone(), String::new()))
            .collect();
        index.index_symbols(&entries).await.unwrap();

        let mut query = vec![0.0f32; 8];
        query[7] = 1.0;
        let hits = index
            .query(
                &query,
                0.95,
                &EmbeddingFilter {
                    repo_id: Some(repo_id),
                    language: None,
                },
                10,
            )
            .await
            .unwrap();
        // Nothing in the stub space matches an orthogonal direction at 0.95.
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_query_dim_mismatch_rejected() {
        let (index, _, _) = seeded_index().await;
        let err = index
            .query(&[1.0, 0.0], 0.5, &EmbeddingFilter::default(), 5)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dim"));
    }
}
