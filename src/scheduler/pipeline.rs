//! The ingest pipeline: fetch, discover, parse, analyse, persist.
//!
//! Phases per repository: fetch -> discover/parse/metrics -> persist ->
//! fan-out (call graph, embeddings, duplication, vulnerabilities and
//! smells) -> completed. The fan-out branches run concurrently inside
//! the job and join as the barrier that marks the repository completed,
//! so the scheduler's keyed lock still holds. Cancellation is observed
//! at every suspension point; CPU-bound parsing is bounded by the
//! per-file wall-clock budget instead.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::callgraph::{CallGraphBuilder, FileParse};
use crate::analysis::duplication::{DuplicationDetector, DuplicationInput};
use crate::analysis::metrics;
use crate::analysis::smells::SmellDetector;
use crate::analysis::vulnerabilities::VulnerabilityScanner;
use crate::core::config::KvasirConfig;
use crate::core::errors::{KvasirError, Result, ResultExt};
use crate::core::models::{CodeSmell, FileRecord, RepoStatus, Symbol, SymbolKind};
use crate::ingest::discovery::{self, DiscoveredFile};
use crate::ingest::fetcher::SourceFetcher;
use crate::lang::{self, Language, ParseOutcome};
use crate::providers::{EmbeddingProvider, LlmProvider};
use crate::scheduler::JobRunner;
use crate::search::EmbeddingIndex;
use crate::storage::SqliteStore;

/// Concrete pipeline wired to the store and providers.
pub struct IngestPipeline {
    store: SqliteStore,
    config: KvasirConfig,
    embedding: Option<Arc<dyn EmbeddingProvider>>,
    llm: Option<Arc<dyn LlmProvider>>,
}

/// One file fully parsed and measured, ready for persistence.
struct ParsedFile {
    record: FileRecord,
    content: String,
    symbols: Vec<Symbol>,
    outcome: ParseOutcome,
    language: Language,
}

impl IngestPipeline {
    /// Create a pipeline.
    pub fn new(
        store: SqliteStore,
        config: KvasirConfig,
        embedding: Option<Arc<dyn EmbeddingProvider>>,
        llm: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        Self {
            store,
            config,
            embedding,
            llm,
        }
    }

    async fn ingest(&self, repo_id: Uuid, cancel: &CancellationToken) -> Result<()> {
        let repo = self
            .store
            .get_repository(repo_id)
            .await?
            .ok_or_else(|| KvasirError::validation(format!("unknown repository {repo_id}")))?;

        // Phase: fetch.
        self.store
            .update_repository_status(repo_id, RepoStatus::Cloning, None, None)
            .await?;
        ensure_live(cancel)?;

        let fetcher = SourceFetcher::new(
            self.config.scratch_root.clone(),
            self.config.ingest_size_cap,
        );
        let repo_for_fetch = repo.clone();
        let tree = tokio::task::spawn_blocking(move || fetcher.fetch(&repo_for_fetch))
            .await
            .map_err(|e| KvasirError::internal(format!("fetch task panicked: {e}")))?
            .stage("fetch")?;
        ensure_live(cancel)?;

        if let Some(commit) = &tree.commit {
            self.store
                .set_repository_metadata(repo_id, None, Some(commit))
                .await?;
        }

        // Phase: discover + parse + metrics.
        self.store
            .update_repository_status(repo_id, RepoStatus::Parsing, None, None)
            .await?;

        let root = tree.root().to_path_buf();
        let max_file_bytes = self.config.max_file_bytes;
        let discovered =
            tokio::task::spawn_blocking(move || discovery::discover(&root, max_file_bytes))
                .await
                .map_err(|e| KvasirError::internal(format!("discovery panicked: {e}")))?
                .stage("discover")?;
        ensure_live(cancel)?;
        info!(repo_id = %repo_id, files = discovered.len(), "discovery complete");

        let primary = discovery::primary_language(&discovered);
        let parsed = self.parse_files(repo_id, discovered, cancel).await?;
        drop(tree);

        if let Some(language) = primary {
            self.store
                .set_repository_metadata(repo_id, Some(language.as_str()), None)
                .await?;
        }

        // Persist the parse phase atomically.
        let files: Vec<(FileRecord, String)> = parsed
            .iter()
            .map(|p| (p.record.clone(), p.content.clone()))
            .collect();
        let symbols: Vec<Symbol> = parsed.iter().flat_map(|p| p.symbols.clone()).collect();
        self.store
            .replace_repository_files(repo_id, &files, &symbols)
            .await
            .stage("persist")?;
        ensure_live(cancel)?;

        // Phase: fan-out analyses; the join below is the completion barrier.
        self.store
            .update_repository_status(repo_id, RepoStatus::Analyzing, None, None)
            .await?;

        let (graph_result, embed_result, dup_result, findings_result) = tokio::join!(
            self.callgraph_phase(repo_id, &parsed, cancel),
            self.embedding_phase(&parsed, cancel),
            self.duplication_phase(repo_id, &parsed, cancel),
            self.findings_phase(repo_id, &parsed, cancel),
        );
        graph_result?;
        embed_result?;
        dup_result?;
        findings_result?;
        ensure_live(cancel)?;

        let file_count = parsed.len() as i64;
        let symbol_count = symbols.len() as i64;
        self.store
            .update_repository_status(
                repo_id,
                RepoStatus::Completed,
                Some((file_count, symbol_count)),
                None,
            )
            .await?;
        info!(repo_id = %repo_id, file_count, symbol_count, "ingest completed");
        Ok(())
    }

    /// Parse and measure files concurrently, each bounded by the per-file
    /// wall-clock budget. Parser failures localise: the file is recorded
    /// with a `parse_error` and skipped.
    async fn parse_files(
        &self,
        repo_id: Uuid,
        discovered: Vec<DiscoveredFile>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ParsedFile>> {
        let budget = self.config.per_file_budget;
        let concurrency = self.config.workers.max(1);

        let results = stream::iter(discovered.into_iter())
            .map(|file| async move {
                let language = file.language;
                let content = file.content.clone();
                let path = file.path.clone();

                let parse = tokio::task::spawn_blocking(move || parse_one(&content, &path, language));
                match tokio::time::timeout(budget, parse).await {
                    Ok(Ok(result)) => (file, result),
                    Ok(Err(join_err)) => (
                        file,
                        Err(KvasirError::internal(format!("parser panicked: {join_err}"))),
                    ),
                    Err(_elapsed) => (
                        file,
                        Err(KvasirError::resource("per-file budget exceeded", "cpu")),
                    ),
                }
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<_>>()
            .await;
        ensure_live(cancel)?;

        let mut parsed = Vec::with_capacity(results.len());
        for (file, outcome) in results {
            let file_id = Uuid::new_v4();
            match outcome {
                Ok(outcome) => {
                    let symbols = measure_symbols(file_id, &file, &outcome);
                    parsed.push(ParsedFile {
                        record: file_record(file_id, repo_id, &file, None),
                        content: file.content,
                        symbols,
                        outcome,
                        language: file.language,
                    });
                }
                Err(e) => {
                    warn!(path = %file.path, "parse failed, skipping file: {e}");
                    parsed.push(ParsedFile {
                        record: file_record(file_id, repo_id, &file, Some(e.to_string())),
                        content: file.content,
                        symbols: Vec::new(),
                        outcome: ParseOutcome::default(),
                        language: file.language,
                    });
                }
            }
        }

        parsed.sort_by(|a, b| a.record.path.cmp(&b.record.path));
        Ok(parsed)
    }

    async fn callgraph_phase(
        &self,
        repo_id: Uuid,
        parsed: &[ParsedFile],
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_live(cancel)?;
        let inputs: Vec<FileParse> = parsed
            .iter()
            .map(|p| FileParse {
                file_id: p.record.id,
                path: p.record.path.clone(),
                language: p.language,
                symbols: p.symbols.clone(),
                calls: p.outcome.calls.clone(),
                imports: p.outcome.imports.clone(),
                entry_hints: p.outcome.entry_hints.clone(),
            })
            .collect();

        let analysis =
            tokio::task::spawn_blocking(move || CallGraphBuilder::new().build(&inputs))
                .await
                .map_err(|e| KvasirError::internal(format!("call graph panicked: {e}")))?;
        ensure_live(cancel)?;

        debug!(
            repo_id = %repo_id,
            edges = analysis.edges.len(),
            dead = analysis.dead_code.len(),
            cycles = analysis.cycles.len(),
            "call graph built"
        );
        self.store.insert_call_edges(&analysis.edges).await.stage("callgraph")?;
        self.store
            .insert_import_edges(&analysis.import_edges)
            .await
            .stage("callgraph")?;
        self.store
            .replace_dead_code(repo_id, &analysis.dead_code)
            .await
            .stage("callgraph")?;
        self.store
            .replace_cycles(repo_id, &analysis.cycles)
            .await
            .stage("callgraph")?;
        Ok(())
    }

    async fn embedding_phase(
        &self,
        parsed: &[ParsedFile],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(provider) = &self.embedding else {
            debug!("embedding provider not configured, skipping phase");
            return Ok(());
        };
        ensure_live(cancel)?;

        let index = EmbeddingIndex::new(
            self.store.clone(),
            provider.clone(),
            self.config.embedding_concurrency,
            self.config.provider_timeout,
        );
        let entries: Vec<(Symbol, String)> = parsed
            .iter()
            .flat_map(|p| {
                p.symbols
                    .iter()
                    .map(|s| (s.clone(), p.content.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        let indexed = index.index_symbols(&entries).await?;
        debug!(indexed, "embedding phase complete");
        Ok(())
    }

    async fn duplication_phase(
        &self,
        repo_id: Uuid,
        parsed: &[ParsedFile],
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_live(cancel)?;
        let inputs: Vec<DuplicationInput> = parsed
            .iter()
            .map(|p| DuplicationInput {
                file_id: p.record.id,
                path: p.record.path.clone(),
                language: p.language,
                content: p.content.clone(),
            })
            .collect();

        let pairs =
            tokio::task::spawn_blocking(move || DuplicationDetector::new().scan(repo_id, &inputs))
                .await
                .map_err(|e| KvasirError::internal(format!("duplication panicked: {e}")))?;
        ensure_live(cancel)?;

        debug!(pairs = pairs.len(), "duplication phase complete");
        self.store.insert_duplications(&pairs).await.stage("duplication")
    }

    async fn findings_phase(
        &self,
        repo_id: Uuid,
        parsed: &[ParsedFile],
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_live(cancel)?;

        let scanner = VulnerabilityScanner::new();
        let smell_detector = SmellDetector::new();
        let mut vulns = Vec::new();
        let mut smells = Vec::new();

        for file in parsed {
            vulns.extend(scanner.scan_file(repo_id, file.record.id, &file.content, file.language));
            smells.extend(smell_detector.scan_file(
                repo_id,
                file.record.id,
                &file.content,
                &file.symbols,
            ));
        }

        // LLM-assisted smells are additive; provider failures degrade to
        // rule-only results.
        if let Some(llm) = &self.llm {
            smells.extend(self.llm_smells(repo_id, parsed, llm, cancel).await);
        }

        self.store.insert_vulnerabilities(&vulns).await.stage("findings")?;
        self.store.insert_smells(&smells).await.stage("findings")?;
        debug!(
            vulns = vulns.len(),
            smells = smells.len(),
            "findings phase complete"
        );
        Ok(())
    }

    async fn llm_smells(
        &self,
        repo_id: Uuid,
        parsed: &[ParsedFile],
        llm: &Arc<dyn LlmProvider>,
        cancel: &CancellationToken,
    ) -> Vec<CodeSmell> {
        let mut findings = Vec::new();

        for file in parsed {
            for symbol in &file.symbols {
                if cancel.is_cancelled() {
                    return findings;
                }
                if !matches!(symbol.kind, SymbolKind::Function | SymbolKind::Method) {
                    continue;
                }
                let slice = symbol_slice(&file.content, symbol);
                match llm.detect_smells(&symbol.name, &slice).await {
                    Ok(detected) => {
                        findings.extend(detected.into_iter().map(|smell| CodeSmell {
                            id: Uuid::new_v4(),
                            repo_id,
                            smell_type: smell.smell_type,
                            severity: smell.severity,
                            title: format!("AI finding: {}", symbol.name),
                            description: smell.description,
                            suggestion: smell.suggestion,
                            file_id: file.record.id,
                            symbol_id: Some(symbol.id),
                            line_start: symbol.line_start,
                            line_end: symbol.line_end,
                            metric_value: None,
                            metric_threshold: None,
                        }));
                    }
                    Err(e) => {
                        warn!(symbol = %symbol.name, "LLM smell detection failed, continuing: {e}");
                    }
                }
            }
        }

        findings
    }
}

#[async_trait]
impl JobRunner for IngestPipeline {
    async fn run_ingest(&self, repo_id: Uuid, cancel: CancellationToken) -> Result<()> {
        self.ingest(repo_id, &cancel).await
    }

    async fn mark_failed(&self, repo_id: Uuid, reason: &str) {
        if let Err(e) = self
            .store
            .update_repository_status(repo_id, RepoStatus::Failed, None, Some(reason))
            .await
        {
            warn!(repo_id = %repo_id, "could not record failure: {e}");
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(KvasirError::cancelled("job cancelled"));
    }
    Ok(())
}

/// Run a parser over one file.
fn parse_one(content: &str, path: &str, language: Language) -> Result<ParseOutcome> {
    let mut parser = lang::parser_for(language)?;
    parser.parse(content, path)
}

fn file_record(
    file_id: Uuid,
    repo_id: Uuid,
    file: &DiscoveredFile,
    parse_error: Option<String>,
) -> FileRecord {
    FileRecord {
        id: file_id,
        repo_id,
        path: file.path.clone(),
        language: file.language.as_str().to_string(),
        byte_size: file.byte_size as i64,
        line_count: file.line_count as i64,
        sha256: file.sha256.clone(),
        parse_error,
    }
}

/// Attach metrics and docstrings to parsed symbols.
fn measure_symbols(file_id: Uuid, file: &DiscoveredFile, outcome: &ParseOutcome) -> Vec<Symbol> {
    let lines: Vec<&str> = file.content.lines().collect();

    outcome
        .symbols
        .iter()
        .map(|parsed| {
            let start = parsed.line_start.max(1).min(lines.len().max(1));
            let end = parsed.line_end.clamp(start, lines.len().max(start));
            let slice = if lines.is_empty() {
                String::new()
            } else {
                lines[start - 1..end].join("\n")
            };

            let measured = metrics::analyze_symbol(&slice, file.language);
            let docstring =
                metrics::extract_docstring(&file.content, file.language, parsed.line_start);
            let docstring_length = docstring.as_deref().map(|d| d.len() as i64).unwrap_or(0);

            Symbol {
                id: Uuid::new_v4(),
                file_id,
                name: parsed.name.clone(),
                kind: parsed.kind,
                line_start: parsed.line_start as i64,
                line_end: parsed.line_end as i64,
                signature: parsed.signature.clone(),
                has_docstring: docstring_length > 0,
                docstring,
                docstring_length,
                cyclomatic_complexity: measured.cyclomatic_complexity,
                maintainability_index: measured.maintainability_index,
                mi_approximated: measured.mi_approximated,
                loc: measured.loc,
                comment_lines: measured.comment_lines,
            }
        })
        .collect()
}

fn symbol_slice(content: &str, symbol: &Symbol) -> String {
    content
        .lines()
        .skip((symbol.line_start.max(1) - 1) as usize)
        .take((symbol.line_end - symbol.line_start + 1).max(1) as usize)
        .collect::<Vec<_>>()
        .join("\n")
}
