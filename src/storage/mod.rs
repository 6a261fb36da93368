//! SQLite-backed store for repositories, files, symbols, graph edges,
//! findings, embeddings, gates, and CI/CD runs.
//!
//! All writes touching one repository are transactional per job phase;
//! re-ingest replaces a repository's data with delete-then-insert inside
//! a single transaction. Readers tolerate concurrent writers
//! (read-committed is sufficient; SQLite WAL provides it).

pub mod schema;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

use crate::analysis::callgraph::{Cycle, DeadSymbol};
use crate::core::errors::{KvasirError, Result};
use crate::core::models::{
    CallEdge, CicdRun, CodeSmell, DuplicationPair, EmbeddingRecord, FileRecord, ImportEdge,
    QualityGateConfig, RepoSource, RepoStatus, Repository, RepositorySpec, RunStatus, Severity,
    Symbol, SymbolKind, TriggeredBy, Vulnerability,
};

/// Filter for paged symbol listings.
#[derive(Debug, Clone, Default)]
pub struct SymbolFilter {
    pub repo_id: Option<Uuid>,
    pub file_path: Option<String>,
    pub kind: Option<SymbolKind>,
    pub limit: i64,
    pub offset: i64,
}

/// Filter for embedding retrieval during semantic search.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingFilter {
    pub repo_id: Option<Uuid>,
    pub language: Option<String>,
}

/// Aggregates the quality gate evaluates against.
#[derive(Debug, Clone, Default)]
pub struct GateMetrics {
    pub total_smells: i64,
    pub critical_smells: i64,
    pub total_vulnerabilities: i64,
    pub critical_vulnerabilities: i64,
    pub avg_complexity: f64,
    pub duplication_percentage: f64,
    pub symbol_count: i64,
}

/// Denormalised symbol view for search results and symbol listings.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SymbolCard {
    pub symbol_id: Uuid,
    pub name: String,
    pub kind: SymbolKind,
    pub signature: String,
    pub file_path: String,
    pub language: String,
    pub repo_id: Uuid,
    pub cyclomatic_complexity: i64,
    pub maintainability_index: f64,
    pub line_start: i64,
    pub line_end: i64,
}

/// SQLite store. Cheap to clone; the pool is shared.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to the database URL and apply the schema.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| KvasirError::config_field(e.to_string(), "database_url"))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.apply_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests; single connection so state is shared.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| KvasirError::config_field(e.to_string(), "database_url"))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.apply_schema().await?;
        Ok(store)
    }

    async fn apply_schema(&self) -> Result<()> {
        for statement in schema::SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// The underlying pool, for callers composing their own queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Repositories ============

    /// Create a repository; remote submissions are unique on
    /// `(origin_url, branch)` and duplicates fail with "already imported".
    pub async fn create_repository(&self, spec: &RepositorySpec) -> Result<Repository> {
        if spec.source == RepoSource::Remote {
            let url = spec.origin_url.as_deref().ok_or_else(|| {
                KvasirError::validation_field("remote submission requires a URL", "origin_url")
            })?;
            let existing = sqlx::query(
                "SELECT id FROM repositories WHERE origin_url = ? AND branch IS ?",
            )
            .bind(url)
            .bind(&spec.branch)
            .fetch_optional(&self.pool)
            .await?;
            if existing.is_some() {
                return Err(KvasirError::validation_field(
                    "already imported",
                    "origin_url",
                ));
            }
        }

        let repo = Repository {
            id: Uuid::new_v4(),
            name: spec.name.clone(),
            source: spec.source,
            origin_url: spec.origin_url.clone(),
            branch: spec.branch.clone(),
            archive_path: spec.archive_path.clone(),
            status: RepoStatus::Pending,
            file_count: 0,
            symbol_count: 0,
            stars: None,
            primary_language: None,
            last_commit: None,
            error_message: None,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO repositories
                (id, name, source, origin_url, branch, archive_path, status,
                 file_count, symbol_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?)
            "#,
        )
        .bind(repo.id.to_string())
        .bind(&repo.name)
        .bind(repo.source.as_str())
        .bind(&repo.origin_url)
        .bind(&repo.branch)
        .bind(&repo.archive_path)
        .bind(repo.status.as_str())
        .bind(repo.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                KvasirError::validation_field("already imported", "origin_url")
            }
            other => other.into(),
        })?;

        Ok(repo)
    }

    /// Fetch one repository.
    pub async fn get_repository(&self, id: Uuid) -> Result<Option<Repository>> {
        let row = sqlx::query("SELECT * FROM repositories WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| repository_from_row(&r)).transpose()
    }

    /// All repositories, newest first.
    pub async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let rows = sqlx::query("SELECT * FROM repositories ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(repository_from_row).collect()
    }

    /// Atomically update repository status, and counts when provided.
    pub async fn update_repository_status(
        &self,
        id: Uuid,
        status: RepoStatus,
        counts: Option<(i64, i64)>,
        error_message: Option<&str>,
    ) -> Result<()> {
        // Failure reasons are capped so a stack dump never lands in the row.
        let error_message = error_message.map(|m| m.chars().take(500).collect::<String>());
        match counts {
            Some((files, symbols)) => {
                sqlx::query(
                    "UPDATE repositories SET status = ?, file_count = ?, symbol_count = ?, error_message = ? WHERE id = ?",
                )
                .bind(status.as_str())
                .bind(files)
                .bind(symbols)
                .bind(error_message)
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "UPDATE repositories SET status = ?, error_message = ? WHERE id = ?",
                )
                .bind(status.as_str())
                .bind(error_message)
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Record clone metadata (stars, primary language, commit SHA).
    pub async fn set_repository_metadata(
        &self,
        id: Uuid,
        primary_language: Option<&str>,
        last_commit: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE repositories SET primary_language = COALESCE(?, primary_language), last_commit = COALESCE(?, last_commit) WHERE id = ?",
        )
        .bind(primary_language)
        .bind(last_commit)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Explicit repository deletion; cascades to all dependent rows.
    pub async fn delete_repository(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM repositories WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ============ Ingest swap ============

    /// Replace a repository's files and symbols atomically.
    ///
    /// Deleting the old files cascades to symbols, edges, embeddings, and
    /// findings, so a re-ingest leaves no stale analysis behind.
    pub async fn replace_repository_files(
        &self,
        repo_id: Uuid,
        files: &[(FileRecord, String)],
        symbols: &[Symbol],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM files WHERE repo_id = ?")
            .bind(repo_id.to_string())
            .execute(&mut *tx)
            .await?;
        for table in ["vulnerabilities", "code_smells", "duplication_pairs", "dead_code", "cycles"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE repo_id = ?"))
                .bind(repo_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        for (file, content) in files {
            sqlx::query(
                r#"
                INSERT INTO files
                    (id, repo_id, path, language, byte_size, line_count, sha256, parse_error, content)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(file.id.to_string())
            .bind(repo_id.to_string())
            .bind(&file.path)
            .bind(&file.language)
            .bind(file.byte_size)
            .bind(file.line_count)
            .bind(&file.sha256)
            .bind(&file.parse_error)
            .bind(content)
            .execute(&mut *tx)
            .await?;
        }

        for symbol in symbols {
            sqlx::query(
                r#"
                INSERT INTO symbols
                    (id, file_id, name, kind, line_start, line_end, signature,
                     docstring, has_docstring, docstring_length,
                     cyclomatic_complexity, maintainability_index, mi_approximated,
                     loc, comment_lines)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(symbol.id.to_string())
            .bind(symbol.file_id.to_string())
            .bind(&symbol.name)
            .bind(symbol.kind.as_str())
            .bind(symbol.line_start)
            .bind(symbol.line_end)
            .bind(&symbol.signature)
            .bind(&symbol.docstring)
            .bind(symbol.has_docstring)
            .bind(symbol.docstring_length)
            .bind(symbol.cyclomatic_complexity)
            .bind(symbol.maintainability_index)
            .bind(symbol.mi_approximated)
            .bind(symbol.loc)
            .bind(symbol.comment_lines)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // ============ Analysis artifacts ============

    /// Insert resolved call edges (one transaction per fan-out phase).
    pub async fn insert_call_edges(&self, edges: &[CallEdge]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for edge in edges {
            sqlx::query(
                "INSERT INTO call_edges (from_symbol_id, to_name, to_symbol_id, file_id, line, is_external) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(edge.from_symbol_id.to_string())
            .bind(&edge.to_name)
            .bind(edge.to_symbol_id.map(|id| id.to_string()))
            .bind(edge.file_id.to_string())
            .bind(edge.line)
            .bind(edge.is_external)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Insert file-level import edges.
    pub async fn insert_import_edges(&self, edges: &[ImportEdge]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for edge in edges {
            sqlx::query(
                "INSERT INTO import_edges (from_file_id, to_file_id, to_module_name, kind) VALUES (?, ?, ?, ?)",
            )
            .bind(edge.from_file_id.to_string())
            .bind(edge.to_file_id.map(|id| id.to_string()))
            .bind(&edge.to_module_name)
            .bind(&edge.kind)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Replace the dead-code listing for a repository.
    pub async fn replace_dead_code(&self, repo_id: Uuid, dead: &[DeadSymbol]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM dead_code WHERE repo_id = ?")
            .bind(repo_id.to_string())
            .execute(&mut *tx)
            .await?;
        for entry in dead {
            sqlx::query(
                "INSERT INTO dead_code (repo_id, symbol_id, name, file_path, out_calls, severity) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(repo_id.to_string())
            .bind(entry.symbol_id.to_string())
            .bind(&entry.name)
            .bind(&entry.file_path)
            .bind(entry.out_calls as i64)
            .bind(entry.severity.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Replace the cycle listing for a repository.
    pub async fn replace_cycles(&self, repo_id: Uuid, cycles: &[Cycle]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM cycles WHERE repo_id = ?")
            .bind(repo_id.to_string())
            .execute(&mut *tx)
            .await?;
        for cycle in cycles {
            sqlx::query(
                "INSERT INTO cycles (id, repo_id, members, size, severity) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(repo_id.to_string())
            .bind(serde_json::to_string(&cycle.members)?)
            .bind(cycle.size as i64)
            .bind(cycle.severity.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Insert vulnerability findings.
    pub async fn insert_vulnerabilities(&self, vulns: &[Vulnerability]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for vuln in vulns {
            sqlx::query(
                r#"
                INSERT INTO vulnerabilities
                    (id, repo_id, file_id, line, rule_id, severity, cwe, category,
                     description, recommendation, confidence, code_snippet)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(vuln.id.to_string())
            .bind(vuln.repo_id.to_string())
            .bind(vuln.file_id.to_string())
            .bind(vuln.line)
            .bind(&vuln.rule_id)
            .bind(vuln.severity.as_str())
            .bind(&vuln.cwe)
            .bind(&vuln.category)
            .bind(&vuln.description)
            .bind(&vuln.recommendation)
            .bind(vuln.confidence.as_str())
            .bind(&vuln.code_snippet)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Insert code-smell findings.
    pub async fn insert_smells(&self, smells: &[CodeSmell]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for smell in smells {
            sqlx::query(
                r#"
                INSERT INTO code_smells
                    (id, repo_id, smell_type, severity, title, description, suggestion,
                     file_id, symbol_id, line_start, line_end, metric_value, metric_threshold)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(smell.id.to_string())
            .bind(smell.repo_id.to_string())
            .bind(&smell.smell_type)
            .bind(smell.severity.as_str())
            .bind(&smell.title)
            .bind(&smell.description)
            .bind(&smell.suggestion)
            .bind(smell.file_id.to_string())
            .bind(smell.symbol_id.map(|id| id.to_string()))
            .bind(smell.line_start)
            .bind(smell.line_end)
            .bind(smell.metric_value)
            .bind(smell.metric_threshold)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Insert duplication pairs.
    pub async fn insert_duplications(&self, pairs: &[DuplicationPair]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for pair in pairs {
            sqlx::query(
                r#"
                INSERT INTO duplication_pairs
                    (id, repo_id, file1_id, file1_start, file1_end,
                     file2_id, file2_start, file2_end,
                     similarity, duplicate_lines, duplicate_tokens, snippet)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(pair.id.to_string())
            .bind(pair.repo_id.to_string())
            .bind(pair.file1_id.to_string())
            .bind(pair.file1_start)
            .bind(pair.file1_end)
            .bind(pair.file2_id.to_string())
            .bind(pair.file2_start)
            .bind(pair.file2_end)
            .bind(pair.similarity)
            .bind(pair.duplicate_lines)
            .bind(pair.duplicate_tokens)
            .bind(&pair.snippet)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Idempotent embedding upsert, keyed by symbol id.
    pub async fn upsert_embedding(&self, symbol_id: Uuid, vector: &[f32]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO embeddings (symbol_id, dim, vector) VALUES (?, ?, ?)
            ON CONFLICT(symbol_id) DO UPDATE SET dim = excluded.dim, vector = excluded.vector
            "#,
        )
        .bind(symbol_id.to_string())
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ============ Readers ============

    /// Files of a repository, path-ordered.
    pub async fn list_files(&self, repo_id: Uuid) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(
            "SELECT id, repo_id, path, language, byte_size, line_count, sha256, parse_error FROM files WHERE repo_id = ? ORDER BY path",
        )
        .bind(repo_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(file_from_row).collect()
    }

    /// Read one file's stored content.
    pub async fn get_file_content(&self, repo_id: Uuid, path: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT content FROM files WHERE repo_id = ? AND path = ?")
            .bind(repo_id.to_string())
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("content")))
    }

    /// Paged symbol listing with optional kind/path filters.
    pub async fn list_symbols(&self, filter: &SymbolFilter) -> Result<Vec<SymbolCard>> {
        let limit = if filter.limit > 0 { filter.limit } else { 100 };
        let mut sql = String::from(
            r#"
            SELECT s.id AS symbol_id, s.name, s.kind, s.signature,
                   s.cyclomatic_complexity, s.maintainability_index,
                   s.line_start, s.line_end,
                   f.path AS file_path, f.language, f.repo_id
            FROM symbols s JOIN files f ON f.id = s.file_id
            WHERE 1 = 1
            "#,
        );
        if filter.repo_id.is_some() {
            sql.push_str(" AND f.repo_id = ?");
        }
        if filter.file_path.is_some() {
            sql.push_str(" AND f.path = ?");
        }
        if filter.kind.is_some() {
            sql.push_str(" AND s.kind = ?");
        }
        sql.push_str(" ORDER BY f.path, s.line_start LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(repo_id) = filter.repo_id {
            query = query.bind(repo_id.to_string());
        }
        if let Some(path) = &filter.file_path {
            query = query.bind(path);
        }
        if let Some(kind) = filter.kind {
            query = query.bind(kind.as_str());
        }
        query = query.bind(limit).bind(filter.offset);

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(symbol_card_from_row).collect()
    }

    /// Full symbol rows for one repository (analysis input).
    pub async fn symbols_for_repo(&self, repo_id: Uuid) -> Result<Vec<Symbol>> {
        let rows = sqlx::query(
            "SELECT s.* FROM symbols s JOIN files f ON f.id = s.file_id WHERE f.repo_id = ?",
        )
        .bind(repo_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(symbol_from_row).collect()
    }

    /// Denormalised view of one symbol.
    pub async fn symbol_card(&self, symbol_id: Uuid) -> Result<Option<SymbolCard>> {
        let row = sqlx::query(
            r#"
            SELECT s.id AS symbol_id, s.name, s.kind, s.signature,
                   s.cyclomatic_complexity, s.maintainability_index,
                   s.line_start, s.line_end,
                   f.path AS file_path, f.language, f.repo_id
            FROM symbols s JOIN files f ON f.id = s.file_id
            WHERE s.id = ?
            "#,
        )
        .bind(symbol_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| symbol_card_from_row(&r)).transpose()
    }

    /// Call edges of a repository.
    pub async fn call_edges(&self, repo_id: Uuid) -> Result<Vec<CallEdge>> {
        let rows = sqlx::query(
            "SELECT ce.* FROM call_edges ce JOIN files f ON f.id = ce.file_id WHERE f.repo_id = ?",
        )
        .bind(repo_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(call_edge_from_row).collect()
    }

    /// Import edges of a repository.
    pub async fn import_edges(&self, repo_id: Uuid) -> Result<Vec<ImportEdge>> {
        let rows = sqlx::query(
            "SELECT ie.* FROM import_edges ie JOIN files f ON f.id = ie.from_file_id WHERE f.repo_id = ?",
        )
        .bind(repo_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(ImportEdge {
                    from_file_id: parse_uuid(r.get("from_file_id"))?,
                    to_file_id: r
                        .get::<Option<String>, _>("to_file_id")
                        .map(parse_uuid)
                        .transpose()?,
                    to_module_name: r.get("to_module_name"),
                    kind: r.get("kind"),
                })
            })
            .collect()
    }

    /// Dead-code listing (persisted in severity-then-path order).
    pub async fn dead_code(&self, repo_id: Uuid) -> Result<Vec<DeadSymbol>> {
        let rows = sqlx::query("SELECT * FROM dead_code WHERE repo_id = ?")
            .bind(repo_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        let mut dead: Vec<DeadSymbol> = rows
            .iter()
            .map(|r| {
                Ok(DeadSymbol {
                    symbol_id: parse_uuid(r.get("symbol_id"))?,
                    name: r.get("name"),
                    file_path: r.get("file_path"),
                    out_calls: r.get::<i64, _>("out_calls") as usize,
                    severity: parse_enum::<Severity>(r.get("severity"))?,
                })
            })
            .collect::<Result<_>>()?;
        dead.sort_by(|a, b| {
            b.severity
                .rank()
                .cmp(&a.severity.rank())
                .then_with(|| a.file_path.cmp(&b.file_path))
        });
        Ok(dead)
    }

    /// Cycle listing, ordered by smallest member name.
    pub async fn cycles(&self, repo_id: Uuid) -> Result<Vec<Cycle>> {
        let rows = sqlx::query("SELECT * FROM cycles WHERE repo_id = ?")
            .bind(repo_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        let mut cycles: Vec<Cycle> = rows
            .iter()
            .map(|r| {
                let members: Vec<String> = serde_json::from_str(&r.get::<String, _>("members"))?;
                Ok(Cycle {
                    symbol_ids: Vec::new(),
                    members,
                    size: r.get::<i64, _>("size") as usize,
                    severity: parse_enum::<Severity>(r.get("severity"))?,
                })
            })
            .collect::<Result<_>>()?;
        cycles.sort_by(|a, b| a.members.first().cmp(&b.members.first()));
        Ok(cycles)
    }

    /// Vulnerabilities of a repository, line-ordered.
    pub async fn vulnerabilities(&self, repo_id: Uuid) -> Result<Vec<Vulnerability>> {
        let rows = sqlx::query("SELECT * FROM vulnerabilities WHERE repo_id = ? ORDER BY line")
            .bind(repo_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| {
                Ok(Vulnerability {
                    id: parse_uuid(r.get("id"))?,
                    repo_id: parse_uuid(r.get("repo_id"))?,
                    file_id: parse_uuid(r.get("file_id"))?,
                    line: r.get("line"),
                    rule_id: r.get("rule_id"),
                    severity: parse_enum::<Severity>(r.get("severity"))?,
                    cwe: r.get("cwe"),
                    category: r.get("category"),
                    description: r.get("description"),
                    recommendation: r.get("recommendation"),
                    confidence: parse_enum(r.get("confidence"))?,
                    code_snippet: r.get("code_snippet"),
                })
            })
            .collect()
    }

    /// Embeddings matching the filter.
    pub async fn embeddings(&self, filter: &EmbeddingFilter) -> Result<Vec<EmbeddingRecord>> {
        let mut sql = String::from(
            r#"
            SELECT e.symbol_id, e.dim, e.vector
            FROM embeddings e
            JOIN symbols s ON s.id = e.symbol_id
            JOIN files f ON f.id = s.file_id
            WHERE 1 = 1
            "#,
        );
        if filter.repo_id.is_some() {
            sql.push_str(" AND f.repo_id = ?");
        }
        if filter.language.is_some() {
            sql.push_str(" AND f.language = ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(repo_id) = filter.repo_id {
            query = query.bind(repo_id.to_string());
        }
        if let Some(language) = &filter.language {
            query = query.bind(language);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| {
                Ok(EmbeddingRecord {
                    symbol_id: parse_uuid(r.get("symbol_id"))?,
                    dim: r.get::<i64, _>("dim") as usize,
                    vector: blob_to_vec(&r.get::<Vec<u8>, _>("vector")),
                })
            })
            .collect()
    }

    // ============ Quality gates and runs ============

    /// Gate thresholds for a repository, defaults when unset.
    pub async fn gate_config(&self, repo_id: Uuid) -> Result<QualityGateConfig> {
        let row = sqlx::query("SELECT * FROM quality_gates WHERE repo_id = ?")
            .bind(repo_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(r) => QualityGateConfig {
                max_complexity: r.get("max_complexity"),
                max_code_smells: r.get("max_code_smells"),
                max_critical_smells: r.get("max_critical_smells"),
                max_vulnerabilities: r.get("max_vulnerabilities"),
                max_critical_vulnerabilities: r.get("max_critical_vulnerabilities"),
                min_quality_score: r.get("min_quality_score"),
                max_duplication_percentage: r.get("max_duplication_percentage"),
                block_on_failure: r.get("block_on_failure"),
            },
            None => QualityGateConfig::default(),
        })
    }

    /// Store gate thresholds for a repository.
    pub async fn put_gate_config(&self, repo_id: Uuid, config: &QualityGateConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO quality_gates
                (repo_id, max_complexity, max_code_smells, max_critical_smells,
                 max_vulnerabilities, max_critical_vulnerabilities,
                 min_quality_score, max_duplication_percentage, block_on_failure)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(repo_id) DO UPDATE SET
                max_complexity = excluded.max_complexity,
                max_code_smells = excluded.max_code_smells,
                max_critical_smells = excluded.max_critical_smells,
                max_vulnerabilities = excluded.max_vulnerabilities,
                max_critical_vulnerabilities = excluded.max_critical_vulnerabilities,
                min_quality_score = excluded.min_quality_score,
                max_duplication_percentage = excluded.max_duplication_percentage,
                block_on_failure = excluded.block_on_failure
            "#,
        )
        .bind(repo_id.to_string())
        .bind(config.max_complexity)
        .bind(config.max_code_smells)
        .bind(config.max_critical_smells)
        .bind(config.max_vulnerabilities)
        .bind(config.max_critical_vulnerabilities)
        .bind(config.min_quality_score)
        .bind(config.max_duplication_percentage)
        .bind(config.block_on_failure)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Aggregate the metrics the gate evaluates.
    pub async fn gate_metrics(&self, repo_id: Uuid) -> Result<GateMetrics> {
        let repo_id_str = repo_id.to_string();

        let smells = sqlx::query(
            "SELECT COUNT(*) AS total, SUM(CASE WHEN severity = 'critical' THEN 1 ELSE 0 END) AS critical FROM code_smells WHERE repo_id = ?",
        )
        .bind(&repo_id_str)
        .fetch_one(&self.pool)
        .await?;

        let vulns = sqlx::query(
            "SELECT COUNT(*) AS total, SUM(CASE WHEN severity = 'critical' THEN 1 ELSE 0 END) AS critical FROM vulnerabilities WHERE repo_id = ?",
        )
        .bind(&repo_id_str)
        .fetch_one(&self.pool)
        .await?;

        let complexity = sqlx::query(
            r#"
            SELECT COALESCE(AVG(s.cyclomatic_complexity), 0.0) AS avg_complexity,
                   COUNT(*) AS symbol_count
            FROM symbols s JOIN files f ON f.id = s.file_id
            WHERE f.repo_id = ?
            "#,
        )
        .bind(&repo_id_str)
        .fetch_one(&self.pool)
        .await?;

        let duplication = sqlx::query(
            r#"
            SELECT COALESCE(SUM(d.duplicate_lines), 0) AS dup_lines,
                   (SELECT COALESCE(SUM(line_count), 0) FROM files WHERE repo_id = ?) AS total_lines
            FROM duplication_pairs d WHERE d.repo_id = ?
            "#,
        )
        .bind(&repo_id_str)
        .bind(&repo_id_str)
        .fetch_one(&self.pool)
        .await?;

        let dup_lines: i64 = duplication.get("dup_lines");
        let total_lines: i64 = duplication.get("total_lines");
        let duplication_percentage = if total_lines > 0 {
            (dup_lines as f64 / total_lines as f64) * 100.0
        } else {
            0.0
        };

        Ok(GateMetrics {
            total_smells: smells.get("total"),
            critical_smells: smells.get::<Option<i64>, _>("critical").unwrap_or(0),
            total_vulnerabilities: vulns.get("total"),
            critical_vulnerabilities: vulns.get::<Option<i64>, _>("critical").unwrap_or(0),
            avg_complexity: complexity.get("avg_complexity"),
            duplication_percentage,
            symbol_count: complexity.get("symbol_count"),
        })
    }

    /// Create a run in `running` state.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_run(
        &self,
        repo_id: Uuid,
        branch: Option<&str>,
        commit_sha: Option<&str>,
        pr_number: Option<i64>,
        pr_title: Option<&str>,
        triggered_by: TriggeredBy,
    ) -> Result<CicdRun> {
        let run = CicdRun {
            id: Uuid::new_v4(),
            repo_id,
            branch: branch.map(String::from),
            commit_sha: commit_sha.map(String::from),
            pr_number,
            pr_title: pr_title.map(String::from),
            triggered_by,
            status: RunStatus::Running,
            gate_result: None,
            report_html: None,
            created_at: Utc::now(),
            completed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO cicd_runs
                (id, repo_id, branch, commit_sha, pr_number, pr_title, triggered_by, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.repo_id.to_string())
        .bind(&run.branch)
        .bind(&run.commit_sha)
        .bind(run.pr_number)
        .bind(&run.pr_title)
        .bind(run.triggered_by.as_str())
        .bind(run.status.as_str())
        .bind(run.created_at)
        .execute(&self.pool)
        .await?;

        Ok(run)
    }

    /// Move a run to a terminal state. Terminal states are immutable:
    /// completing an already-terminal run is an error.
    pub async fn complete_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        gate_result: Option<&serde_json::Value>,
        report_html: Option<&str>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(KvasirError::validation("runs can only complete to a terminal state"));
        }

        let result = sqlx::query(
            "UPDATE cicd_runs SET status = ?, gate_result = ?, report_html = ?, completed_at = ? WHERE id = ? AND status = 'running'",
        )
        .bind(status.as_str())
        .bind(gate_result.map(|v| v.to_string()))
        .bind(report_html)
        .bind(Utc::now())
        .bind(run_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(KvasirError::validation(format!(
                "run {run_id} is not in running state"
            )));
        }
        Ok(())
    }

    /// Run history for a repository, newest first.
    pub async fn list_runs(&self, repo_id: Uuid) -> Result<Vec<CicdRun>> {
        let rows = sqlx::query(
            "SELECT * FROM cicd_runs WHERE repo_id = ? ORDER BY created_at DESC",
        )
        .bind(repo_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(run_from_row).collect()
    }

    /// Fetch one run.
    pub async fn get_run(&self, run_id: Uuid) -> Result<Option<CicdRun>> {
        let row = sqlx::query("SELECT * FROM cicd_runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| run_from_row(&r)).transpose()
    }
}

// ============ Vector blob encoding ============

/// Encode a float vector as little-endian f32 bytes.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for &v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a blob produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

// ============ Row mapping ============

fn parse_uuid(raw: String) -> Result<Uuid> {
    Uuid::parse_str(&raw)
        .map_err(|e| KvasirError::database(format!("bad uuid {raw}: {e}"), "parse"))
}

fn parse_enum<T: FromStr<Err = KvasirError>>(raw: String) -> Result<T> {
    raw.parse()
}

fn repository_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Repository> {
    Ok(Repository {
        id: parse_uuid(row.get("id"))?,
        name: row.get("name"),
        source: parse_enum::<RepoSource>(row.get("source"))?,
        origin_url: row.get("origin_url"),
        branch: row.get("branch"),
        archive_path: row.get("archive_path"),
        status: parse_enum::<RepoStatus>(row.get("status"))?,
        file_count: row.get("file_count"),
        symbol_count: row.get("symbol_count"),
        stars: row.get("stars"),
        primary_language: row.get("primary_language"),
        last_commit: row.get("last_commit"),
        error_message: row.get("error_message"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}

fn file_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<FileRecord> {
    Ok(FileRecord {
        id: parse_uuid(row.get("id"))?,
        repo_id: parse_uuid(row.get("repo_id"))?,
        path: row.get("path"),
        language: row.get("language"),
        byte_size: row.get("byte_size"),
        line_count: row.get("line_count"),
        sha256: row.get("sha256"),
        parse_error: row.get("parse_error"),
    })
}

fn symbol_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Symbol> {
    Ok(Symbol {
        id: parse_uuid(row.get("id"))?,
        file_id: parse_uuid(row.get("file_id"))?,
        name: row.get("name"),
        kind: parse_enum::<SymbolKind>(row.get("kind"))?,
        line_start: row.get("line_start"),
        line_end: row.get("line_end"),
        signature: row.get("signature"),
        docstring: row.get("docstring"),
        has_docstring: row.get("has_docstring"),
        docstring_length: row.get("docstring_length"),
        cyclomatic_complexity: row.get("cyclomatic_complexity"),
        maintainability_index: row.get("maintainability_index"),
        mi_approximated: row.get("mi_approximated"),
        loc: row.get("loc"),
        comment_lines: row.get("comment_lines"),
    })
}

fn symbol_card_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SymbolCard> {
    Ok(SymbolCard {
        symbol_id: parse_uuid(row.get("symbol_id"))?,
        name: row.get("name"),
        kind: parse_enum::<SymbolKind>(row.get("kind"))?,
        signature: row.get("signature"),
        file_path: row.get("file_path"),
        language: row.get("language"),
        repo_id: parse_uuid(row.get("repo_id"))?,
        cyclomatic_complexity: row.get("cyclomatic_complexity"),
        maintainability_index: row.get("maintainability_index"),
        line_start: row.get("line_start"),
        line_end: row.get("line_end"),
    })
}

fn call_edge_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CallEdge> {
    Ok(CallEdge {
        from_symbol_id: parse_uuid(row.get("from_symbol_id"))?,
        to_name: row.get("to_name"),
        to_symbol_id: row
            .get::<Option<String>, _>("to_symbol_id")
            .map(parse_uuid)
            .transpose()?,
        file_id: parse_uuid(row.get("file_id"))?,
        line: row.get("line"),
        is_external: row.get("is_external"),
    })
}

fn run_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CicdRun> {
    let gate_result: Option<String> = row.get("gate_result");
    Ok(CicdRun {
        id: parse_uuid(row.get("id"))?,
        repo_id: parse_uuid(row.get("repo_id"))?,
        branch: row.get("branch"),
        commit_sha: row.get("commit_sha"),
        pr_number: row.get("pr_number"),
        pr_title: row.get("pr_title"),
        triggered_by: parse_enum::<TriggeredBy>(row.get("triggered_by"))?,
        status: parse_enum::<RunStatus>(row.get("status"))?,
        gate_result: gate_result
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?,
        report_html: row.get("report_html"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        completed_at: row.get::<Option<DateTime<Utc>>, _>("completed_at"),
    })
}
