//! End-to-end ingest and analysis over a mixed-language fixture archive.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use zip::write::SimpleFileOptions;

use kvasir_rs::core::config::KvasirConfig;
use kvasir_rs::core::errors::Result;
use kvasir_rs::core::models::{RepoSource, RepoStatus, RepositorySpec, SymbolKind};
use kvasir_rs::providers::EmbeddingProvider;
use kvasir_rs::scheduler::pipeline::IngestPipeline;
use kvasir_rs::scheduler::JobRunner;
use kvasir_rs::storage::{EmbeddingFilter, SqliteStore};

const VECTOR_DIM: usize = 16;

/// Deterministic embedding provider: character histogram, no network.
struct HistogramProvider;

#[async_trait]
impl EmbeddingProvider for HistogramProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; VECTOR_DIM];
                for byte in text.bytes() {
                    vector[byte as usize % VECTOR_DIM] += 1.0;
                }
                vector
            })
            .collect())
    }

    fn dim(&self) -> usize {
        VECTOR_DIM
    }
}

fn write_zip(entries: &[(&str, &str)]) -> PathBuf {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fixture.zip");
    let file = fs::File::create(&path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for (name, content) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
    std::mem::forget(dir);
    path
}

const PYTHON_MAIN: &str = r#"import util


def a():
    """Top of the call chain."""
    b()


def b():
    c()


def c():
    return 1
"#;

const PYTHON_CYCLE: &str = r#"def ping(n):
    if n > 0:
        pong(n - 1)


def pong(n):
    if n > 0:
        peng(n - 1)


def peng(n):
    if n > 0:
        ping(n - 1)
"#;

const C_UTIL: &str = r#"#include <stdio.h>

/**
 * Entry point.
 */
int main(void)
{
    helper();
    return 0;
}

int helper(void)
{
    printf("hi");
    return 1;
}
"#;

const COBOL_PAYROLL: &str = "\
       IDENTIFICATION DIVISION.
       PROGRAM-ID. PAYROLL.
       PROCEDURE DIVISION.
       MAIN-PARAGRAPH.
           PERFORM COMPUTE-PAY.
           STOP RUN.
       COMPUTE-PAY.
           MOVE 100 TO WS-PAY.
";

const ASM_BOOT: &str = "\
.globl _start
; boot shim
_start:
    call setup_stack
    ret

setup_stack:
    ret
";

async fn ingest_fixture(entries: &[(&str, &str)]) -> (SqliteStore, Uuid, TempDir) {
    let archive = write_zip(entries);
    let store = SqliteStore::in_memory().await.unwrap();
    let scratch = TempDir::new().unwrap();
    let config = KvasirConfig {
        scratch_root: scratch.path().to_path_buf(),
        vector_dim: VECTOR_DIM,
        ..Default::default()
    };

    let repo = store
        .create_repository(&RepositorySpec {
            name: "fixture".to_string(),
            source: RepoSource::Upload,
            origin_url: None,
            branch: None,
            archive_path: Some(archive.to_string_lossy().into_owned()),
        })
        .await
        .unwrap();

    let pipeline = IngestPipeline::new(
        store.clone(),
        config,
        Some(Arc::new(HistogramProvider)),
        None,
    );
    pipeline
        .run_ingest(repo.id, CancellationToken::new())
        .await
        .unwrap();

    (store, repo.id, scratch)
}

#[tokio::test]
async fn completed_repo_satisfies_core_invariants() {
    let (store, repo_id, _scratch) = ingest_fixture(&[
        ("src/main.py", PYTHON_MAIN),
        ("src/util.py", "def unused_helper():\n    pass\n"),
        ("native/util.c", C_UTIL),
        ("PAYROLL.cbl", COBOL_PAYROLL),
        ("boot.s", ASM_BOOT),
    ])
    .await;

    let repo = store.get_repository(repo_id).await.unwrap().unwrap();
    assert_eq!(repo.status, RepoStatus::Completed);

    // Counts: persisted rows equal recorded counts.
    let files = store.list_files(repo_id).await.unwrap();
    let symbols = store.symbols_for_repo(repo_id).await.unwrap();
    assert_eq!(files.len() as i64, repo.file_count);
    assert_eq!(symbols.len() as i64, repo.symbol_count);
    assert_eq!(repo.primary_language.as_deref(), Some("python"));

    // Every parsed symbol has complexity >= 1, and docstring flags agree.
    for symbol in &symbols {
        assert!(symbol.cyclomatic_complexity >= 1, "{}", symbol.name);
        assert_eq!(
            symbol.has_docstring,
            symbol.docstring_length > 0,
            "{}",
            symbol.name
        );
        assert!(symbol.line_start >= 1);
        assert!(symbol.line_end >= symbol.line_start);
    }

    // Docstrings extracted per language.
    let a = symbols.iter().find(|s| s.name == "a").unwrap();
    assert_eq!(a.docstring.as_deref(), Some("Top of the call chain."));
    let c_main = symbols
        .iter()
        .find(|s| s.name == "main" && s.signature.contains("int main"))
        .unwrap();
    assert_eq!(c_main.docstring.as_deref(), Some("Entry point."));
    let start = symbols.iter().find(|s| s.name == "_start").unwrap();
    assert_eq!(start.docstring.as_deref(), Some("boot shim"));

    // Every call edge references a file of this repository.
    let file_ids: Vec<Uuid> = files.iter().map(|f| f.id).collect();
    let edges = store.call_edges(repo_id).await.unwrap();
    assert!(!edges.is_empty());
    for edge in &edges {
        assert!(file_ids.contains(&edge.file_id));
    }
}

#[tokio::test]
async fn dead_code_counts_in_degree_only() {
    // a -> b -> c: nothing calls a and it is not an entry point, so only
    // a is dead; b and c have callers.
    let (store, repo_id, _scratch) = ingest_fixture(&[("chain.py", PYTHON_MAIN)]).await;

    let dead = store.dead_code(repo_id).await.unwrap();
    let names: Vec<_> = dead.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["a"]);
    // `a` makes one call.
    assert_eq!(dead[0].out_calls, 1);
}

#[tokio::test]
async fn three_cycle_reported_with_high_severity() {
    let (store, repo_id, _scratch) = ingest_fixture(&[("cycle.py", PYTHON_CYCLE)]).await;

    let cycles = store.cycles(repo_id).await.unwrap();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].members, vec!["peng", "ping", "pong"]);
    assert_eq!(cycles[0].size, 3);
    assert_eq!(cycles[0].severity.as_str(), "high");
}

#[tokio::test]
async fn cobol_and_assembly_entry_points_are_live() {
    let (store, repo_id, _scratch) =
        ingest_fixture(&[("PAYROLL.cbl", COBOL_PAYROLL), ("boot.s", ASM_BOOT)]).await;

    let dead = store.dead_code(repo_id).await.unwrap();
    let names: Vec<_> = dead.iter().map(|d| d.name.as_str()).collect();
    // PAYROLL is the PROGRAM-ID, MAIN-PARAGRAPH is a configured entry,
    // _start is exported via .globl, and the remaining procedures have
    // callers.
    assert!(!names.contains(&"PAYROLL"));
    assert!(!names.contains(&"MAIN-PARAGRAPH"));
    assert!(!names.contains(&"_start"));
    assert!(!names.contains(&"COMPUTE-PAY"));
    assert!(!names.contains(&"setup_stack"));
}

#[tokio::test]
async fn duplication_pairs_are_canonical() {
    let body = r#"def total(items):
    acc = 0
    for item in items:
        if item.active and item.price > 0:
            acc = acc + item.price * item.count
        else:
            acc = acc - item.discount
    result = summarize(acc, items)
    publish(result, items)
    return result
"#;
    let (store, repo_id, _scratch) =
        ingest_fixture(&[("one.py", body), ("two.py", body)]).await;

    let pairs = {
        // duplication_pairs read back through the gate metrics path plus a
        // direct check on canonical ordering via the raw query surface.
        let metrics = store.gate_metrics(repo_id).await.unwrap();
        assert!(metrics.duplication_percentage > 0.0);
        sqlx::query_as::<_, (String, String)>(
            "SELECT file1_id, file2_id FROM duplication_pairs WHERE repo_id = ?",
        )
        .bind(repo_id.to_string())
        .fetch_all(store.pool())
        .await
        .unwrap()
    };

    assert!(!pairs.is_empty());
    for (file1, file2) in pairs {
        assert!(file1 < file2, "pairs must be stored in canonical order");
    }
}

#[tokio::test]
async fn embeddings_have_fixed_dim_and_unit_norm() {
    let (store, repo_id, _scratch) = ingest_fixture(&[("m.py", PYTHON_MAIN)]).await;

    let embeddings = store
        .embeddings(&EmbeddingFilter {
            repo_id: Some(repo_id),
            language: None,
        })
        .await
        .unwrap();

    let symbols = store.symbols_for_repo(repo_id).await.unwrap();
    let callable = symbols
        .iter()
        .filter(|s| matches!(s.kind, SymbolKind::Function | SymbolKind::Method))
        .count();
    assert!(embeddings.len() >= callable);

    for record in embeddings {
        assert_eq!(record.dim, VECTOR_DIM);
        assert_eq!(record.vector.len(), VECTOR_DIM);
        let norm: f32 = record.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}

#[tokio::test]
async fn vulnerable_file_produces_findings() {
    let vulnerable = r#"import subprocess


def run(cmd):
    subprocess.run(cmd, shell=True)


def login():
    password = "hunter2hunter2"
    return password
"#;
    let (store, repo_id, _scratch) = ingest_fixture(&[("danger.py", vulnerable)]).await;

    let vulns = store.vulnerabilities(repo_id).await.unwrap();
    let categories: Vec<_> = vulns.iter().map(|v| v.category.as_str()).collect();
    assert!(categories.contains(&"command_injection"));
    assert!(categories.contains(&"hardcoded_secret"));

    // Secrets never land in snippets unredacted.
    for vuln in vulns.iter().filter(|v| v.category == "hardcoded_secret") {
        assert!(!vuln.code_snippet.contains("hunter2"));
    }
}

#[tokio::test]
async fn reingest_replaces_data_in_place() {
    let archive_v1 = write_zip(&[("m.py", "def old_name():\n    pass\n")]);
    let archive_v2 = write_zip(&[("m.py", "def new_name():\n    pass\n")]);

    let store = SqliteStore::in_memory().await.unwrap();
    let scratch = TempDir::new().unwrap();
    let config = KvasirConfig {
        scratch_root: scratch.path().to_path_buf(),
        ..Default::default()
    };

    let repo = store
        .create_repository(&RepositorySpec {
            name: "evolving".to_string(),
            source: RepoSource::Upload,
            origin_url: None,
            branch: None,
            archive_path: Some(archive_v1.to_string_lossy().into_owned()),
        })
        .await
        .unwrap();

    let pipeline = IngestPipeline::new(store.clone(), config, None, None);
    pipeline
        .run_ingest(repo.id, CancellationToken::new())
        .await
        .unwrap();

    // Point the same repository at the new archive and ingest again.
    sqlx::query("UPDATE repositories SET archive_path = ? WHERE id = ?")
        .bind(archive_v2.to_string_lossy().into_owned())
        .bind(repo.id.to_string())
        .execute(store.pool())
        .await
        .unwrap();
    pipeline
        .run_ingest(repo.id, CancellationToken::new())
        .await
        .unwrap();

    let symbols = store.symbols_for_repo(repo.id).await.unwrap();
    let names: Vec<_> = symbols.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["new_name"]);

    let repo = store.get_repository(repo.id).await.unwrap().unwrap();
    assert_eq!(repo.symbol_count, 1);
}

#[tokio::test]
async fn failed_ingest_records_reason() {
    let store = SqliteStore::in_memory().await.unwrap();
    let scratch = TempDir::new().unwrap();
    let config = KvasirConfig {
        scratch_root: scratch.path().to_path_buf(),
        ..Default::default()
    };

    let repo = store
        .create_repository(&RepositorySpec {
            name: "broken".to_string(),
            source: RepoSource::Upload,
            origin_url: None,
            branch: None,
            archive_path: Some("/nonexistent/archive.zip".to_string()),
        })
        .await
        .unwrap();

    let pipeline = IngestPipeline::new(store.clone(), config, None, None);
    let err = pipeline
        .run_ingest(repo.id, CancellationToken::new())
        .await
        .unwrap_err();
    pipeline.mark_failed(repo.id, &err.to_string()).await;

    let repo = store.get_repository(repo.id).await.unwrap().unwrap();
    assert_eq!(repo.status, RepoStatus::Failed);
    assert!(repo.error_message.is_some());
    assert_eq!(repo.status.user_visible(), "failed");
}
