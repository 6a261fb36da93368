//! Core data model: repositories, files, symbols, edges, findings, runs.
//!
//! Enum variants serialize to the snake_case strings stored in the
//! database, so `as_str`/`FromStr` pairs are the single source of truth
//! for the wire and storage encodings.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::errors::KvasirError;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant
            ),+
        }

        impl $name {
            /// Stable storage/wire encoding of the variant.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = KvasirError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(KvasirError::validation(format!(
                        concat!("unknown ", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum! {
    /// Where a repository came from.
    RepoSource {
        Upload => "upload",
        Remote => "remote",
    }
}

string_enum! {
    /// Repository lifecycle states.
    RepoStatus {
        Pending => "pending",
        Cloning => "cloning",
        Parsing => "parsing",
        Analyzing => "analyzing",
        Completed => "completed",
        Failed => "failed",
    }
}

impl RepoStatus {
    /// Collapse internal states into the user-visible triple.
    pub fn user_visible(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            _ => "processing",
        }
    }
}

string_enum! {
    /// Symbol kinds shared by all language parsers.
    SymbolKind {
        Function => "function",
        Class => "class",
        Method => "method",
        Variable => "variable",
        Procedure => "procedure",
    }
}

string_enum! {
    /// Finding severity scale.
    Severity {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

impl Severity {
    /// Ordering weight, higher is worse.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

string_enum! {
    /// Detector confidence in a finding.
    Confidence {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
}

string_enum! {
    /// What initiated a CI/CD run.
    TriggeredBy {
        Manual => "manual",
        Webhook => "webhook",
        PreCommit => "pre-commit",
    }
}

string_enum! {
    /// CI/CD run state machine: running -> (passed | failed | error).
    RunStatus {
        Running => "running",
        Passed => "passed",
        Failed => "failed",
        Error => "error",
    }
}

impl RunStatus {
    /// Terminal states are immutable; a superseding event creates a new run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// A source repository under analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: Uuid,
    pub name: String,
    pub source: RepoSource,
    pub origin_url: Option<String>,
    pub branch: Option<String>,
    pub archive_path: Option<String>,
    pub status: RepoStatus,
    pub file_count: i64,
    pub symbol_count: i64,
    pub stars: Option<i64>,
    pub primary_language: Option<String>,
    pub last_commit: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Specification of a new repository submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySpec {
    pub name: String,
    pub source: RepoSource,
    pub origin_url: Option<String>,
    pub branch: Option<String>,
    pub archive_path: Option<String>,
}

/// A discovered source file within a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub repo_id: Uuid,
    /// POSIX-normalised, repository-relative path
    pub path: String,
    pub language: String,
    pub byte_size: i64,
    pub line_count: i64,
    pub sha256: String,
    /// Recorded when the parser failed on this file; the file is skipped
    pub parse_error: Option<String>,
}

/// A named, source-addressable construct with a line range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub id: Uuid,
    pub file_id: Uuid,
    pub name: String,
    pub kind: SymbolKind,
    /// 1-based inclusive range
    pub line_start: i64,
    pub line_end: i64,
    pub signature: String,
    pub docstring: Option<String>,
    pub has_docstring: bool,
    pub docstring_length: i64,
    pub cyclomatic_complexity: i64,
    pub maintainability_index: f64,
    /// True when Halstead volume was approximated by max(1, LOC)
    pub mi_approximated: bool,
    pub loc: i64,
    pub comment_lines: i64,
}

/// A directed reference from a symbol to a callee name, possibly unresolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEdge {
    pub from_symbol_id: Uuid,
    pub to_name: String,
    pub to_symbol_id: Option<Uuid>,
    pub file_id: Uuid,
    pub line: i64,
    pub is_external: bool,
}

/// A file-level import relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportEdge {
    pub from_file_id: Uuid,
    /// Resolved target file within the repository, when the module maps to one
    pub to_file_id: Option<Uuid>,
    pub to_module_name: String,
    /// Import mechanism: "import", "include", "copy"
    pub kind: String,
}

/// A stored embedding vector for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub symbol_id: Uuid,
    pub dim: usize,
    pub vector: Vec<f32>,
}

/// A rule-based security finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub file_id: Uuid,
    pub line: i64,
    pub rule_id: String,
    pub severity: Severity,
    pub cwe: Option<String>,
    pub category: String,
    pub description: String,
    pub recommendation: String,
    pub confidence: Confidence,
    pub code_snippet: String,
}

/// A maintainability finding (heuristic or LLM-assisted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSmell {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub smell_type: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub suggestion: String,
    pub file_id: Uuid,
    pub symbol_id: Option<Uuid>,
    /// 1-based inclusive range of the offending region
    pub line_start: i64,
    pub line_end: i64,
    pub metric_value: Option<i64>,
    pub metric_threshold: Option<i64>,
}

/// A detected near-duplicate region between two files.
///
/// Canonical ordering: `file1_id < file2_id`, each pair recorded once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicationPair {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub file1_id: Uuid,
    pub file1_start: i64,
    pub file1_end: i64,
    pub file2_id: Uuid,
    pub file2_start: i64,
    pub file2_end: i64,
    /// Estimated Jaccard similarity in 0..1
    pub similarity: f64,
    pub duplicate_lines: i64,
    pub duplicate_tokens: i64,
    pub snippet: String,
}

/// Per-repository quality gate thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateConfig {
    pub max_complexity: i64,
    pub max_code_smells: i64,
    pub max_critical_smells: i64,
    pub max_vulnerabilities: i64,
    pub max_critical_vulnerabilities: i64,
    pub min_quality_score: f64,
    pub max_duplication_percentage: f64,
    pub block_on_failure: bool,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            max_complexity: 10,
            max_code_smells: 20,
            max_critical_smells: 0,
            max_vulnerabilities: 5,
            max_critical_vulnerabilities: 0,
            min_quality_score: 70.0,
            max_duplication_percentage: 10.0,
            block_on_failure: true,
        }
    }
}

/// One threshold evaluation within a gate result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateCheck {
    pub name: String,
    pub passed: bool,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

/// Outcome of a quality gate evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateResult {
    pub passed: bool,
    pub block_merge: bool,
    pub checks: Vec<GateCheck>,
    pub quality_score: f64,
    pub summary: String,
    pub run_id: Uuid,
}

/// A persisted record of one gate evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CicdRun {
    pub id: Uuid,
    pub repo_id: Uuid,
    pub branch: Option<String>,
    pub commit_sha: Option<String>,
    pub pr_number: Option<i64>,
    pub pr_title: Option<String>,
    pub triggered_by: TriggeredBy,
    pub status: RunStatus,
    /// Serialized GateResult for terminal runs
    pub gate_result: Option<serde_json::Value>,
    pub report_html: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Reporting bucket for cyclomatic complexity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityBucket {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

impl ComplexityBucket {
    /// Bucket a cyclomatic complexity value.
    pub fn for_value(v: i64) -> Self {
        match v {
            ..=10 => Self::Simple,
            11..=20 => Self::Moderate,
            21..=50 => Self::Complex,
            _ => Self::VeryComplex,
        }
    }
}

/// Reporting bucket for maintainability index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintainabilityBucket {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl MaintainabilityBucket {
    /// Bucket a maintainability index (0-100).
    pub fn for_value(mi: f64) -> Self {
        if mi >= 85.0 {
            Self::Excellent
        } else if mi >= 65.0 {
            Self::Good
        } else if mi >= 50.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}
