//! Quality-gate engine: threshold evaluation, run records, CI webhooks.

pub mod report;
pub mod webhook;

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::core::errors::{KvasirError, Result};
use crate::core::models::{
    GateCheck, GateResult, QualityGateConfig, RunStatus, TriggeredBy,
};
use crate::storage::{GateMetrics, SqliteStore};

/// Parameters for one gate evaluation.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub repo_id: Uuid,
    pub branch: Option<String>,
    pub commit_sha: Option<String>,
    pub pr_number: Option<i64>,
    pub pr_title: Option<String>,
    pub triggered_by: TriggeredBy,
}

impl CheckRequest {
    /// A manual check with no CI context.
    pub fn manual(repo_id: Uuid) -> Self {
        Self {
            repo_id,
            branch: None,
            commit_sha: None,
            pr_number: None,
            pr_title: None,
            triggered_by: TriggeredBy::Manual,
        }
    }
}

/// Evaluates quality gates and persists CI/CD runs.
pub struct QualityGateEngine {
    store: SqliteStore,
}

impl QualityGateEngine {
    /// Create an engine bound to the store.
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    /// Evaluate the gate for a repository and persist a run record.
    ///
    /// The run moves `running -> passed | failed` (status `failed` iff the
    /// gate did not pass); evaluation errors move it to `error`.
    pub async fn check(&self, request: &CheckRequest) -> Result<GateResult> {
        let repo = self
            .store
            .get_repository(request.repo_id)
            .await?
            .ok_or_else(|| {
                KvasirError::validation(format!("unknown repository {}", request.repo_id))
            })?;

        let run = self
            .store
            .create_run(
                request.repo_id,
                request.branch.as_deref(),
                request.commit_sha.as_deref(),
                request.pr_number,
                request.pr_title.as_deref(),
                request.triggered_by,
            )
            .await?;

        let evaluation = self.evaluate(request.repo_id, run.id).await;
        match evaluation {
            Ok(result) => {
                let status = if result.passed {
                    RunStatus::Passed
                } else {
                    RunStatus::Failed
                };
                let html = report::render(&repo.name, &result)?;
                self.store
                    .complete_run(
                        run.id,
                        status,
                        Some(&serde_json::to_value(&result)?),
                        Some(&html),
                    )
                    .await?;
                info!(repo_id = %request.repo_id, run_id = %run.id, passed = result.passed, "gate evaluated");
                Ok(result)
            }
            Err(e) => {
                self.store
                    .complete_run(
                        run.id,
                        RunStatus::Error,
                        Some(&json!({ "error": e.to_string() })),
                        None,
                    )
                    .await?;
                Err(e)
            }
        }
    }

    async fn evaluate(&self, repo_id: Uuid, run_id: Uuid) -> Result<GateResult> {
        let config = self.store.gate_config(repo_id).await?;
        let metrics = self.store.gate_metrics(repo_id).await?;
        Ok(evaluate_gate(&config, &metrics, run_id))
    }
}

/// Pure threshold evaluation: given frozen metrics, the result is a
/// function of the configuration alone.
pub fn evaluate_gate(
    config: &QualityGateConfig,
    metrics: &GateMetrics,
    run_id: Uuid,
) -> GateResult {
    let score = quality_score(metrics);
    let mut checks = Vec::with_capacity(7);

    let mut push_max = |name: &str, value: f64, threshold: f64| {
        checks.push(GateCheck {
            name: name.to_string(),
            passed: value <= threshold,
            value,
            threshold,
            message: format!("{value:.1} (max: {threshold:.1})"),
        });
    };

    push_max("Code Smells", metrics.total_smells as f64, config.max_code_smells as f64);
    push_max(
        "Critical Smells",
        metrics.critical_smells as f64,
        config.max_critical_smells as f64,
    );
    push_max(
        "Vulnerabilities",
        metrics.total_vulnerabilities as f64,
        config.max_vulnerabilities as f64,
    );
    push_max(
        "Critical Vulnerabilities",
        metrics.critical_vulnerabilities as f64,
        config.max_critical_vulnerabilities as f64,
    );
    push_max(
        "Average Complexity",
        metrics.avg_complexity,
        config.max_complexity as f64,
    );
    push_max(
        "Duplication",
        metrics.duplication_percentage,
        config.max_duplication_percentage,
    );

    checks.push(GateCheck {
        name: "Quality Score".to_string(),
        passed: score >= config.min_quality_score,
        value: score,
        threshold: config.min_quality_score,
        message: format!("{score:.1} (min: {:.1})", config.min_quality_score),
    });

    let passed = checks.iter().all(|c| c.passed);
    let ok_count = checks.iter().filter(|c| c.passed).count();
    let summary = format!(
        "{} - {}/{} checks passed",
        if passed { "PASSED" } else { "FAILED" },
        ok_count,
        checks.len()
    );

    GateResult {
        passed,
        block_merge: !passed && config.block_on_failure,
        checks,
        quality_score: score,
        summary,
        run_id,
    }
}

/// Derived quality score, clamped to [0, 100]:
/// `100 - (3*critical_smells + other_smells) - (4*critical_vulns +
/// other_vulns) - max(0, avg_complexity - 10)*1.5 - duplication*0.5`.
pub fn quality_score(metrics: &GateMetrics) -> f64 {
    let other_smells = (metrics.total_smells - metrics.critical_smells).max(0) as f64;
    let other_vulns =
        (metrics.total_vulnerabilities - metrics.critical_vulnerabilities).max(0) as f64;

    let score = 100.0
        - (3.0 * metrics.critical_smells as f64 + other_smells)
        - (4.0 * metrics.critical_vulnerabilities as f64 + other_vulns)
        - (metrics.avg_complexity - 10.0).max(0.0) * 1.5
        - metrics.duplication_percentage * 0.5;

    score.clamp(0.0, 100.0)
}
