//! Heuristic code-smell detection: long methods, god classes, feature envy.
//!
//! LLM-assisted smells ride the same `CodeSmell` model; the provider call
//! lives in the pipeline so this module stays synchronous and pure.

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::core::models::{CodeSmell, Severity, Symbol, SymbolKind};

/// Thresholds for the heuristic detectors.
#[derive(Debug, Clone)]
pub struct SmellThresholds {
    pub long_method_lines: i64,
    pub god_class_methods: usize,
    pub god_class_lines: i64,
    pub feature_envy_min_external: usize,
}

impl Default for SmellThresholds {
    fn default() -> Self {
        Self {
            long_method_lines: 50,
            god_class_methods: 20,
            god_class_lines: 500,
            feature_envy_min_external: 5,
        }
    }
}

static SELF_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bself\.|\bthis\.").unwrap());
static MEMBER_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\.\w+").unwrap());

/// Heuristic code-smell detector.
pub struct SmellDetector {
    thresholds: SmellThresholds,
}

impl SmellDetector {
    /// Create a detector with default thresholds.
    pub fn new() -> Self {
        Self {
            thresholds: SmellThresholds::default(),
        }
    }

    /// Create a detector with custom thresholds.
    pub fn with_thresholds(thresholds: SmellThresholds) -> Self {
        Self { thresholds }
    }

    /// Scan one file's symbols for smells.
    pub fn scan_file(
        &self,
        repo_id: Uuid,
        file_id: Uuid,
        content: &str,
        symbols: &[Symbol],
    ) -> Vec<CodeSmell> {
        let mut findings = Vec::new();
        findings.extend(self.long_methods(repo_id, file_id, symbols));
        findings.extend(self.god_classes(repo_id, file_id, symbols));
        findings.extend(self.feature_envy(repo_id, file_id, content, symbols));
        findings
    }

    fn long_methods(&self, repo_id: Uuid, file_id: Uuid, symbols: &[Symbol]) -> Vec<CodeSmell> {
        let limit = self.thresholds.long_method_lines;
        symbols
            .iter()
            .filter(|s| matches!(s.kind, SymbolKind::Function | SymbolKind::Method))
            .filter_map(|symbol| {
                let lines = symbol.line_end - symbol.line_start;
                if lines <= limit {
                    return None;
                }
                let severity = if lines > limit * 2 {
                    Severity::High
                } else {
                    Severity::Medium
                };
                Some(CodeSmell {
                    id: Uuid::new_v4(),
                    repo_id,
                    smell_type: "long_method".to_string(),
                    severity,
                    title: format!("Long Method: {}", symbol.name),
                    description: format!(
                        "'{}' spans {} lines, over the recommended maximum of {}.",
                        symbol.name, lines, limit
                    ),
                    suggestion:
                        "Break the method into smaller, focused helpers (Extract Method)."
                            .to_string(),
                    file_id,
                    symbol_id: Some(symbol.id),
                    line_start: symbol.line_start,
                    line_end: symbol.line_end,
                    metric_value: Some(lines),
                    metric_threshold: Some(limit),
                })
            })
            .collect()
    }

    fn god_classes(&self, repo_id: Uuid, file_id: Uuid, symbols: &[Symbol]) -> Vec<CodeSmell> {
        let mut findings = Vec::new();

        for class in symbols.iter().filter(|s| s.kind == SymbolKind::Class) {
            // Parent-child is implicit via line containment.
            let method_count = symbols
                .iter()
                .filter(|s| s.kind == SymbolKind::Method)
                .filter(|s| class.line_start <= s.line_start && s.line_end <= class.line_end)
                .count();
            let class_lines = class.line_end - class.line_start;

            let too_many_methods = method_count > self.thresholds.god_class_methods;
            let too_long = class_lines > self.thresholds.god_class_lines;
            if !too_many_methods && !too_long {
                continue;
            }

            let severity = if method_count as f64 > self.thresholds.god_class_methods as f64 * 1.5
                || class_lines > self.thresholds.god_class_lines * 2
            {
                Severity::Critical
            } else {
                Severity::High
            };

            let mut reasons = Vec::new();
            if too_many_methods {
                reasons.push(format!(
                    "{method_count} methods (threshold: {})",
                    self.thresholds.god_class_methods
                ));
            }
            if too_long {
                reasons.push(format!(
                    "{class_lines} lines (threshold: {})",
                    self.thresholds.god_class_lines
                ));
            }

            let (metric_value, metric_threshold) = if too_many_methods {
                (
                    method_count as i64,
                    self.thresholds.god_class_methods as i64,
                )
            } else {
                (class_lines, self.thresholds.god_class_lines)
            };

            findings.push(CodeSmell {
                id: Uuid::new_v4(),
                repo_id,
                smell_type: "god_class".to_string(),
                severity,
                title: format!("God Class: {}", class.name),
                description: format!(
                    "Class '{}' has too many responsibilities: {}.",
                    class.name,
                    reasons.join(", ")
                ),
                suggestion:
                    "Split into smaller classes with single responsibilities (Extract Class)."
                        .to_string(),
                file_id,
                symbol_id: Some(class.id),
                line_start: class.line_start,
                line_end: class.line_end,
                metric_value: Some(metric_value),
                metric_threshold: Some(metric_threshold),
            });
        }

        findings
    }

    fn feature_envy(
        &self,
        repo_id: Uuid,
        file_id: Uuid,
        content: &str,
        symbols: &[Symbol],
    ) -> Vec<CodeSmell> {
        let lines: Vec<&str> = content.lines().collect();
        let mut findings = Vec::new();

        for symbol in symbols
            .iter()
            .filter(|s| matches!(s.kind, SymbolKind::Function | SymbolKind::Method))
        {
            let start = (symbol.line_start.max(1) - 1) as usize;
            let end = (symbol.line_end as usize).min(lines.len());
            if start >= end {
                continue;
            }
            let body = lines[start..end].join("\n");

            let self_refs = SELF_REF.find_iter(&body).count();
            let external_refs = MEMBER_REF.find_iter(&body).count().saturating_sub(self_refs);

            if external_refs > self.thresholds.feature_envy_min_external
                && external_refs > self_refs * 2
            {
                findings.push(CodeSmell {
                    id: Uuid::new_v4(),
                    repo_id,
                    smell_type: "feature_envy".to_string(),
                    severity: Severity::Medium,
                    title: format!("Feature Envy: {}", symbol.name),
                    description: format!(
                        "'{}' touches external members {} times but its own only {}.",
                        symbol.name, external_refs, self_refs
                    ),
                    suggestion:
                        "Consider moving the method next to the data it uses (Move Method)."
                            .to_string(),
                    file_id,
                    symbol_id: Some(symbol.id),
                    line_start: symbol.line_start,
                    line_end: symbol.line_end,
                    metric_value: Some(external_refs as i64),
                    metric_threshold: Some((self_refs * 2) as i64),
                });
            }
        }

        findings
    }
}

impl Default for SmellDetector {
    fn default() -> Self {
        Self::new()
    }
}
