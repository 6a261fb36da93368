//! HTML gate report rendering.

use handlebars::Handlebars;
use once_cell::sync::Lazy;
use serde_json::json;

use crate::core::errors::{KvasirError, Result};
use crate::core::models::GateResult;

const REPORT_TEMPLATE: &str = r##"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Kvasir Report - {{repository}}</title>
  <style>
    body { font-family: -apple-system, 'Segoe UI', sans-serif; margin: 0; padding: 24px; background: #f8fafc; color: #1e293b; }
    .card { background: white; border-radius: 12px; padding: 24px; margin-bottom: 20px; box-shadow: 0 1px 3px rgba(0,0,0,.1); }
    .badge { display: inline-block; padding: 8px 20px; border-radius: 9999px; color: white; font-weight: 700; font-size: 18px; background: {{status_color}}; }
    table { width: 100%; border-collapse: collapse; }
    th { background: #f1f5f9; padding: 10px 12px; text-align: left; font-weight: 600; }
    td { border-bottom: 1px solid #e2e8f0; padding: 8px 12px; }
    tr.fail { background: #fef2f2; }
    tr.pass { background: #f0fdf4; }
    h1 { margin: 0 0 4px; font-size: 24px; }
    h2 { margin: 0 0 16px; font-size: 18px; color: #475569; }
    .muted { color: #64748b; }
  </style>
</head>
<body>
  <div class="card">
    <h1>Kvasir Quality Report</h1>
    <h2>{{repository}}</h2>
    <p class="muted">Generated: {{generated}}</p>
    <div class="badge">{{status_text}}</div>
    <p class="muted">{{summary}}</p>
    <p class="muted">Quality score: {{score}}/100</p>
  </div>
  <div class="card">
    <h2>Quality Gate Results</h2>
    <table>
      <thead><tr><th>Check</th><th>Value</th><th>Threshold</th><th>Details</th></tr></thead>
      <tbody>
        {{#each checks}}
        <tr class="{{#if passed}}pass{{else}}fail{{/if}}">
          <td>{{#if passed}}&#10003;{{else}}&#10007;{{/if}} {{name}}</td>
          <td>{{value}}</td>
          <td>{{threshold}}</td>
          <td>{{message}}</td>
        </tr>
        {{/each}}
      </tbody>
    </table>
  </div>
</body>
</html>
"##;

static TEMPLATES: Lazy<Handlebars<'static>> = Lazy::new(|| {
    let mut registry = Handlebars::new();
    registry
        .register_template_string("gate_report", REPORT_TEMPLATE)
        .expect("report template must compile");
    registry
});

/// Render the HTML report for one gate result.
pub fn render(repository: &str, result: &GateResult) -> Result<String> {
    let checks: Vec<serde_json::Value> = result
        .checks
        .iter()
        .map(|check| {
            json!({
                "name": check.name,
                "passed": check.passed,
                "value": format!("{:.1}", check.value),
                "threshold": format!("{:.1}", check.threshold),
                "message": check.message,
            })
        })
        .collect();

    let data = json!({
        "repository": repository,
        "generated": chrono::Utc::now().format("%Y-%m-%d %H:%M UTC").to_string(),
        "status_text": if result.passed { "PASSED" } else { "FAILED" },
        "status_color": if result.passed { "#22c55e" } else { "#ef4444" },
        "summary": result.summary,
        "score": format!("{:.1}", result.quality_score),
        "checks": checks,
    });

    TEMPLATES
        .render("gate_report", &data)
        .map_err(|e| KvasirError::internal(format!("report rendering failed: {e}")))
}

/// Plain-text variant for terminal output.
pub fn render_text(repository: &str, result: &GateResult) -> String {
    let mut lines = vec![
        format!("Kvasir Quality Report - {repository}"),
        "=".repeat(60),
        format!("Status: {}", if result.passed { "PASSED" } else { "FAILED" }),
        result.summary.clone(),
        format!("Quality score: {:.1}/100", result.quality_score),
        String::new(),
        "Checks:".to_string(),
        "-".repeat(40),
    ];
    for check in &result.checks {
        lines.push(format!(
            "[{}] {}: {}",
            if check.passed { "ok" } else { "FAIL" },
            check.name,
            check.message
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::GateCheck;
    use uuid::Uuid;

    fn sample_result(passed: bool) -> GateResult {
        GateResult {
            passed,
            block_merge: !passed,
            checks: vec![
                GateCheck {
                    name: "Vulnerabilities".to_string(),
                    passed: true,
                    value: 1.0,
                    threshold: 5.0,
                    message: "1.0 (max: 5.0)".to_string(),
                },
                GateCheck {
                    name: "Critical Vulnerabilities".to_string(),
                    passed,
                    value: if passed { 0.0 } else { 1.0 },
                    threshold: 0.0,
                    message: "1.0 (max: 0.0)".to_string(),
                },
            ],
            quality_score: 82.0,
            summary: "FAILED - 1/2 checks passed".to_string(),
            run_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_html_report_renders_checks() {
        let html = render("demo/repo", &sample_result(false)).unwrap();
        assert!(html.contains("demo/repo"));
        assert!(html.contains("FAILED"));
        assert!(html.contains("Critical Vulnerabilities"));
        assert!(html.contains("class=\"fail\""));
        assert!(html.contains("82.0"));
    }

    #[test]
    fn test_passed_report_uses_green_badge() {
        let html = render("demo/repo", &sample_result(true)).unwrap();
        assert!(html.contains("#22c55e"));
        assert!(html.contains("PASSED"));
    }

    #[test]
    fn test_text_report() {
        let text = render_text("demo", &sample_result(false));
        assert!(text.contains("FAIL"));
        assert!(text.contains("Vulnerabilities"));
    }
}
