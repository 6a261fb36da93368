//! HTTP surface and quality-gate behaviour against a seeded store.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;
use uuid::Uuid;

use kvasir_rs::core::config::KvasirConfig;
use kvasir_rs::core::errors::Result;
use kvasir_rs::core::models::{
    Confidence, FileRecord, QualityGateConfig, RepoSource, RepositorySpec, RunStatus, Severity,
    Vulnerability,
};
use kvasir_rs::gate::webhook;
use kvasir_rs::gate::QualityGateEngine;
use kvasir_rs::scheduler::{JobRunner, JobScheduler, SchedulerConfig};
use kvasir_rs::server::{router, AppState};
use kvasir_rs::storage::SqliteStore;

/// Scheduler runner that records invocations without doing work.
#[derive(Default)]
struct NoopRunner;

#[async_trait]
impl JobRunner for NoopRunner {
    async fn run_ingest(&self, _repo_id: Uuid, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn mark_failed(&self, _repo_id: Uuid, _reason: &str) {}
}

async fn test_state(secret: Option<&str>) -> (AppState, SqliteStore) {
    let store = SqliteStore::in_memory().await.unwrap();
    let config = KvasirConfig {
        webhook_signing_secret: secret.map(String::from),
        ..Default::default()
    };
    let state = AppState {
        store: store.clone(),
        scheduler: Arc::new(JobScheduler::start(
            Arc::new(NoopRunner),
            SchedulerConfig::default(),
        )),
        gate: Arc::new(QualityGateEngine::new(store.clone())),
        index: None,
        config: Arc::new(config),
    };
    (state, store)
}

async fn seed_remote_repo(store: &SqliteStore, url: &str) -> Uuid {
    store
        .create_repository(&RepositorySpec {
            name: "seeded".to_string(),
            source: RepoSource::Remote,
            origin_url: Some(url.to_string()),
            branch: Some("main".to_string()),
            archive_path: None,
        })
        .await
        .unwrap()
        .id
}

async fn seed_critical_vuln(store: &SqliteStore, repo_id: Uuid) {
    let file = FileRecord {
        id: Uuid::new_v4(),
        repo_id,
        path: "danger.py".to_string(),
        language: "python".to_string(),
        byte_size: 10,
        line_count: 1,
        sha256: "x".to_string(),
        parse_error: None,
    };
    store
        .replace_repository_files(repo_id, &[(file.clone(), "x".to_string())], &[])
        .await
        .unwrap();
    store
        .insert_vulnerabilities(&[Vulnerability {
            id: Uuid::new_v4(),
            repo_id,
            file_id: file.id,
            line: 1,
            rule_id: "CMDI002".to_string(),
            severity: Severity::Critical,
            cwe: Some("CWE-78".to_string()),
            category: "command_injection".to_string(),
            description: "subprocess invoked with shell=True".to_string(),
            recommendation: "avoid shell".to_string(),
            confidence: Confidence::High,
            code_snippet: "subprocess.run(cmd, shell=True)".to_string(),
        }])
        .await
        .unwrap();
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn submit_and_fetch_repository() {
    let (state, _store) = test_state(None).await;
    let app = router(state);

    let response = app
        .clone()
        .oneshot(
            Request::post("/repos/submit")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"source": "remote", "origin_url": "https://example.com/demo.git", "branch": "main"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let id = body["id"].as_str().unwrap().to_string();
    assert_eq!(body["status"], "processing");

    let response = app
        .oneshot(Request::get(format!("/repos/{id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["name"], "demo");
    assert_eq!(body["source"], "remote");
}

#[tokio::test]
async fn duplicate_submission_is_conflict() {
    let (state, _store) = test_state(None).await;
    let app = router(state);
    let payload =
        r#"{"source": "remote", "origin_url": "https://example.com/dup.git", "branch": "main"}"#;

    let first = app
        .clone()
        .oneshot(
            Request::post("/repos/submit")
                .header("content-type", "application/json")
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(
            Request::post("/repos/submit")
                .header("content-type", "application/json")
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body = body_json(second).await;
    assert_eq!(body["error"]["code"], "conflict");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("already imported"));
}

#[tokio::test]
async fn unknown_repo_is_not_found() {
    let (state, _store) = test_state(None).await;
    let app = router(state);

    let response = app
        .oneshot(
            Request::get(format!("/repos/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn gate_config_roundtrip_over_http() {
    let (state, store) = test_state(None).await;
    let repo_id = seed_remote_repo(&store, "https://example.com/cfg.git").await;
    let app = router(state);

    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/quality-gate/{repo_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["max_complexity"], 10);

    let update = serde_json::to_string(&QualityGateConfig {
        max_critical_vulnerabilities: 0,
        min_quality_score: 70.0,
        ..Default::default()
    })
    .unwrap();
    let response = app
        .clone()
        .oneshot(
            Request::put(format!("/quality-gate/{repo_id}"))
                .header("content-type", "application/json")
                .body(Body::from(update))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let persisted = store.gate_config(repo_id).await.unwrap();
    assert_eq!(persisted.min_quality_score, 70.0);
}

#[tokio::test]
async fn failing_gate_blocks_merge_and_lists_all_checks() {
    let (state, store) = test_state(None).await;
    let repo_id = seed_remote_repo(&store, "https://example.com/gate.git").await;
    seed_critical_vuln(&store, repo_id).await;
    store
        .put_gate_config(
            repo_id,
            &QualityGateConfig {
                max_critical_vulnerabilities: 0,
                min_quality_score: 70.0,
                block_on_failure: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let app = router(state);
    let response = app
        .clone()
        .oneshot(
            Request::post(format!("/quality-gate/{repo_id}/check"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    assert_eq!(body["passed"], false);
    assert_eq!(body["block_merge"], true);
    // One critical vulnerability: quality score 96 still clears 70, so
    // the score check passes while the critical check fails.
    assert!(body["quality_score"].as_f64().unwrap() >= 70.0);

    let checks = body["checks"].as_array().unwrap();
    assert_eq!(checks.len(), 7);
    let critical = checks
        .iter()
        .find(|c| c["name"] == "Critical Vulnerabilities")
        .unwrap();
    assert_eq!(critical["passed"], false);
    let score = checks.iter().find(|c| c["name"] == "Quality Score").unwrap();
    assert_eq!(score["passed"], true);

    // The run persisted as failed (status follows the gate outcome).
    let runs = store.list_runs(repo_id).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);

    // The stored report is served as HTML.
    let run_id = runs[0].id;
    let response = app
        .oneshot(
            Request::get(format!("/report/{run_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = response.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8_lossy(&html);
    assert!(html.contains("FAILED"));
    assert!(html.contains("Critical Vulnerabilities"));
}

#[tokio::test]
async fn webhook_triggers_gate_check() {
    let secret = "wh-secret";
    let (state, store) = test_state(Some(secret)).await;
    let repo_id = seed_remote_repo(&store, "https://example.com/hook.git").await;
    let app = router(state);

    let payload = serde_json::json!({
        "event_type": "pull_request.opened",
        "pull_request": {
            "number": 12,
            "title": "Tighten parser",
            "head": {"sha": "cafe12", "ref": "feature/parse"}
        },
        "repository": {"clone_url": "https://example.com/hook.git"}
    })
    .to_string();
    let signature = webhook::sign(secret, payload.as_bytes());

    let response = app
        .oneshot(
            Request::post("/webhook/ci")
                .header("content-type", "application/json")
                .header("x-hub-signature-256", signature)
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "completed");

    let runs = store.list_runs(repo_id).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].triggered_by.as_str(), "webhook");
    assert_eq!(runs[0].pr_number, Some(12));
    assert_eq!(runs[0].branch.as_deref(), Some("feature/parse"));
}

#[tokio::test]
async fn webhook_rejects_bad_signature() {
    let (state, _store) = test_state(Some("right-secret")).await;
    let app = router(state);

    let payload = r#"{"event_type": "pull_request.opened"}"#;
    let signature = webhook::sign("wrong-secret", payload.as_bytes());

    let response = app
        .oneshot(
            Request::post("/webhook/ci")
                .header("x-hub-signature-256", signature)
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_ignores_unknown_events() {
    let (state, _store) = test_state(None).await;
    let app = router(state);

    let response = app
        .oneshot(
            Request::post("/webhook/ci")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"event_type": "issue_comment.created"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ignored");
}

#[tokio::test]
async fn semantic_search_without_provider_is_client_error() {
    let (state, _store) = test_state(None).await;
    let app = router(state);

    let response = app
        .oneshot(
            Request::post("/search/semantic")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"query": "parse files"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "bad_request");
}
